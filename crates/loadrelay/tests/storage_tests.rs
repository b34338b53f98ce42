//! Shared storage and failover behavior through the public API.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;

use common::{SwitchableBackend, TestHarness};
use loadrelay::bridge::JOBS_FILE;
use loadrelay::model::{JobStatus, ProcessingStep};
use loadrelay::storage::JobBackend;
use loadrelay::{
    Job, JobUpdate, ProcessingResult, RetentionPolicy, SessionStore, StorageSettings,
    UnifiedStorage,
};

#[test]
fn test_caps_hold_for_jobs_and_results() {
    let harness = TestHarness::new();
    let bridge = harness.bridge();

    for i in 0..25 {
        bridge
            .add_job(&Job::new(format!("load-{i}.csv"), "acme-freight", "ops"))
            .unwrap();
    }
    for i in 0..60 {
        let mut job = Job::new(format!("done-{i}.csv"), "acme-freight", "ops");
        job.mark_completed(1, 0, None);
        bridge
            .add_result(&ProcessingResult::from_job(&job, "loads"))
            .unwrap();
    }

    assert!(bridge.get_all_jobs("acme-freight").unwrap().len() <= 20);
    assert!(bridge.get_active_jobs("acme-freight").unwrap().len() <= 20);
    assert!(bridge.get_recent_results("acme-freight", 1000).unwrap().len() <= 50);
}

#[test]
fn test_second_reader_sees_writes() {
    let harness = TestHarness::new();
    let writer = harness.bridge();
    let reader = harness.bridge();

    let job = Job::new("x.csv", "acme-freight", "ops");
    writer.add_job(&job).unwrap();
    writer
        .update_job(
            &job.job_id,
            "acme-freight",
            &JobUpdate::stage(ProcessingStep::AnalyzingData, 20.0),
        )
        .unwrap();

    let seen = reader.get_active_jobs("acme-freight").unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].current_step, ProcessingStep::AnalyzingData);
    assert_eq!(seen[0].status, JobStatus::Processing);
}

#[test]
fn test_failover_serves_written_data() {
    let session: Arc<dyn JobBackend> = Arc::new(SessionStore::default());
    let storage = UnifiedStorage::new(
        Arc::new(SwitchableBackend::down()),
        Some(session),
        StorageSettings::default(),
    );

    let job = storage
        .create_job("x.csv", "Acme Freight", "ops@acme.test", 120, "text/csv")
        .expect("fallback should store the job");
    let active = storage.get_active_jobs("acme-freight");
    assert_eq!(active, vec![job.clone()]);

    assert!(storage.update_job(
        &job.job_id,
        "acme-freight",
        &JobUpdate::stage(ProcessingStep::ApplyingMappings, 40.0)
    ));
    let active = storage.get_active_jobs("acme-freight");
    assert_eq!(active[0].progress_percent, 40.0);

    let health = storage.storage_health(false);
    assert!(!health.is_healthy());
    assert!(health.is_operational());
}

#[test]
fn test_locked_shared_storage_fails_over_to_session() {
    let harness = TestHarness::new();
    let storage = harness.storage();
    let lock = harness.hold_storage_lock(JOBS_FILE);

    let job = storage
        .create_job("held.csv", "Acme Freight", "ops@acme.test", 64, "text/csv")
        .expect("session fallback should store the job");
    let health = storage.storage_health(false);
    assert!(!health.is_healthy());
    assert!(health
        .primary
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("lock")));
    assert_eq!(storage.get_active_jobs("acme-freight"), vec![job.clone()]);
    assert!(storage.update_job(
        &job.job_id,
        "acme-freight",
        &JobUpdate::stage(ProcessingStep::AnalyzingData, 20.0)
    ));
    assert!(storage.has_recent_activity("acme-freight", 5));

    drop(lock);
    assert!(harness.bridge().get_all_jobs("acme-freight").unwrap().is_empty());

    assert!(storage.storage_health(true).is_healthy());
    assert!(storage.migrate_session_to_shared("acme-freight"));
    let shared = harness.bridge().get_all_jobs("acme-freight").unwrap();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].job_id, job.job_id);
    assert_eq!(shared[0].current_step, ProcessingStep::AnalyzingData);
}

#[test]
fn test_concurrent_health_checks_stay_consistent() {
    let primary = Arc::new(SwitchableBackend::default());
    let session: Arc<dyn JobBackend> = Arc::new(SessionStore::default());
    let storage = Arc::new(UnifiedStorage::new(
        primary.clone(),
        Some(session),
        StorageSettings {
            health_check_interval: Duration::from_millis(1),
        },
    ));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let storage = storage.clone();
            let primary = primary.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    if worker == 0 {
                        primary.set_down(i % 2 == 0);
                    }
                    storage.create_job(&format!("w{worker}-{i}.csv"), "acme", "ops", 1, "text/csv");
                    let _ = storage.get_active_jobs("acme");
                    let report = storage.storage_health(i % 10 == 0);

                    assert_eq!(report.primary.backend, "switchable");
                    if report.primary.available {
                        assert_eq!(report.primary.error_count, 0);
                    } else {
                        assert!(report.primary.error_count > 0);
                        assert!(report.primary.last_error.is_some());
                    }
                    let fallback = report.fallback.expect("fallback is configured");
                    assert!(fallback.available);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    primary.set_down(false);
    assert!(storage.storage_health(true).is_healthy());
}

#[test]
fn test_tenant_key_variants_reach_the_same_jobs() {
    let harness = TestHarness::new();
    let storage = harness.storage();

    for raw in ["Acme_Freight", "acme-freight", "ACME FREIGHT"] {
        assert_eq!(loadrelay::tenant::normalize(raw), "acme-freight");
    }

    let job = storage
        .create_job("x.csv", "Acme_Freight", "ops", 10, "text/csv")
        .unwrap();
    let found = storage.get_all_jobs("ACME FREIGHT");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].job_id, job.job_id);
}

#[test]
fn test_completed_job_leaves_active_list() {
    let harness = TestHarness::new();
    let storage = harness.storage();

    let job = Job::new("x.csv", "acme-freight", "ops").with_record_count(10);
    storage.add_job(&job).unwrap();
    thread::sleep(Duration::from_millis(20));

    assert!(storage.update_job(
        &job.job_id,
        "acme-freight",
        &JobUpdate::stage(ProcessingStep::ApplyingMappings, 40.0).status(JobStatus::Processing)
    ));
    thread::sleep(Duration::from_millis(20));
    assert!(storage.update_job(&job.job_id, "acme-freight", &JobUpdate::completed(9, 1)));

    let completed = storage.get_completed_jobs("acme-freight", 10);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, JobStatus::Completed);
    assert_eq!(completed[0].progress_percent, 100.0);
    assert_eq!(completed[0].success_count, 9);
    assert_eq!(completed[0].failure_count, 1);
    assert!(completed[0].processing_time > 0.0);
    assert!(storage.get_active_jobs("acme-freight").is_empty());
}

#[test]
fn test_deleted_jobs_file_is_recreated() {
    let harness = TestHarness::new();
    let storage = harness.storage();

    storage.create_job("a.csv", "acme", "ops", 1, "text/csv").unwrap();
    std::fs::remove_file(harness.storage_dir.join(JOBS_FILE)).unwrap();

    assert!(storage.get_active_jobs("acme").is_empty());
    assert!(storage.storage_health(true).is_healthy());

    let job = storage.create_job("b.csv", "acme", "ops", 1, "text/csv").unwrap();
    let raw = std::fs::read_to_string(harness.storage_dir.join(JOBS_FILE)).unwrap();
    let table: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let records = table["acme"].as_array().expect("tenant list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["job_id"], job.job_id.as_str());
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 16,
        ..ProptestConfig::default()
    })]

    #[test]
    fn retention_keeps_the_newest(inserted in 1usize..40, max_jobs in 1usize..12) {
        let harness = TestHarness::new();
        let bridge = harness.bridge_with(RetentionPolicy {
            max_jobs_per_tenant: max_jobs,
            max_results_per_tenant: 50,
        });

        let jobs: Vec<Job> = (0..inserted)
            .map(|i| Job::new(format!("f{i}.csv"), "acme", "ops"))
            .collect();
        for job in &jobs {
            bridge.add_job(job).unwrap();
        }

        let stored = bridge.get_all_jobs("acme").unwrap();
        prop_assert_eq!(stored.len(), inserted.min(max_jobs));
        let newest = &jobs[inserted - 1];
        prop_assert_eq!(&stored[stored.len() - 1].job_id, &newest.job_id);
    }
}
