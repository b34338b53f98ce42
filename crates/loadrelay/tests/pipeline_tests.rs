//! Pipeline runs observed through storage.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{shipment_csv, RecordingBackend, TestHarness};
use loadrelay::model::{JobStatus, ProcessingStep, ResultStatus};
use loadrelay::storage::JobBackend;
use loadrelay::{
    Attachment, LocalExportProcessor, Pipeline, PipelineConfig, SecretSource, StorageSettings,
    UnifiedStorage,
};

fn recorded_pipeline(
    harness: &TestHarness,
    required: &[&str],
) -> (Pipeline, Arc<RecordingBackend>, Arc<UnifiedStorage>) {
    let backend = Arc::new(RecordingBackend::default());
    let primary: Arc<dyn JobBackend> = backend.clone();
    let storage = Arc::new(UnifiedStorage::new(primary, None, StorageSettings::default()));
    let processor = LocalExportProcessor::new(&harness.output_dir)
        .with_required_columns(required.iter().map(|c| c.to_string()).collect());
    (
        Pipeline::new(storage.clone(), Arc::new(processor)),
        backend,
        storage,
    )
}

fn sheet(name: &str, rows: usize) -> Attachment {
    Attachment::new(name, shipment_csv(rows).into_bytes(), "text/csv")
        .with_sender("dispatch@acme-freight.test")
        .with_subject("Today's loads")
}

fn mappings() -> PipelineConfig {
    let mut column_mappings = BTreeMap::new();
    column_mappings.insert("ship from".to_string(), "origin".to_string());
    column_mappings.insert("Ship To".to_string(), "destination".to_string());
    PipelineConfig {
        column_mappings,
        credentials: None,
    }
}

#[test]
fn test_progress_and_steps_only_move_forward() {
    let harness = TestHarness::new();
    let (pipeline, backend, storage) = recorded_pipeline(&harness, &[]);
    let attachment = sheet("loads.csv", 4);

    let result = pipeline
        .reprocess(&attachment, "Acme Freight", &mappings())
        .expect("job stored");
    assert_eq!(result.overall_status, ResultStatus::Success);

    let snapshots = backend.snapshots.lock().unwrap();
    assert!(snapshots.len() >= 5, "one update per stage plus completion");
    for pair in snapshots.windows(2) {
        assert!(pair[1].progress_percent >= pair[0].progress_percent);
        assert!(pair[1].current_step >= pair[0].current_step);
    }
    let last = snapshots.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.progress_percent, 100.0);

    let steps: Vec<ProcessingStep> = snapshots.iter().map(|j| j.current_step).collect();
    assert!(steps.contains(&ProcessingStep::ParsingEmail));
    assert!(steps.contains(&ProcessingStep::ApplyingMappings));
    assert!(steps.contains(&ProcessingStep::GeneratingResults));

    let results = storage.get_recent_results("acme-freight", 10);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].records_processed, 4);
}

#[test]
fn test_export_uses_mapped_columns() {
    let harness = TestHarness::new();
    let (pipeline, _backend, storage) = recorded_pipeline(&harness, &["origin"]);

    let result = pipeline
        .reprocess(&sheet("loads.csv", 2), "acme-freight", &mappings())
        .unwrap();
    assert_eq!(result.records_successful, 2);
    assert_eq!(result.output_files.len(), 1);

    let exported = std::fs::read_to_string(&result.output_files[0].path).unwrap();
    let header = exported.lines().next().unwrap();
    assert_eq!(
        header,
        "origin,destination,Weight,loadrelay_job_id,loadrelay_row"
    );
    assert!(exported.contains("Dallas 1,Houston 1,1001"));

    let job = &storage.get_completed_jobs("acme-freight", 1)[0];
    assert_eq!(job.result_data.as_ref().unwrap()["mapped_columns"], 2);
}

#[test]
fn test_failed_stage_is_recorded() {
    let harness = TestHarness::new();
    let (pipeline, backend, storage) = recorded_pipeline(&harness, &[]);
    let config = PipelineConfig {
        column_mappings: BTreeMap::new(),
        credentials: Some(SecretSource::from_env("LOADRELAY_TEST_UNSET_CREDENTIAL")),
    };

    let result = pipeline
        .reprocess(&sheet("loads.csv", 3), "acme-freight", &config)
        .unwrap();
    assert_eq!(result.overall_status, ResultStatus::Failed);

    let job = &storage.get_all_jobs("acme-freight")[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_step, ProcessingStep::ApplyingMappings);
    assert_eq!(job.error_details.as_ref().unwrap()["error_type"], "credentials");
    assert!(job.error_message.contains("LOADRELAY_TEST_UNSET_CREDENTIAL"));

    let snapshots = backend.snapshots.lock().unwrap();
    for pair in snapshots.windows(2) {
        assert!(pair[1].current_step >= pair[0].current_step);
    }
}
