//! One job/result API over the shared storage bridge, falling back to the
//! in-process session store while shared storage is unavailable.
//!
//! Data operations never fail: when no backend can answer they log and
//! return the empty value. Whether storage is actually working is answered
//! by [`UnifiedStorage::storage_health`].

pub mod backend;
mod health;
pub mod session;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bridge::CleanupReport;
use crate::broadcast::{JobEvent, JobEventBroadcaster};
use crate::error::StorageError;
use crate::model::{
    create_job, validate_job_record, Job, JobUpdate, ProcessingResult, ProcessingStats,
    RecordProblem,
};
use crate::tenant;

pub use backend::JobBackend;
pub use health::{HealthReport, StorageHealthStatus};
pub use session::SessionStore;

use health::{HealthMonitor, ProbeOutcome, Role};

pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Minimum time between unforced health probes.
    pub health_check_interval: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
        }
    }
}

/// What one maintenance run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub tenant_keys_merged: usize,
    pub cleanup: CleanupReport,
}

pub struct UnifiedStorage {
    primary: Arc<dyn JobBackend>,
    fallback: Option<Arc<dyn JobBackend>>,
    health: HealthMonitor,
    events: Option<JobEventBroadcaster>,
}

impl std::fmt::Debug for UnifiedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedStorage")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|b| b.name()))
            .finish()
    }
}

/// Probes one backend. A panicking probe counts as a failed check.
fn probe(backend: &dyn JobBackend) -> ProbeOutcome {
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| backend.probe())).unwrap_or_else(|_| {
        Err(StorageError::Unavailable(format!(
            "{} panicked during health check",
            backend.name()
        )))
    });
    ProbeOutcome {
        result,
        elapsed: started.elapsed(),
    }
}

impl UnifiedStorage {
    pub fn new(
        primary: Arc<dyn JobBackend>,
        fallback: Option<Arc<dyn JobBackend>>,
        settings: StorageSettings,
    ) -> Self {
        let health = HealthMonitor::new(
            primary.name(),
            fallback.as_ref().map(|b| b.name()),
            settings.health_check_interval,
        );
        Self {
            primary,
            fallback,
            health,
            events: None,
        }
    }

    /// Publishes job events for every successful write.
    pub fn with_events(mut self, events: JobEventBroadcaster) -> Self {
        self.events = Some(events);
        self
    }

    pub fn events(&self) -> Option<&JobEventBroadcaster> {
        self.events.as_ref()
    }

    fn publish(&self, event: impl FnOnce() -> JobEvent) {
        if let Some(events) = &self.events {
            events.send(event());
        }
    }

    /// Runs the health probe if it is due (or forced) and no other caller is
    /// already running it.
    fn check_health(&self, force: bool) {
        let Some(claim) = self.health.claim_probe(force) else {
            return;
        };
        let primary = probe(self.primary.as_ref());
        let fallback = self.fallback.as_deref().map(probe);
        claim.commit(primary, fallback);
    }

    /// Runs `op` on the primary, then on the fallback, and returns `empty`
    /// when neither answers.
    fn dispatch<T>(
        &self,
        op: &str,
        empty: T,
        run: impl Fn(&dyn JobBackend) -> Result<T, StorageError>,
    ) -> T {
        self.check_health(false);

        if self.health.is_available(Role::Primary) {
            match run(self.primary.as_ref()) {
                Ok(value) => {
                    self.health.record_success(Role::Primary);
                    return value;
                }
                Err(e) => {
                    log::warn!(
                        "{} failed on {}: {}; switching to fallback",
                        op,
                        self.primary.name(),
                        e
                    );
                    self.health.record_failure(Role::Primary, &e);
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            if self.health.is_available(Role::Fallback) {
                match run(fallback.as_ref()) {
                    Ok(value) => {
                        self.health.record_success(Role::Fallback);
                        return value;
                    }
                    Err(e) => {
                        log::error!("{} failed on {}: {}", op, fallback.name(), e);
                        self.health.record_failure(Role::Fallback, &e);
                    }
                }
            }
        }

        log::error!("{}: no storage backend available", op);
        empty
    }

    /// Builds a pending job and stores it. `None` when nothing could store it.
    pub fn create_job(
        &self,
        filename: &str,
        tenant_key: &str,
        email_source: &str,
        file_size: u64,
        mime_type: &str,
    ) -> Option<Job> {
        let job = Job::new(filename, tenant_key, email_source).with_file_info(file_size, mime_type);
        self.add_job(&job).map(|_| job)
    }

    /// Stores a job and returns its id, or `None` when nothing could store it.
    pub fn add_job(&self, job: &Job) -> Option<String> {
        let stored = self.dispatch("add_job", false, |backend| {
            backend.add_job(job).map(|_| true)
        });
        if !stored {
            return None;
        }
        self.publish(|| JobEvent::created(job));
        Some(job.job_id.clone())
    }

    /// Merges `update` into a job. Returns whether the job was found and
    /// updated.
    ///
    /// A job the primary does not know is looked up in the fallback too, so
    /// jobs created during an outage can still be finished after recovery.
    pub fn update_job(&self, job_id: &str, tenant_key: &str, update: &JobUpdate) -> bool {
        let mut updated = self.dispatch("update_job", None, |backend| {
            backend.update_job(job_id, tenant_key, update)
        });

        if updated.is_none() {
            if let Some(fallback) = &self.fallback {
                if self.health.is_available(Role::Fallback) {
                    updated = fallback
                        .update_job(job_id, tenant_key, update)
                        .unwrap_or_else(|e| {
                            log::error!("update_job failed on {}: {}", fallback.name(), e);
                            self.health.record_failure(Role::Fallback, &e);
                            None
                        });
                }
            }
        }

        match updated {
            Some(job) => {
                self.publish(|| JobEvent::updated(&job));
                true
            }
            None => false,
        }
    }

    pub fn add_result(&self, result: &ProcessingResult) -> bool {
        let stored = self.dispatch("add_result", false, |backend| {
            backend.add_result(result).map(|_| true)
        });
        if stored {
            self.publish(|| JobEvent::result_recorded(result));
        }
        stored
    }

    pub fn get_active_jobs(&self, tenant_key: &str) -> Vec<Job> {
        self.dispatch("get_active_jobs", Vec::new(), |backend| {
            backend.active_jobs(tenant_key)
        })
    }

    pub fn get_all_jobs(&self, tenant_key: &str) -> Vec<Job> {
        self.dispatch("get_all_jobs", Vec::new(), |backend| {
            backend.all_jobs(tenant_key)
        })
    }

    pub fn get_completed_jobs(&self, tenant_key: &str, limit: usize) -> Vec<Job> {
        self.dispatch("get_completed_jobs", Vec::new(), |backend| {
            backend.completed_jobs(tenant_key, limit)
        })
    }

    pub fn get_recent_results(&self, tenant_key: &str, limit: usize) -> Vec<ProcessingResult> {
        self.dispatch("get_recent_results", Vec::new(), |backend| {
            backend.recent_results(tenant_key, limit)
        })
    }

    pub fn get_processing_stats(&self, tenant_key: &str) -> ProcessingStats {
        self.dispatch("get_processing_stats", ProcessingStats::default(), |backend| {
            backend.processing_stats(tenant_key)
        })
    }

    /// Whether the tenant had a job start within the last `minutes`. `false`
    /// when no backend can answer.
    pub fn has_recent_activity(&self, tenant_key: &str, minutes: i64) -> bool {
        self.dispatch("has_recent_activity", false, |backend| {
            backend.has_recent_activity(tenant_key, minutes)
        })
    }

    /// Removes a tenant's jobs. Returns how many were removed.
    pub fn clear_jobs(&self, tenant_key: &str) -> usize {
        self.dispatch("clear_jobs", 0, |backend| backend.clear_jobs(tenant_key))
    }

    /// Moves a tenant's jobs from the fallback into the primary, one record
    /// at a time. Records that cannot be identified or stored are skipped.
    /// The fallback copy is cleared only when at least one record moved.
    /// Returns `true` when there was nothing to migrate.
    pub fn migrate_session_to_shared(&self, tenant_key: &str) -> bool {
        let Some(fallback) = &self.fallback else {
            return true;
        };
        let records = match fallback.raw_jobs(tenant_key) {
            Ok(records) => records,
            Err(e) => {
                log::error!("Cannot read {} for migration: {}", fallback.name(), e);
                return false;
            }
        };
        if records.is_empty() {
            return true;
        }

        let mut migrated = 0usize;
        for record in &records {
            let problems = validate_job_record(record);
            if problems.iter().any(|p| {
                matches!(
                    p,
                    RecordProblem::NotAnObject | RecordProblem::MissingField("job_id")
                )
            }) {
                log::warn!("Skipping unidentifiable session record: {}", record);
                continue;
            }
            let mut job = create_job(record);
            if job.tenant_key == tenant::UNKNOWN_TENANT {
                job.tenant_key = tenant::storage_key(tenant_key);
            }
            match self.primary.add_job(&job) {
                Ok(()) => migrated += 1,
                Err(e) => {
                    log::warn!("Failed to migrate job {}: {}", job.job_id, e);
                    self.health.record_failure(Role::Primary, &e);
                }
            }
        }

        if migrated == 0 {
            log::error!(
                "No session jobs for {} could be migrated ({} records)",
                tenant_key,
                records.len()
            );
            return false;
        }
        if let Err(e) = fallback.clear_jobs(tenant_key) {
            log::warn!("Migrated jobs but could not clear session copy: {}", e);
        }
        log::info!(
            "Migrated {}/{} session jobs for {} to {}",
            migrated,
            records.len(),
            tenant_key,
            self.primary.name()
        );
        true
    }

    /// Consolidates legacy tenant keys and drops records older than
    /// `days_to_keep` in the primary store. `None` when the primary is
    /// unavailable or the maintenance failed.
    pub fn run_maintenance(&self, days_to_keep: i64) -> Option<MaintenanceReport> {
        self.check_health(false);
        if !self.health.is_available(Role::Primary) {
            log::warn!("Skipping storage maintenance: {} is unavailable", self.primary.name());
            return None;
        }
        let result = self.primary.consolidate_tenant_keys().and_then(|merged| {
            let cleanup = self.primary.cleanup_old_data(days_to_keep)?;
            Ok(MaintenanceReport {
                tenant_keys_merged: merged,
                cleanup,
            })
        });
        match result {
            Ok(report) => {
                self.health.record_success(Role::Primary);
                Some(report)
            }
            Err(e) => {
                log::error!("Storage maintenance failed on {}: {}", self.primary.name(), e);
                self.health.record_failure(Role::Primary, &e);
                None
            }
        }
    }

    /// Current health of both backends; `force` probes them immediately.
    pub fn storage_health(&self, force: bool) -> HealthReport {
        self.check_health(force);
        self.health.report()
    }
}
