//! The seam between the unified storage front end and concrete stores.

use chrono::Utc;
use serde_json::Value;

use crate::bridge::{CleanupReport, SharedStorageBridge};
use crate::error::StorageError;
use crate::model::{Job, JobUpdate, ProcessingResult, ProcessingStats};

/// A store of jobs and results partitioned by tenant.
///
/// Reads always hand back canonical [`Job`] and [`ProcessingResult`] values,
/// whatever shape the backend keeps on disk or in memory. Errors mean the
/// backend itself is unusable; an unknown job is `Ok(None)`.
pub trait JobBackend: Send + Sync {
    /// Short name used in logs and health reports.
    fn name(&self) -> &'static str;

    fn add_job(&self, job: &Job) -> Result<(), StorageError>;

    fn update_job(
        &self,
        job_id: &str,
        tenant_key: &str,
        update: &JobUpdate,
    ) -> Result<Option<Job>, StorageError>;

    fn add_result(&self, result: &ProcessingResult) -> Result<(), StorageError>;

    fn all_jobs(&self, tenant_key: &str) -> Result<Vec<Job>, StorageError>;

    fn active_jobs(&self, tenant_key: &str) -> Result<Vec<Job>, StorageError> {
        let mut jobs = self.all_jobs(tenant_key)?;
        jobs.retain(Job::is_active);
        Ok(jobs)
    }

    fn completed_jobs(&self, tenant_key: &str, limit: usize) -> Result<Vec<Job>, StorageError>;

    fn recent_results(
        &self,
        tenant_key: &str,
        limit: usize,
    ) -> Result<Vec<ProcessingResult>, StorageError>;

    fn processing_stats(&self, tenant_key: &str) -> Result<ProcessingStats, StorageError> {
        Ok(ProcessingStats::from_jobs(&self.all_jobs(tenant_key)?))
    }

    /// Whether any job of the tenant started (or was created) within the
    /// last `minutes`.
    fn has_recent_activity(&self, tenant_key: &str, minutes: i64) -> Result<bool, StorageError> {
        let cutoff = Utc::now() - chrono::Duration::minutes(minutes);
        Ok(self
            .all_jobs(tenant_key)?
            .iter()
            .any(|job| job.started_at.unwrap_or(job.created_at) >= cutoff))
    }

    /// Job records for a tenant exactly as stored, for migration.
    fn raw_jobs(&self, tenant_key: &str) -> Result<Vec<Value>, StorageError>;

    fn clear_jobs(&self, tenant_key: &str) -> Result<usize, StorageError>;

    /// Drops records older than `days_to_keep`. Stores that keep no
    /// history across runs have nothing to drop.
    fn cleanup_old_data(&self, _days_to_keep: i64) -> Result<CleanupReport, StorageError> {
        Ok(CleanupReport::default())
    }

    /// Folds lists filed under legacy tenant spellings into the canonical
    /// keys. Returns the number of lists merged.
    fn consolidate_tenant_keys(&self) -> Result<usize, StorageError> {
        Ok(0)
    }

    /// Cheap liveness check. Returns the approximate number of stored jobs.
    fn probe(&self) -> Result<usize, StorageError>;
}

impl JobBackend for SharedStorageBridge {
    fn name(&self) -> &'static str {
        "shared_storage"
    }

    fn add_job(&self, job: &Job) -> Result<(), StorageError> {
        SharedStorageBridge::add_job(self, job)
    }

    fn update_job(
        &self,
        job_id: &str,
        tenant_key: &str,
        update: &JobUpdate,
    ) -> Result<Option<Job>, StorageError> {
        SharedStorageBridge::update_job(self, job_id, tenant_key, update)
    }

    fn add_result(&self, result: &ProcessingResult) -> Result<(), StorageError> {
        SharedStorageBridge::add_result(self, result)
    }

    fn all_jobs(&self, tenant_key: &str) -> Result<Vec<Job>, StorageError> {
        self.get_all_jobs(tenant_key)
    }

    fn active_jobs(&self, tenant_key: &str) -> Result<Vec<Job>, StorageError> {
        self.get_active_jobs(tenant_key)
    }

    fn completed_jobs(&self, tenant_key: &str, limit: usize) -> Result<Vec<Job>, StorageError> {
        self.get_completed_jobs(tenant_key, limit)
    }

    fn recent_results(
        &self,
        tenant_key: &str,
        limit: usize,
    ) -> Result<Vec<ProcessingResult>, StorageError> {
        self.get_recent_results(tenant_key, limit)
    }

    fn processing_stats(&self, tenant_key: &str) -> Result<ProcessingStats, StorageError> {
        self.get_processing_stats(tenant_key)
    }

    fn has_recent_activity(&self, tenant_key: &str, minutes: i64) -> Result<bool, StorageError> {
        SharedStorageBridge::has_recent_activity(self, tenant_key, minutes)
    }

    fn raw_jobs(&self, tenant_key: &str) -> Result<Vec<Value>, StorageError> {
        self.get_raw_jobs(tenant_key)
    }

    fn clear_jobs(&self, tenant_key: &str) -> Result<usize, StorageError> {
        SharedStorageBridge::clear_jobs(self, tenant_key)
    }

    fn cleanup_old_data(&self, days_to_keep: i64) -> Result<CleanupReport, StorageError> {
        SharedStorageBridge::cleanup_old_data(self, days_to_keep)
    }

    fn consolidate_tenant_keys(&self) -> Result<usize, StorageError> {
        SharedStorageBridge::consolidate_tenant_keys(self)
    }

    fn probe(&self) -> Result<usize, StorageError> {
        self.job_count()
    }
}
