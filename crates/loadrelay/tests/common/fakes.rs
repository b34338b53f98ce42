//! Storage backends with scripted behavior.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use loadrelay::model::{Job, JobUpdate, ProcessingResult};
use loadrelay::storage::{JobBackend, SessionStore};
use loadrelay::StorageError;

/// Fails every call while `down` is set; otherwise serves from memory.
#[derive(Default)]
pub struct SwitchableBackend {
    inner: SessionStore,
    down: AtomicBool,
}

impl SwitchableBackend {
    pub fn down() -> Self {
        let backend = Self::default();
        backend.set_down(true);
        backend
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("backend switched off".into()))
        } else {
            Ok(())
        }
    }
}

impl JobBackend for SwitchableBackend {
    fn name(&self) -> &'static str {
        "switchable"
    }

    fn add_job(&self, job: &Job) -> Result<(), StorageError> {
        self.check()?;
        self.inner.add_job(job)
    }

    fn update_job(
        &self,
        job_id: &str,
        tenant_key: &str,
        update: &JobUpdate,
    ) -> Result<Option<Job>, StorageError> {
        self.check()?;
        self.inner.update_job(job_id, tenant_key, update)
    }

    fn add_result(&self, result: &ProcessingResult) -> Result<(), StorageError> {
        self.check()?;
        self.inner.add_result(result)
    }

    fn all_jobs(&self, tenant_key: &str) -> Result<Vec<Job>, StorageError> {
        self.check()?;
        self.inner.all_jobs(tenant_key)
    }

    fn completed_jobs(&self, tenant_key: &str, limit: usize) -> Result<Vec<Job>, StorageError> {
        self.check()?;
        self.inner.completed_jobs(tenant_key, limit)
    }

    fn recent_results(
        &self,
        tenant_key: &str,
        limit: usize,
    ) -> Result<Vec<ProcessingResult>, StorageError> {
        self.check()?;
        self.inner.recent_results(tenant_key, limit)
    }

    fn raw_jobs(&self, tenant_key: &str) -> Result<Vec<Value>, StorageError> {
        self.check()?;
        self.inner.raw_jobs(tenant_key)
    }

    fn clear_jobs(&self, tenant_key: &str) -> Result<usize, StorageError> {
        self.check()?;
        self.inner.clear_jobs(tenant_key)
    }

    fn probe(&self) -> Result<usize, StorageError> {
        self.check()?;
        self.inner.probe()
    }
}

/// Records every update it is asked to apply, in order.
#[derive(Default)]
pub struct RecordingBackend {
    inner: SessionStore,
    pub updates: Mutex<Vec<JobUpdate>>,
    /// Job state after each applied update.
    pub snapshots: Mutex<Vec<Job>>,
}

impl JobBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn add_job(&self, job: &Job) -> Result<(), StorageError> {
        self.inner.add_job(job)
    }

    fn update_job(
        &self,
        job_id: &str,
        tenant_key: &str,
        update: &JobUpdate,
    ) -> Result<Option<Job>, StorageError> {
        self.updates.lock().unwrap().push(update.clone());
        let updated = self.inner.update_job(job_id, tenant_key, update)?;
        if let Some(job) = &updated {
            self.snapshots.lock().unwrap().push(job.clone());
        }
        Ok(updated)
    }

    fn add_result(&self, result: &ProcessingResult) -> Result<(), StorageError> {
        self.inner.add_result(result)
    }

    fn all_jobs(&self, tenant_key: &str) -> Result<Vec<Job>, StorageError> {
        self.inner.all_jobs(tenant_key)
    }

    fn completed_jobs(&self, tenant_key: &str, limit: usize) -> Result<Vec<Job>, StorageError> {
        self.inner.completed_jobs(tenant_key, limit)
    }

    fn recent_results(
        &self,
        tenant_key: &str,
        limit: usize,
    ) -> Result<Vec<ProcessingResult>, StorageError> {
        self.inner.recent_results(tenant_key, limit)
    }

    fn raw_jobs(&self, tenant_key: &str) -> Result<Vec<Value>, StorageError> {
        self.inner.raw_jobs(tenant_key)
    }

    fn clear_jobs(&self, tenant_key: &str) -> Result<usize, StorageError> {
        self.inner.clear_jobs(tenant_key)
    }

    fn probe(&self) -> Result<usize, StorageError> {
        self.inner.probe()
    }
}
