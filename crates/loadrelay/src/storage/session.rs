//! In-process job store used when shared storage is unavailable.
//!
//! Records are kept in the session-state shape (the canonical job dict) so
//! they can be migrated into shared storage verbatim once it recovers.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};

use super::backend::JobBackend;
use crate::bridge::RetentionPolicy;
use crate::error::StorageError;
use crate::model::{from_session_state_job, Job, JobUpdate, ProcessingResult};
use crate::tenant;

#[derive(Debug, Default)]
struct TenantSession {
    jobs: Vec<Map<String, Value>>,
    results: Vec<Map<String, Value>>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    tenants: RwLock<HashMap<String, TenantSession>>,
    retention: RetentionPolicy,
}

fn cap<T>(list: &mut Vec<T>, max: usize) {
    let excess = list.len().saturating_sub(max);
    if excess > 0 {
        list.drain(..excess);
    }
}

fn record_job_id(map: &Map<String, Value>) -> Option<&str> {
    map.get("job_id").and_then(Value::as_str)
}

impl SessionStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            retention,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TenantSession>> {
        match self.tenants.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Session store lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TenantSession>> {
        match self.tenants.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Session store lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Places raw records into a tenant's session, as an older UI session
    /// would have left them.
    pub fn import_records(&self, tenant_key: &str, records: Vec<Value>) {
        let mut tenants = self.write();
        let session = tenants.entry(tenant::storage_key(tenant_key)).or_default();
        for record in records {
            match record {
                Value::Object(map) => session.jobs.push(map),
                other => session.jobs.push(Map::from_iter([("raw".to_string(), other)])),
            }
        }
    }

    fn jobs_of(&self, tenant_key: &str) -> Vec<Job> {
        self.read()
            .get(&tenant::storage_key(tenant_key))
            .map(|session| {
                session
                    .jobs
                    .iter()
                    .map(|map| from_session_state_job(&Value::Object(map.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl JobBackend for SessionStore {
    fn name(&self) -> &'static str {
        "session_state"
    }

    fn add_job(&self, job: &Job) -> Result<(), StorageError> {
        let mut tenants = self.write();
        let session = tenants.entry(tenant::storage_key(&job.tenant_key)).or_default();
        session
            .jobs
            .retain(|existing| record_job_id(existing) != Some(job.job_id.as_str()));
        session.jobs.push(job.to_dict());
        cap(&mut session.jobs, self.retention.max_jobs_per_tenant);
        Ok(())
    }

    fn update_job(
        &self,
        job_id: &str,
        tenant_key: &str,
        update: &JobUpdate,
    ) -> Result<Option<Job>, StorageError> {
        let mut tenants = self.write();
        let Some(session) = tenants.get_mut(&tenant::storage_key(tenant_key)) else {
            return Ok(None);
        };
        let Some(record) = session
            .jobs
            .iter_mut()
            .find(|record| record_job_id(record) == Some(job_id))
        else {
            return Ok(None);
        };

        let mut job = from_session_state_job(&Value::Object(record.clone()));
        job.apply(update);
        record.extend(job.to_dict());
        Ok(Some(job))
    }

    fn add_result(&self, result: &ProcessingResult) -> Result<(), StorageError> {
        let mut tenants = self.write();
        let session = tenants.entry(tenant::storage_key(&result.tenant_key)).or_default();
        session.results.push(result.to_dict());
        cap(&mut session.results, self.retention.max_results_per_tenant);
        Ok(())
    }

    fn all_jobs(&self, tenant_key: &str) -> Result<Vec<Job>, StorageError> {
        Ok(self.jobs_of(tenant_key))
    }

    fn completed_jobs(&self, tenant_key: &str, limit: usize) -> Result<Vec<Job>, StorageError> {
        let mut jobs = self.jobs_of(tenant_key);
        jobs.retain(Job::is_terminal);
        jobs.sort_by_key(|job| std::cmp::Reverse(job.completed_at.unwrap_or(job.created_at)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    fn recent_results(
        &self,
        tenant_key: &str,
        limit: usize,
    ) -> Result<Vec<ProcessingResult>, StorageError> {
        let tenants = self.read();
        let mut results: Vec<ProcessingResult> = tenants
            .get(&tenant::storage_key(tenant_key))
            .map(|session| {
                session
                    .results
                    .iter()
                    .map(ProcessingResult::from_dict)
                    .collect()
            })
            .unwrap_or_default();
        results.sort_by_key(|r| std::cmp::Reverse(r.processed_at));
        results.truncate(limit);
        Ok(results)
    }

    fn raw_jobs(&self, tenant_key: &str) -> Result<Vec<Value>, StorageError> {
        Ok(self
            .read()
            .get(&tenant::storage_key(tenant_key))
            .map(|session| session.jobs.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default())
    }

    fn clear_jobs(&self, tenant_key: &str) -> Result<usize, StorageError> {
        let mut tenants = self.write();
        Ok(tenants
            .get_mut(&tenant::storage_key(tenant_key))
            .map(|session| std::mem::take(&mut session.jobs).len())
            .unwrap_or(0))
    }

    fn probe(&self) -> Result<usize, StorageError> {
        Ok(self.read().values().map(|session| session.jobs.len()).sum())
    }
}
