//! File-backed job and result store shared between the background worker
//! and any number of readers in other processes.
//!
//! Layout under the storage directory:
//!
//! - `email_jobs.json`: tenant key → list of job records, oldest first
//! - `email_results.json`: tenant key → list of result records, oldest first
//! - `processing_metadata.json`: house-keeping (schema version, last cleanup)
//!
//! Every call takes the file lock for exactly one read or one
//! read-modify-write. Missing or corrupt files read as empty tables.

mod file;
mod lock;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StorageError;
use crate::model::shapes::shared_fields;
use crate::model::{
    from_shared_storage_job, parse_timestamp, Job, JobUpdate, ProcessingResult, ProcessingStats,
    SCHEMA_VERSION,
};
use crate::tenant;

use file::JsonFile;

pub const JOBS_FILE: &str = "email_jobs.json";
pub const RESULTS_FILE: &str = "email_results.json";
pub const METADATA_FILE: &str = "processing_metadata.json";

pub const DEFAULT_MAX_JOBS_PER_TENANT: usize = 20;
pub const DEFAULT_MAX_RESULTS_PER_TENANT: usize = 50;

/// Tenant key → records, oldest first.
type Table = BTreeMap<String, Vec<Value>>;

/// How many records are kept per tenant. Older entries are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_jobs_per_tenant: usize,
    pub max_results_per_tenant: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_jobs_per_tenant: DEFAULT_MAX_JOBS_PER_TENANT,
            max_results_per_tenant: DEFAULT_MAX_RESULTS_PER_TENANT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub retention: RetentionPolicy,
    /// How long a call waits for a contended file lock before failing.
    pub lock_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Contents of `processing_metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageMetadata {
    pub schema_version: String,
    pub created_at: Option<DateTime<Utc>>,
    pub last_cleanup_at: Option<DateTime<Utc>>,
    pub last_cleanup_removed: usize,
    pub last_writer_pid: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub jobs_removed: usize,
    pub results_removed: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.jobs_removed + self.results_removed
    }
}

pub struct SharedStorageBridge {
    dir: PathBuf,
    jobs: JsonFile,
    results: JsonFile,
    metadata: JsonFile,
    retention: RetentionPolicy,
}

impl std::fmt::Debug for SharedStorageBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStorageBridge")
            .field("dir", &self.dir)
            .field("retention", &self.retention)
            .finish()
    }
}

fn table_from(value: Option<Value>, path: &Path) -> Table {
    let Some(value) = value else {
        return Table::new();
    };
    let Value::Object(map) = value else {
        log::warn!("Storage file {} is not an object; treating as empty", path.display());
        return Table::new();
    };
    map.into_iter()
        .filter_map(|(key, records)| match records {
            Value::Array(list) => Some((key, list)),
            other => {
                log::warn!(
                    "Storage file {}: entry '{}' is not a list ({}); skipping",
                    path.display(),
                    key,
                    other
                );
                None
            }
        })
        .collect()
}

fn table_to_value(table: Table) -> Value {
    Value::Object(
        table
            .into_iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(key, records)| (key, Value::Array(records)))
            .collect(),
    )
}

/// Records stored for `tenant_key`, including lists still filed under a
/// legacy spelling of the key.
fn tenant_records<'a>(table: &'a Table, tenant_key: &str) -> Vec<&'a Value> {
    let canonical = tenant::storage_key(tenant_key);
    let spellings = tenant::variants(&canonical);
    table
        .iter()
        .filter(|(key, _)| {
            **key == canonical || spellings.contains(key) || tenant::normalize(key) == canonical
        })
        .flat_map(|(_, list)| list.iter())
        .collect()
}

/// Reads a stored job. Records without a tenant of their own take the key
/// they are filed under.
fn job_from_record(record: &Value, canonical: &str) -> Job {
    let mut job = from_shared_storage_job(record);
    if job.tenant_key == tenant::UNKNOWN_TENANT {
        job.tenant_key = canonical.to_string();
    }
    job
}

/// The canonical list for `tenant_key`, folding legacy-keyed lists into it.
fn tenant_list_mut<'a>(table: &'a mut Table, tenant_key: &str) -> &'a mut Vec<Value> {
    let canonical = tenant::storage_key(tenant_key);
    tenant::consolidate_with(table, &canonical, merge_lists);
    table.entry(canonical).or_default()
}

fn merge_lists(mut kept: Vec<Value>, other: Vec<Value>) -> Vec<Value> {
    kept.extend(other);
    kept.sort_by_key(record_time);
    kept
}

fn job_id_of(record: &Value) -> Option<&str> {
    record.get("job_id").and_then(Value::as_str)
}

/// Timestamp for ordering and age checks: the first of start, creation or
/// processing time that the record has. `None` when that field does not
/// parse; later fields are not consulted.
fn record_time(record: &Value) -> Option<DateTime<Utc>> {
    ["started_at", "created_at", "processed_at", "processed_time"]
        .iter()
        .find_map(|field| record.get(*field).filter(|v| !v.is_null()))
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
}

fn truncate_oldest(list: &mut Vec<Value>, cap: usize) -> usize {
    let excess = list.len().saturating_sub(cap);
    if excess > 0 {
        list.drain(..excess);
    }
    excess
}

fn completion_order(job: &Job) -> DateTime<Utc> {
    job.completed_at.or(job.started_at).unwrap_or(job.created_at)
}

impl SharedStorageBridge {
    /// Opens (and if needed initializes) the store under `dir`.
    pub fn open(dir: impl Into<PathBuf>, options: BridgeOptions) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;

        let bridge = Self {
            jobs: JsonFile::new(dir.join(JOBS_FILE), options.lock_timeout),
            results: JsonFile::new(dir.join(RESULTS_FILE), options.lock_timeout),
            metadata: JsonFile::new(dir.join(METADATA_FILE), options.lock_timeout),
            retention: options.retention,
            dir,
        };
        bridge.update_metadata(|_| {})?;
        log::debug!("Shared storage opened at {}", bridge.dir.display());
        Ok(bridge)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    fn read_table(&self, file: &JsonFile) -> Result<Table, StorageError> {
        Ok(table_from(file.read()?, file.path()))
    }

    fn update_table<R>(
        &self,
        file: &JsonFile,
        f: impl FnOnce(&mut Table) -> R,
    ) -> Result<R, StorageError> {
        file.update(|current| {
            let mut table = table_from(current, file.path());
            let result = f(&mut table);
            (table_to_value(table), result)
        })
    }

    fn tenant_jobs(&self, tenant_key: &str) -> Result<Vec<Job>, StorageError> {
        let table = self.read_table(&self.jobs)?;
        let canonical = tenant::storage_key(tenant_key);
        Ok(tenant_records(&table, &canonical)
            .into_iter()
            .map(|record| job_from_record(record, &canonical))
            .collect())
    }

    /// Appends a job, replacing any record with the same id, and drops the
    /// oldest jobs beyond the retention cap.
    pub fn add_job(&self, job: &Job) -> Result<(), StorageError> {
        let cap = self.retention.max_jobs_per_tenant;
        let record = Value::Object(shared_fields(job));
        let dropped = self.update_table(&self.jobs, |table| {
            let list = tenant_list_mut(table, &job.tenant_key);
            list.retain(|existing| job_id_of(existing) != Some(job.job_id.as_str()));
            list.push(record);
            truncate_oldest(list, cap)
        })?;
        if dropped > 0 {
            log::debug!(
                "Pruned {} old jobs for tenant {}",
                dropped,
                job.tenant_key
            );
        }
        Ok(())
    }

    /// Merges `update` into the stored job inside one exclusive lock.
    /// Returns the updated job, or `None` (with a warning) if it is unknown.
    pub fn update_job(
        &self,
        job_id: &str,
        tenant_key: &str,
        update: &JobUpdate,
    ) -> Result<Option<Job>, StorageError> {
        let canonical = tenant::storage_key(tenant_key);
        let updated = self.update_table(&self.jobs, |table| {
            let list = tenant_list_mut(table, &canonical);
            let record = list
                .iter_mut()
                .find(|record| job_id_of(record) == Some(job_id))?;

            let mut job = job_from_record(record, &canonical);
            job.apply(update);
            let fields = shared_fields(&job);
            match record {
                Value::Object(existing) => existing.extend(fields),
                other => *other = Value::Object(fields),
            }
            Some(job)
        })?;

        if updated.is_none() {
            log::warn!(
                "Job {} not found for tenant {}; update ignored",
                job_id, canonical
            );
        }
        Ok(updated)
    }

    /// Removes one job. Returns whether it existed.
    pub fn remove_job(&self, job_id: &str, tenant_key: &str) -> Result<bool, StorageError> {
        self.update_table(&self.jobs, |table| {
            let list = tenant_list_mut(table, tenant_key);
            let before = list.len();
            list.retain(|record| job_id_of(record) != Some(job_id));
            before != list.len()
        })
    }

    /// Removes every job of a tenant. Returns how many were removed.
    pub fn clear_jobs(&self, tenant_key: &str) -> Result<usize, StorageError> {
        self.update_table(&self.jobs, |table| {
            let list = tenant_list_mut(table, tenant_key);
            let removed = list.len();
            list.clear();
            removed
        })
    }

    pub fn add_result(&self, result: &ProcessingResult) -> Result<(), StorageError> {
        let cap = self.retention.max_results_per_tenant;
        let record = Value::Object(result.to_dict());
        self.update_table(&self.results, |table| {
            let list = tenant_list_mut(table, &result.tenant_key);
            list.push(record);
            truncate_oldest(list, cap);
        })
    }

    pub fn get_all_jobs(&self, tenant_key: &str) -> Result<Vec<Job>, StorageError> {
        self.tenant_jobs(tenant_key)
    }

    /// Stored job records for a tenant, unconverted.
    pub fn get_raw_jobs(&self, tenant_key: &str) -> Result<Vec<Value>, StorageError> {
        let table = self.read_table(&self.jobs)?;
        Ok(tenant_records(&table, tenant_key).into_iter().cloned().collect())
    }

    pub fn get_active_jobs(&self, tenant_key: &str) -> Result<Vec<Job>, StorageError> {
        let mut jobs = self.tenant_jobs(tenant_key)?;
        jobs.retain(Job::is_active);
        Ok(jobs)
    }

    /// Terminal jobs, most recently completed first.
    pub fn get_completed_jobs(
        &self,
        tenant_key: &str,
        limit: usize,
    ) -> Result<Vec<Job>, StorageError> {
        let mut jobs = self.tenant_jobs(tenant_key)?;
        jobs.retain(Job::is_terminal);
        jobs.sort_by_key(|job| std::cmp::Reverse(completion_order(job)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Results, most recent first.
    pub fn get_recent_results(
        &self,
        tenant_key: &str,
        limit: usize,
    ) -> Result<Vec<ProcessingResult>, StorageError> {
        let table = self.read_table(&self.results)?;
        let mut results: Vec<ProcessingResult> = tenant_records(&table, tenant_key)
            .into_iter()
            .filter_map(|record| match record.as_object() {
                Some(map) => Some(ProcessingResult::from_dict(map)),
                None => {
                    log::warn!("Skipping unreadable result record: {}", record);
                    None
                }
            })
            .collect();
        results.sort_by_key(|r| std::cmp::Reverse(r.processed_at));
        results.truncate(limit);
        Ok(results)
    }

    pub fn get_processing_stats(&self, tenant_key: &str) -> Result<ProcessingStats, StorageError> {
        let jobs = self.tenant_jobs(tenant_key)?;
        Ok(ProcessingStats::from_jobs(&jobs))
    }

    /// Whether any job of the tenant started within the last `minutes`.
    pub fn has_recent_activity(&self, tenant_key: &str, minutes: i64) -> Result<bool, StorageError> {
        let cutoff = Utc::now() - chrono::Duration::minutes(minutes);
        let jobs = self.tenant_jobs(tenant_key)?;
        Ok(jobs
            .iter()
            .any(|job| job.started_at.unwrap_or(job.created_at) >= cutoff))
    }

    /// Drops jobs and results older than `days_to_keep`. Records whose
    /// timestamp cannot be read are kept.
    pub fn cleanup_old_data(&self, days_to_keep: i64) -> Result<CleanupReport, StorageError> {
        let cutoff = Utc::now() - chrono::Duration::days(days_to_keep);
        let keep = |record: &Value| record_time(record).map_or(true, |at| at >= cutoff);
        let prune = |table: &mut Table| {
            let mut removed = 0;
            for list in table.values_mut() {
                let before = list.len();
                list.retain(keep);
                removed += before - list.len();
            }
            removed
        };

        let report = CleanupReport {
            jobs_removed: self.update_table(&self.jobs, prune)?,
            results_removed: self.update_table(&self.results, prune)?,
        };
        self.update_metadata(|meta| {
            meta.last_cleanup_at = Some(Utc::now());
            meta.last_cleanup_removed = report.total();
        })?;
        if report.total() > 0 {
            log::info!(
                "Cleaned up {} jobs and {} results older than {} days",
                report.jobs_removed,
                report.results_removed,
                days_to_keep
            );
        }
        Ok(report)
    }

    /// Folds lists filed under legacy tenant spellings into the canonical
    /// keys. Returns the number of lists merged.
    pub fn consolidate_tenant_keys(&self) -> Result<usize, StorageError> {
        let jobs_cap = self.retention.max_jobs_per_tenant;
        let results_cap = self.retention.max_results_per_tenant;
        let merge = |table: &mut Table, cap: usize| {
            let merged = tenant::consolidate_all_with(table, merge_lists);
            for list in table.values_mut() {
                truncate_oldest(list, cap);
            }
            merged
        };
        let jobs = self.update_table(&self.jobs, |t| merge(t, jobs_cap))?;
        let results = self.update_table(&self.results, |t| merge(t, results_cap))?;
        Ok(jobs + results)
    }

    /// Tenant keys present in the jobs table, as stored.
    pub fn tenant_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.read_table(&self.jobs)?.into_keys().collect())
    }

    /// Total number of stored jobs across tenants.
    pub fn job_count(&self) -> Result<usize, StorageError> {
        Ok(self.read_table(&self.jobs)?.values().map(Vec::len).sum())
    }

    pub fn metadata(&self) -> Result<StorageMetadata, StorageError> {
        Ok(Self::metadata_from(self.metadata.read()?))
    }

    fn metadata_from(value: Option<Value>) -> StorageMetadata {
        value
            .and_then(|v| match serde_json::from_value(v) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    log::warn!("Unreadable storage metadata: {}", e);
                    None
                }
            })
            .unwrap_or_default()
    }

    fn update_metadata(&self, f: impl FnOnce(&mut StorageMetadata)) -> Result<(), StorageError> {
        self.metadata.update(|current| {
            let mut meta = Self::metadata_from(current);
            if meta.schema_version.is_empty() {
                meta.schema_version = SCHEMA_VERSION.to_string();
            }
            if meta.created_at.is_none() {
                meta.created_at = Some(Utc::now());
            }
            meta.last_writer_pid = Some(std::process::id());
            f(&mut meta);
            let value = serde_json::to_value(&meta)
                .unwrap_or_else(|_| Value::Object(Map::new()));
            (value, ())
        })
    }
}
