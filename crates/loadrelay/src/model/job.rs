//! Canonical job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::fields::{format_timestamp, timestamp_value, FieldReader};
use super::status::{parse_status, parse_step, JobStatus, ProcessingStep};
use crate::tenant;

pub const SCHEMA_VERSION: &str = "1.0";
const JOB_ID_PREFIX_LEN: usize = 50;

/// Builds a job id from tenant, time and filename. The random suffix keeps
/// ids unique when the same file arrives twice within one second.
pub fn generate_job_id(tenant_key: &str, filename: &str) -> String {
    let safe_name: String = filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let mut prefix = format!("{}_{}_{}", tenant_key, Utc::now().timestamp(), safe_name);
    if let Some((idx, _)) = prefix.char_indices().nth(JOB_ID_PREFIX_LEN) {
        prefix.truncate(idx);
    }
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// One file being processed for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub tenant_key: String,
    pub filename: String,
    pub email_source: String,
    pub status: JobStatus,
    pub current_step: ProcessingStep,
    pub progress_percent: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub file_size: u64,
    pub mime_type: String,
    pub record_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Seconds between start (or creation) and completion.
    pub processing_time: f64,
    pub error_message: String,
    pub error_details: Option<Value>,
    pub result_data: Option<Value>,
    pub schema_version: String,
}

/// Partial update merged into a job in one step.
///
/// Lifecycle rules are enforced on merge: terminal jobs keep their status,
/// steps only move forward and progress never drops unless the job fails or
/// is cancelled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub current_step: Option<ProcessingStep>,
    pub progress_percent: Option<f64>,
    pub record_count: Option<u64>,
    pub success_count: Option<u64>,
    pub failure_count: Option<u64>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub result_data: Option<Value>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entering a pipeline stage: processing status, the stage, its percent.
    pub fn stage(step: ProcessingStep, percent: f64) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            current_step: Some(step),
            progress_percent: Some(percent),
            ..Self::default()
        }
    }

    pub fn completed(success_count: u64, failure_count: u64) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress_percent: Some(100.0),
            success_count: Some(success_count),
            failure_count: Some(failure_count),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Cancelled),
            error_message: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn step(mut self, step: ProcessingStep) -> Self {
        self.current_step = Some(step);
        self
    }

    pub fn progress(mut self, percent: f64) -> Self {
        self.progress_percent = Some(percent);
        self
    }

    pub fn records(mut self, record_count: u64) -> Self {
        self.record_count = Some(record_count);
        self
    }

    pub fn file_info(mut self, size: u64, mime_type: impl Into<String>) -> Self {
        self.file_size = Some(size);
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn error_details(mut self, details: Value) -> Self {
        self.error_details = Some(details);
        self
    }

    pub fn result_data(mut self, data: Value) -> Self {
        self.result_data = Some(data);
        self
    }
}

impl Job {
    pub fn new(
        filename: impl Into<String>,
        tenant_key: &str,
        email_source: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        let tenant_key = tenant::storage_key(tenant_key);
        Self {
            job_id: generate_job_id(&tenant_key, &filename),
            tenant_key,
            filename,
            email_source: email_source.into(),
            status: JobStatus::Pending,
            current_step: ProcessingStep::Queued,
            progress_percent: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            file_size: 0,
            mime_type: String::new(),
            record_count: 0,
            success_count: 0,
            failure_count: 0,
            processing_time: 0.0,
            error_message: String::new(),
            error_details: None,
            result_data: None,
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }

    pub fn with_file_info(mut self, size: u64, mime_type: impl Into<String>) -> Self {
        self.file_size = size;
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_record_count(mut self, record_count: u64) -> Self {
        self.record_count = record_count;
        self
    }

    /// Placeholder returned when a record could not be read at all.
    pub fn conversion_error(problem: impl Into<String>) -> Self {
        let mut job = Job::new("unknown", "", "unknown");
        job.job_id = format!("conversion_error_{}", &Uuid::new_v4().simple().to_string()[..8]);
        job.status = JobStatus::Failed;
        job.error_message = format!("Conversion error: {}", problem.into());
        job
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Elapsed processing time; running jobs are measured up to now.
    pub fn duration_seconds(&self) -> Option<f64> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }

    pub fn update_progress(&mut self, percent: f64, step: ProcessingStep) {
        self.apply(&JobUpdate::new().step(step).progress(percent));
    }

    pub fn mark_completed(&mut self, success_count: u64, failure_count: u64, result_data: Option<Value>) {
        let mut update = JobUpdate::completed(success_count, failure_count);
        update.result_data = result_data;
        self.apply(&update);
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, details: Option<Value>) {
        let mut update = JobUpdate::failed(message);
        update.error_details = details;
        self.apply(&update);
    }

    pub fn mark_cancelled(&mut self, reason: impl Into<String>) {
        self.apply(&JobUpdate::cancelled(reason));
    }

    pub fn apply(&mut self, update: &JobUpdate) {
        self.apply_at(update, Utc::now());
    }

    /// Merges `update` as of `now`.
    pub fn apply_at(&mut self, update: &JobUpdate, now: DateTime<Utc>) {
        let previous = self.status;
        let mut next = update.status.unwrap_or(previous);

        // Advancing past the queue implies the job has started.
        let advancing = update
            .current_step
            .is_some_and(|step| step > ProcessingStep::Queued)
            || update.progress_percent.is_some_and(|p| p > 0.0);
        if update.status.is_none() && previous == JobStatus::Pending && advancing {
            next = JobStatus::Processing;
        }

        if !previous.can_transition_to(next) {
            log::warn!(
                "Job {}: ignoring status change {} -> {}",
                self.job_id,
                previous,
                next
            );
            next = previous;
        }

        if !previous.is_terminal() {
            if let Some(step) = update.current_step {
                if step >= self.current_step {
                    self.current_step = step;
                } else {
                    log::debug!(
                        "Job {}: ignoring backward step {} -> {}",
                        self.job_id,
                        self.current_step.as_str(),
                        step.as_str()
                    );
                }
            }
            if let Some(percent) = update.progress_percent {
                let percent = clamp_percent(percent);
                let may_drop = matches!(next, JobStatus::Failed | JobStatus::Cancelled);
                if percent >= self.progress_percent || may_drop {
                    self.progress_percent = percent;
                }
            }
        }

        if next != previous {
            self.status = next;
            if next == JobStatus::Processing && self.started_at.is_none() {
                self.started_at = Some(now);
            }
            if next.is_terminal() {
                self.enter_terminal(now);
            }
        }

        if let Some(v) = update.record_count {
            self.record_count = v;
        }
        if let Some(v) = update.success_count {
            self.success_count = v;
        }
        if let Some(v) = update.failure_count {
            self.failure_count = v;
        }
        if let Some(v) = update.file_size {
            self.file_size = v;
        }
        if let Some(v) = &update.mime_type {
            self.mime_type = v.clone();
        }
        if let Some(v) = &update.error_message {
            self.error_message = v.clone();
        }
        if let Some(v) = &update.error_details {
            self.error_details = Some(v.clone());
        }
        if let Some(v) = &update.result_data {
            self.result_data = Some(v.clone());
        }
        if self.status == JobStatus::Completed && self.record_count == 0 {
            self.record_count = self.success_count.saturating_add(self.failure_count);
        }
    }

    fn enter_terminal(&mut self, now: DateTime<Utc>) {
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        if self.status == JobStatus::Completed {
            self.progress_percent = 100.0;
        }
        let start = self.started_at.unwrap_or(self.created_at);
        if let Some(end) = self.completed_at {
            let micros = (end - start).num_microseconds().unwrap_or(0).max(0);
            self.processing_time = micros as f64 / 1_000_000.0;
        }
    }

    /// Plain record with enums as their string tags and datetimes as
    /// ISO-8601 strings.
    pub fn to_dict(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("job_id".into(), Value::from(self.job_id.clone()));
        map.insert("tenant_key".into(), Value::from(self.tenant_key.clone()));
        map.insert("filename".into(), Value::from(self.filename.clone()));
        map.insert("email_source".into(), Value::from(self.email_source.clone()));
        map.insert("status".into(), Value::from(self.status.as_str()));
        map.insert("current_step".into(), Value::from(self.current_step.as_str()));
        map.insert("progress_percent".into(), Value::from(self.progress_percent));
        map.insert(
            "created_at".into(),
            Value::from(format_timestamp(&self.created_at)),
        );
        map.insert("started_at".into(), timestamp_value(self.started_at.as_ref()));
        map.insert(
            "completed_at".into(),
            timestamp_value(self.completed_at.as_ref()),
        );
        map.insert("file_size".into(), Value::from(self.file_size));
        map.insert("mime_type".into(), Value::from(self.mime_type.clone()));
        map.insert("record_count".into(), Value::from(self.record_count));
        map.insert("success_count".into(), Value::from(self.success_count));
        map.insert("failure_count".into(), Value::from(self.failure_count));
        map.insert("processing_time".into(), Value::from(self.processing_time));
        map.insert("error_message".into(), Value::from(self.error_message.clone()));
        map.insert(
            "error_details".into(),
            self.error_details.clone().unwrap_or(Value::Null),
        );
        map.insert(
            "result_data".into(),
            self.result_data.clone().unwrap_or(Value::Null),
        );
        map.insert(
            "schema_version".into(),
            Value::from(self.schema_version.clone()),
        );
        map
    }

    /// Builds a job from a plain record, defaulting anything missing or
    /// malformed. Never fails.
    pub fn from_dict(map: &Map<String, Value>) -> Self {
        let r = FieldReader::new(map, "job_id");
        let tenant_key = r
            .string("tenant_key")
            .or_else(|| r.string("brokerage_key"))
            .map(|k| tenant::storage_key(&k))
            .unwrap_or_else(|| tenant::UNKNOWN_TENANT.to_string());
        let filename = r.string_or("filename", "unknown");
        let job_id = r
            .string("job_id")
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| generate_job_id(&tenant_key, &filename));

        let status = parse_status(r.string("status").as_deref(), &job_id);
        let current_step = parse_step(r.string("current_step").as_deref(), &job_id);
        let started_at = r.timestamp("started_at");
        let created_at = r
            .timestamp("created_at")
            .or(started_at)
            .unwrap_or_else(Utc::now);

        Self {
            job_id,
            tenant_key,
            filename,
            email_source: r.string_or("email_source", "unknown"),
            status,
            current_step,
            progress_percent: clamp_percent(r.f64("progress_percent").unwrap_or(0.0)),
            created_at,
            started_at,
            completed_at: r.timestamp("completed_at"),
            file_size: r.u64("file_size").unwrap_or(0),
            mime_type: r.string("mime_type").unwrap_or_default(),
            record_count: r.u64("record_count").unwrap_or(0),
            success_count: r.u64("success_count").unwrap_or(0),
            failure_count: r.u64("failure_count").unwrap_or(0),
            processing_time: r.f64("processing_time").unwrap_or(0.0).max(0.0),
            error_message: r.string("error_message").unwrap_or_default(),
            error_details: r.value("error_details"),
            result_data: r.value("result_data"),
            schema_version: r.string_or("schema_version", SCHEMA_VERSION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_job_defaults() {
        let job = Job::new("loads.csv", "Acme_Freight", "ops@acme.test");
        assert_eq!(job.tenant_key, "acme-freight");
        assert!(job.job_id.starts_with("acme-freight_"));
        assert!(job.job_id.contains("loads_csv"));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.current_step, ProcessingStep::Queued);
        assert!(job.is_active());
        assert!(job.started_at.is_none());
        assert_eq!(job.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_job_ids_unique_for_same_file() {
        let a = generate_job_id("acme", "x.csv");
        let b = generate_job_id("acme", "x.csv");
        assert_ne!(a, b);
    }

    #[test]
    fn test_job_id_prefix_truncated() {
        let id = generate_job_id("acme", &"a".repeat(200));
        assert_eq!(id.len(), JOB_ID_PREFIX_LEN + 9);
    }

    #[test]
    fn test_progress_starts_job() {
        let mut job = Job::new("x.csv", "acme", "src");
        job.update_progress(10.0, ProcessingStep::ParsingEmail);
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());
        assert_eq!(job.progress_percent, 10.0);
    }

    #[test]
    fn test_progress_never_moves_backward() {
        let mut job = Job::new("x.csv", "acme", "src");
        job.update_progress(40.0, ProcessingStep::ApplyingMappings);
        job.update_progress(25.0, ProcessingStep::AnalyzingData);
        assert_eq!(job.progress_percent, 40.0);
        assert_eq!(job.current_step, ProcessingStep::ApplyingMappings);

        job.update_progress(250.0, ProcessingStep::SubmittingApi);
        assert_eq!(job.progress_percent, 100.0);
    }

    #[test]
    fn test_mark_completed_stamps_time() {
        let mut job = Job::new("x.csv", "acme", "src");
        let start = Utc::now() - chrono::Duration::seconds(3);
        job.apply_at(&JobUpdate::stage(ProcessingStep::ParsingEmail, 10.0), start);
        job.mark_completed(9, 1, Some(json!({"preview": []})));

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100.0);
        assert_eq!(job.record_count, 10);
        assert!(job.completed_at.is_some());
        assert!(job.processing_time >= 3.0);
        assert!(job.duration_seconds().unwrap() >= 3.0);
    }

    #[test]
    fn test_record_count_saturates_on_huge_counts() {
        let mut job = Job::new("x.csv", "acme", "src");
        job.apply(&JobUpdate::completed(u64::MAX, 5));
        assert_eq!(job.record_count, u64::MAX);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut job = Job::new("x.csv", "acme", "src");
        job.mark_failed("parse error", Some(json!({"line": 3})));
        let completed_at = job.completed_at;

        job.apply(&JobUpdate::stage(ProcessingStep::SubmittingApi, 60.0));
        job.mark_completed(1, 0, None);

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.current_step, ProcessingStep::Queued);
        assert_eq!(job.completed_at, completed_at);
        assert_eq!(job.error_message, "parse error");
    }

    #[test]
    fn test_failure_may_lower_progress() {
        let mut job = Job::new("x.csv", "acme", "src");
        job.update_progress(60.0, ProcessingStep::SubmittingApi);
        job.apply(&JobUpdate::failed("rejected").progress(0.0));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress_percent, 0.0);
    }

    #[test]
    fn test_dict_round_trip() {
        let mut job = Job::new("x.csv", "acme", "src").with_file_info(2048, "text/csv");
        job.update_progress(40.0, ProcessingStep::ApplyingMappings);
        job.mark_completed(3, 1, Some(json!({"rows": [1, 2]})));

        let first = Job::from_dict(&job.to_dict());
        let second = Job::from_dict(&first.to_dict());
        assert_eq!(first, second);
        assert_eq!(first, job);
    }

    #[test]
    fn test_from_dict_tolerates_garbage() {
        let record = json!({
            "status": "exploded",
            "current_step": 7,
            "progress_percent": "lots",
            "created_at": "not a date",
            "completed_at": "also not",
            "record_count": -4,
            "brokerage_key": "Blue Line",
        });
        let job = Job::from_dict(record.as_object().unwrap());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.current_step, ProcessingStep::Queued);
        assert_eq!(job.progress_percent, 0.0);
        assert!(job.completed_at.is_none());
        assert_eq!(job.record_count, 0);
        assert_eq!(job.tenant_key, "blue-line");
        assert!(!job.job_id.is_empty());
    }
}
