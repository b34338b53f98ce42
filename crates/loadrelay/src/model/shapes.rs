//! Conversions between the canonical [`Job`] and the three record shapes
//! still in circulation.
//!
//! Every `from_*` converter is total: missing fields are defaulted, bad enum
//! and timestamp strings are logged and defaulted, and a record that is not
//! a JSON object at all comes back as [`Job::conversion_error`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::fields::{format_timestamp, FieldReader};
use super::job::{generate_job_id, Job, SCHEMA_VERSION};
use super::status::{parse_status, parse_step};
use crate::tenant;

/// Record shape written by the background service into shared storage.
/// Status, step and timestamps are free-form strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedJobRecord {
    pub job_id: String,
    pub filename: String,
    pub tenant_key: String,
    pub email_source: String,
    pub status: String,
    pub current_step: String,
    pub progress_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub file_size: u64,
    pub mime_type: String,
    pub record_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub processing_time: f64,
    pub error_message: String,
    pub error_details: Option<Value>,
    pub result_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

impl SharedJobRecord {
    /// Field-by-field read of a stored record.
    pub fn read(value: &Value) -> Result<Self, String> {
        let map = value
            .as_object()
            .ok_or_else(|| format!("expected an object, found {}", json_kind(value)))?;
        let r = FieldReader::new(map, "job_id");
        Ok(Self {
            job_id: r.string("job_id").unwrap_or_default(),
            filename: r.string_or("filename", "unknown"),
            tenant_key: r
                .string("tenant_key")
                .or_else(|| r.string("brokerage_key"))
                .unwrap_or_default(),
            email_source: r.string_or("email_source", "unknown"),
            status: r.string("status").unwrap_or_default(),
            current_step: r.string("current_step").unwrap_or_default(),
            progress_percent: r.f64("progress_percent").unwrap_or(0.0),
            created_at: r.string("created_at"),
            started_at: r.string("started_at"),
            completed_at: r.string("completed_at"),
            file_size: r.u64("file_size").unwrap_or(0),
            mime_type: r.string("mime_type").unwrap_or_default(),
            record_count: r.u64("record_count").unwrap_or(0),
            success_count: r.u64("success_count").unwrap_or(0),
            failure_count: r.u64("failure_count").unwrap_or(0),
            processing_time: r.f64("processing_time").unwrap_or(0.0),
            error_message: r.string("error_message").unwrap_or_default(),
            error_details: r.value("error_details"),
            result_data: r.value("result_data"),
            schema_version: r.string("schema_version"),
        })
    }

    /// Flat JSON object with the record's fields.
    pub fn to_value(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("job_id".into(), Value::from(self.job_id.clone()));
        map.insert("filename".into(), Value::from(self.filename.clone()));
        map.insert("tenant_key".into(), Value::from(self.tenant_key.clone()));
        map.insert("email_source".into(), Value::from(self.email_source.clone()));
        map.insert("status".into(), Value::from(self.status.clone()));
        map.insert("current_step".into(), Value::from(self.current_step.clone()));
        map.insert("progress_percent".into(), Value::from(self.progress_percent));
        if let Some(created) = &self.created_at {
            map.insert("created_at".into(), Value::from(created.clone()));
        }
        map.insert("started_at".into(), opt_string(&self.started_at));
        map.insert("completed_at".into(), opt_string(&self.completed_at));
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
        if let Some(version) = &self.schema_version {
            map.insert("schema_version".into(), Value::from(version.clone()));
        }
        map
    }

    /// Converts to the canonical job, coercing strings into enums and
    /// timestamps. `started_at` stands in for a missing `created_at`.
    pub fn to_job(&self) -> Job {
        let tenant_key = tenant::storage_key(&self.tenant_key);
        let job_id = if self.job_id.is_empty() {
            generate_job_id(&tenant_key, &self.filename)
        } else {
            self.job_id.clone()
        };
        let started_at = parse_field(&job_id, "started_at", self.started_at.as_deref());
        let created_at = parse_field(&job_id, "created_at", self.created_at.as_deref())
            .or(started_at)
            .unwrap_or_else(Utc::now);

        Job {
            job_id: job_id.clone(),
            tenant_key,
            filename: non_empty_or(&self.filename, "unknown"),
            email_source: non_empty_or(&self.email_source, "unknown"),
            status: parse_status(Some(&self.status), &job_id),
            current_step: parse_step(Some(&self.current_step), &job_id),
            progress_percent: if self.progress_percent.is_nan() {
                0.0
            } else {
                self.progress_percent.clamp(0.0, 100.0)
            },
            created_at,
            started_at,
            completed_at: parse_field(&job_id, "completed_at", self.completed_at.as_deref()),
            file_size: self.file_size,
            mime_type: self.mime_type.clone(),
            record_count: self.record_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            processing_time: self.processing_time.max(0.0),
            error_message: self.error_message.clone(),
            error_details: self.error_details.clone(),
            result_data: self.result_data.clone(),
            schema_version: self
                .schema_version
                .clone()
                .unwrap_or_else(|| SCHEMA_VERSION.to_string()),
        }
    }
}

/// Record shape used by the dashboard. Adds `file_size` (0 when unknown) and
/// has no separate creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardJob {
    pub job_id: String,
    pub filename: String,
    pub tenant_key: String,
    pub email_source: String,
    pub file_size: u64,
    pub record_count: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_step: String,
    pub progress_percent: f64,
    pub status: String,
    pub error_message: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub processing_time: f64,
    pub result_data: Option<Value>,
}

impl DashboardJob {
    pub fn read(value: &Value) -> Result<Self, String> {
        let map = value
            .as_object()
            .ok_or_else(|| format!("expected an object, found {}", json_kind(value)))?;
        let r = FieldReader::new(map, "job_id");
        Ok(Self {
            job_id: r.string("job_id").unwrap_or_default(),
            filename: r.string_or("filename", "unknown"),
            tenant_key: r
                .string("tenant_key")
                .or_else(|| r.string("brokerage_key"))
                .unwrap_or_default(),
            email_source: r.string_or("email_source", "unknown"),
            file_size: r.u64("file_size").unwrap_or(0),
            record_count: r.u64("record_count").unwrap_or(0),
            created_at: r.timestamp("created_at"),
            started_at: r.timestamp("started_at"),
            completed_at: r.timestamp("completed_at"),
            current_step: r.string("current_step").unwrap_or_default(),
            progress_percent: r.f64("progress_percent").unwrap_or(0.0),
            status: r.string("status").unwrap_or_default(),
            error_message: r.string("error_message").unwrap_or_default(),
            success_count: r.u64("success_count").unwrap_or(0),
            failure_count: r.u64("failure_count").unwrap_or(0),
            processing_time: r.f64("processing_time").unwrap_or(0.0),
            result_data: r.value("result_data"),
        })
    }

    pub fn to_job(&self) -> Job {
        let shared = SharedJobRecord {
            job_id: self.job_id.clone(),
            filename: self.filename.clone(),
            tenant_key: self.tenant_key.clone(),
            email_source: self.email_source.clone(),
            status: self.status.clone(),
            current_step: self.current_step.clone(),
            progress_percent: self.progress_percent,
            created_at: self.created_at.as_ref().map(format_timestamp),
            started_at: self.started_at.as_ref().map(format_timestamp),
            completed_at: self.completed_at.as_ref().map(format_timestamp),
            file_size: self.file_size,
            mime_type: String::new(),
            record_count: self.record_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            processing_time: self.processing_time,
            error_message: self.error_message.clone(),
            error_details: None,
            result_data: self.result_data.clone(),
            schema_version: None,
        };
        shared.to_job()
    }
}

/// Which producer a raw record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    SharedStorage,
    SessionState,
    Dashboard,
}

impl SourceFormat {
    /// Guesses the producer from the fields present.
    pub fn detect(record: &Value) -> Self {
        match record.as_object() {
            Some(map) if map.contains_key("schema_version") && map.contains_key("created_at") => {
                SourceFormat::SessionState
            }
            Some(map) if map.contains_key("file_size") && !map.contains_key("created_at") => {
                SourceFormat::Dashboard
            }
            _ => SourceFormat::SharedStorage,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn non_empty_or(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn opt_string(value: &Option<String>) -> Value {
    value.clone().map(Value::from).unwrap_or(Value::Null)
}

fn parse_field(job_id: &str, field: &str, value: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = value.filter(|s| !s.trim().is_empty())?;
    let parsed = super::fields::parse_timestamp(raw);
    if parsed.is_none() {
        log::warn!(
            "Job {}: invalid timestamp '{}' in field '{}'",
            job_id,
            raw,
            field
        );
    }
    parsed
}

pub fn from_shared_storage_job(record: &Value) -> Job {
    match SharedJobRecord::read(record) {
        Ok(shared) => shared.to_job(),
        Err(problem) => {
            log::error!("Unreadable shared storage job: {}", problem);
            Job::conversion_error(problem)
        }
    }
}

pub fn to_shared_storage_job(job: &Job) -> SharedJobRecord {
    SharedJobRecord {
        job_id: job.job_id.clone(),
        filename: job.filename.clone(),
        tenant_key: job.tenant_key.clone(),
        email_source: job.email_source.clone(),
        status: job.status.as_str().to_string(),
        current_step: job.current_step.as_str().to_string(),
        progress_percent: job.progress_percent,
        created_at: Some(format_timestamp(&job.created_at)),
        started_at: job.started_at.as_ref().map(format_timestamp),
        completed_at: job.completed_at.as_ref().map(format_timestamp),
        file_size: job.file_size,
        mime_type: job.mime_type.clone(),
        record_count: job.record_count,
        success_count: job.success_count,
        failure_count: job.failure_count,
        processing_time: job.processing_time,
        error_message: job.error_message.clone(),
        error_details: job.error_details.clone(),
        result_data: job.result_data.clone(),
        schema_version: Some(job.schema_version.clone()),
    }
}

pub fn from_session_state_job(record: &Value) -> Job {
    match record.as_object() {
        Some(map) => Job::from_dict(map),
        None => {
            let problem = format!("expected an object, found {}", json_kind(record));
            log::error!("Unreadable session job: {}", problem);
            Job::conversion_error(problem)
        }
    }
}

pub fn to_session_state_job(job: &Job) -> Value {
    Value::Object(job.to_dict())
}

pub fn from_dashboard_job(record: &Value) -> Job {
    match DashboardJob::read(record) {
        Ok(dashboard) => dashboard.to_job(),
        Err(problem) => {
            log::error!("Unreadable dashboard job: {}", problem);
            Job::conversion_error(problem)
        }
    }
}

pub fn to_dashboard_job(job: &Job) -> DashboardJob {
    DashboardJob {
        job_id: job.job_id.clone(),
        filename: job.filename.clone(),
        tenant_key: job.tenant_key.clone(),
        email_source: job.email_source.clone(),
        file_size: job.file_size,
        record_count: job.record_count,
        created_at: Some(job.created_at),
        started_at: job.started_at,
        completed_at: job.completed_at,
        current_step: job.current_step.as_str().to_string(),
        progress_percent: job.progress_percent,
        status: job.status.as_str().to_string(),
        error_message: job.error_message.clone(),
        success_count: job.success_count,
        failure_count: job.failure_count,
        processing_time: job.processing_time,
        result_data: job.result_data.clone(),
    }
}

/// Converts a record from any producer.
pub fn convert_any(record: &Value, format: Option<SourceFormat>) -> Job {
    match format.unwrap_or_else(|| SourceFormat::detect(record)) {
        SourceFormat::SharedStorage => from_shared_storage_job(record),
        SourceFormat::SessionState => from_session_state_job(record),
        SourceFormat::Dashboard => from_dashboard_job(record),
    }
}

/// Canonical job as a shared storage object, for writers that merge onto an
/// existing record.
pub(crate) fn shared_fields(job: &Job) -> Map<String, Value> {
    to_shared_storage_job(job).to_value()
}
