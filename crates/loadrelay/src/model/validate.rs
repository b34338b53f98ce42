//! Validation and repair of raw job records before they enter the model.

use chrono::Utc;
use serde_json::{Map, Value};

use super::fields::{format_timestamp, parse_timestamp};
use super::job::{generate_job_id, Job};
use super::status::{JobStatus, ProcessingStep};
use crate::tenant::{self, UNKNOWN_TENANT};

const COUNT_FIELDS: [&str; 4] = ["record_count", "success_count", "failure_count", "file_size"];
const OPTIONAL_TIMESTAMPS: [&str; 2] = ["started_at", "completed_at"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordProblem {
    #[error("record is not an object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid status '{0}'")]
    InvalidStatus(String),

    #[error("invalid step '{0}'")]
    InvalidStep(String),

    #[error("progress {0} outside 0..=100")]
    ProgressOutOfRange(f64),

    #[error("field '{0}' is not a non-negative count")]
    InvalidCount(&'static str),

    #[error("field '{field}' has invalid timestamp '{value}'")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("tenant key '{0}' is not canonical")]
    NonCanonicalTenant(String),
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    map.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn tenant_of(map: &Map<String, Value>) -> Option<&str> {
    non_empty_str(map, "tenant_key").or_else(|| non_empty_str(map, "brokerage_key"))
}

fn bad_timestamp(map: &Map<String, Value>, field: &str) -> Option<String> {
    match map.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) if parse_timestamp(s).is_some() => None,
        Some(other) => Some(match other {
            Value::String(s) => s.clone(),
            v => v.to_string(),
        }),
    }
}

/// Lists everything wrong with a raw job record.
pub fn validate_job_record(record: &Value) -> Vec<RecordProblem> {
    let Some(map) = record.as_object() else {
        return vec![RecordProblem::NotAnObject];
    };
    let mut problems = Vec::new();

    if non_empty_str(map, "job_id").is_none() {
        problems.push(RecordProblem::MissingField("job_id"));
    }
    if non_empty_str(map, "filename").is_none() {
        problems.push(RecordProblem::MissingField("filename"));
    }
    match tenant_of(map) {
        None => problems.push(RecordProblem::MissingField("tenant_key")),
        Some(key) if !tenant::is_canonical(key) => {
            problems.push(RecordProblem::NonCanonicalTenant(key.to_string()))
        }
        Some(_) => {}
    }

    if let Some(status) = map.get("status").and_then(Value::as_str) {
        if status.parse::<JobStatus>().is_err() {
            problems.push(RecordProblem::InvalidStatus(status.to_string()));
        }
    }
    if let Some(step) = map.get("current_step").and_then(Value::as_str) {
        if step.parse::<ProcessingStep>().is_err() {
            problems.push(RecordProblem::InvalidStep(step.to_string()));
        }
    }
    if let Some(progress) = map.get("progress_percent").and_then(Value::as_f64) {
        if !(0.0..=100.0).contains(&progress) {
            problems.push(RecordProblem::ProgressOutOfRange(progress));
        }
    }
    for field in COUNT_FIELDS {
        if let Some(value) = map.get(field) {
            if !value.is_null() && value.as_u64().is_none() {
                problems.push(RecordProblem::InvalidCount(field));
            }
        }
    }
    if let Some(value) = bad_timestamp(map, "created_at") {
        problems.push(RecordProblem::InvalidTimestamp {
            field: "created_at",
            value,
        });
    }
    for field in OPTIONAL_TIMESTAMPS {
        if let Some(value) = bad_timestamp(map, field) {
            problems.push(RecordProblem::InvalidTimestamp { field, value });
        }
    }
    problems
}

/// Returns a copy of the record with every problem reported by
/// [`validate_job_record`] fixed.
pub fn repair_job_record(record: &Value) -> Map<String, Value> {
    let mut map = record.as_object().cloned().unwrap_or_default();

    let tenant_key = tenant::storage_key(tenant_of(&map).unwrap_or(UNKNOWN_TENANT));
    map.remove("brokerage_key");
    map.insert("tenant_key".into(), Value::from(tenant_key.clone()));

    if non_empty_str(&map, "filename").is_none() {
        map.insert("filename".into(), Value::from("unknown"));
    }
    if non_empty_str(&map, "job_id").is_none() {
        let filename = non_empty_str(&map, "filename").unwrap_or("unknown").to_string();
        map.insert(
            "job_id".into(),
            Value::from(generate_job_id(&tenant_key, &filename)),
        );
    }

    let status_ok = map
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s.parse::<JobStatus>().is_ok());
    if !status_ok {
        map.insert("status".into(), Value::from(JobStatus::Pending.as_str()));
    }
    let step_ok = map
        .get("current_step")
        .and_then(Value::as_str)
        .is_some_and(|s| s.parse::<ProcessingStep>().is_ok());
    if !step_ok {
        map.insert(
            "current_step".into(),
            Value::from(ProcessingStep::Queued.as_str()),
        );
    }

    let progress = map
        .get("progress_percent")
        .and_then(Value::as_f64)
        .filter(|p| p.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);
    map.insert("progress_percent".into(), Value::from(progress));

    for field in COUNT_FIELDS {
        let count = map.get(field).and_then(Value::as_u64).unwrap_or(0);
        map.insert(field.into(), Value::from(count));
    }

    if bad_timestamp(&map, "created_at").is_some() || !map.contains_key("created_at") {
        map.insert("created_at".into(), Value::from(format_timestamp(&Utc::now())));
    }
    for field in OPTIONAL_TIMESTAMPS {
        if bad_timestamp(&map, field).is_some() {
            map.insert(field.into(), Value::Null);
        }
    }
    map
}

/// Builds a job from a raw record, repairing it first if needed.
pub fn create_job(record: &Value) -> Job {
    let problems = validate_job_record(record);
    if problems.is_empty() {
        if let Some(map) = record.as_object() {
            return Job::from_dict(map);
        }
    }
    let summary: Vec<String> = problems.iter().map(ToString::to_string).collect();
    log::info!("Repairing job record: {}", summary.join("; "));
    Job::from_dict(&repair_job_record(record))
}
