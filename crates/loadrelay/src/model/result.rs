use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::fields::{format_timestamp, FieldReader};
use super::job::{Job, SCHEMA_VERSION};
use super::status::JobStatus;
use crate::tenant;

/// Overall outcome recorded on a processing result.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    #[default]
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::PartialSuccess => "partial_success",
            ResultStatus::Failed => "failed",
            ResultStatus::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" | "completed" => Some(ResultStatus::Success),
            "partial_success" | "partial" => Some(ResultStatus::PartialSuccess),
            "failed" | "error" => Some(ResultStatus::Failed),
            "cancelled" | "stopped" => Some(ResultStatus::Cancelled),
            _ => None,
        }
    }

    pub fn for_job(job: &Job) -> Self {
        match job.status {
            JobStatus::Failed => ResultStatus::Failed,
            JobStatus::Cancelled => ResultStatus::Cancelled,
            _ if job.failure_count > 0 && job.success_count > 0 => ResultStatus::PartialSuccess,
            _ if job.failure_count > 0 => ResultStatus::Failed,
            _ => ResultStatus::Success,
        }
    }
}

/// An artifact produced while processing a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputFile {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
}

/// Terminal summary of a job, retained after the job itself is pruned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub result_id: String,
    pub job_id: String,
    pub tenant_key: String,
    pub filename: String,
    pub email_source: String,
    pub subject: String,
    pub processed_at: DateTime<Utc>,
    pub records_processed: u64,
    pub records_successful: u64,
    pub records_failed: u64,
    pub processing_time_seconds: f64,
    pub output_files: Vec<OutputFile>,
    pub summary_data: Option<Value>,
    pub overall_status: ResultStatus,
    pub error_summary: String,
    pub warnings: Vec<String>,
    pub schema_version: String,
}

impl ProcessingResult {
    pub fn from_job(job: &Job, subject: impl Into<String>) -> Self {
        let processed_at = job.completed_at.unwrap_or_else(Utc::now);
        Self {
            result_id: format!("result_{}", job.job_id),
            job_id: job.job_id.clone(),
            tenant_key: job.tenant_key.clone(),
            filename: job.filename.clone(),
            email_source: job.email_source.clone(),
            subject: subject.into(),
            processed_at,
            records_processed: job.record_count,
            records_successful: job.success_count,
            records_failed: job.failure_count,
            processing_time_seconds: job.processing_time,
            output_files: Vec::new(),
            summary_data: job.result_data.clone(),
            overall_status: ResultStatus::for_job(job),
            error_summary: job.error_message.clone(),
            warnings: Vec::new(),
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }

    pub fn with_output_files(mut self, files: Vec<OutputFile>) -> Self {
        self.output_files = files;
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn success_rate(&self) -> f64 {
        if self.records_processed == 0 {
            0.0
        } else {
            self.records_successful as f64 / self.records_processed as f64 * 100.0
        }
    }

    pub fn to_dict(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("result_id".into(), Value::from(self.result_id.clone()));
        map.insert("job_id".into(), Value::from(self.job_id.clone()));
        map.insert("tenant_key".into(), Value::from(self.tenant_key.clone()));
        map.insert("filename".into(), Value::from(self.filename.clone()));
        map.insert("email_source".into(), Value::from(self.email_source.clone()));
        map.insert("subject".into(), Value::from(self.subject.clone()));
        map.insert(
            "processed_at".into(),
            Value::from(format_timestamp(&self.processed_at)),
        );
        map.insert("records_processed".into(), Value::from(self.records_processed));
        map.insert("records_successful".into(), Value::from(self.records_successful));
        map.insert("records_failed".into(), Value::from(self.records_failed));
        map.insert(
            "processing_time_seconds".into(),
            Value::from(self.processing_time_seconds),
        );
        let files = self
            .output_files
            .iter()
            .map(|f| {
                let mut entry = Map::new();
                entry.insert("type".into(), Value::from(f.kind.clone()));
                entry.insert("path".into(), Value::from(f.path.clone()));
                entry.insert("size".into(), Value::from(f.size));
                Value::Object(entry)
            })
            .collect();
        map.insert("output_files".into(), Value::Array(files));
        map.insert(
            "summary_data".into(),
            self.summary_data.clone().unwrap_or(Value::Null),
        );
        map.insert(
            "overall_status".into(),
            Value::from(self.overall_status.as_str()),
        );
        map.insert("error_summary".into(), Value::from(self.error_summary.clone()));
        map.insert(
            "warnings".into(),
            Value::Array(self.warnings.iter().cloned().map(Value::from).collect()),
        );
        map.insert(
            "schema_version".into(),
            Value::from(self.schema_version.clone()),
        );
        map
    }

    /// Lenient inverse of [`ProcessingResult::to_dict`]. Also reads the
    /// older result layout (`processed_time`, `record_count`, `success`).
    pub fn from_dict(map: &Map<String, Value>) -> Self {
        let r = FieldReader::new(map, "result_id");
        let job_id = r.string("job_id").unwrap_or_default();
        let filename = r.string_or("filename", "unknown");
        let processed_at = r
            .timestamp("processed_at")
            .or_else(|| r.timestamp("processed_time"))
            .unwrap_or_else(Utc::now);
        let result_id = r.string("result_id").filter(|s| !s.is_empty()).unwrap_or_else(|| {
            if job_id.is_empty() {
                format!("result_{}_{}", processed_at.timestamp(), filename)
            } else {
                format!("result_{}", job_id)
            }
        });

        let records_processed = r
            .u64("records_processed")
            .or_else(|| r.u64("record_count"))
            .unwrap_or(0);
        let overall_status = r
            .string("overall_status")
            .and_then(|s| {
                let parsed = ResultStatus::parse(&s);
                if parsed.is_none() {
                    log::warn!("Result {}: unknown status '{}'", result_id, s);
                }
                parsed
            })
            .or_else(|| {
                r.bool("success").map(|ok| {
                    if ok {
                        ResultStatus::Success
                    } else {
                        ResultStatus::Failed
                    }
                })
            })
            .unwrap_or_default();

        let output_files = r
            .array("output_files")
            .into_iter()
            .filter_map(|entry| match entry {
                Value::Object(obj) => {
                    let f = FieldReader::new(&obj, "path");
                    Some(OutputFile {
                        kind: f.string_or("type", "file"),
                        path: f.string("path").unwrap_or_default(),
                        size: f.u64("size").unwrap_or(0),
                    })
                }
                Value::String(path) => Some(OutputFile {
                    kind: "file".to_string(),
                    path,
                    size: 0,
                }),
                _ => None,
            })
            .collect();

        Self {
            result_id,
            job_id,
            tenant_key: r
                .string("tenant_key")
                .or_else(|| r.string("brokerage_key"))
                .map(|k| tenant::storage_key(&k))
                .unwrap_or_else(|| tenant::UNKNOWN_TENANT.to_string()),
            filename,
            email_source: r.string_or("email_source", "unknown"),
            subject: r.string("subject").unwrap_or_default(),
            processed_at,
            records_processed,
            records_successful: r.u64("records_successful").unwrap_or(0),
            records_failed: r.u64("records_failed").unwrap_or(0),
            processing_time_seconds: r.f64("processing_time_seconds").unwrap_or(0.0),
            output_files,
            summary_data: r.value("summary_data").or_else(|| r.value("result_summary")),
            overall_status,
            error_summary: r.string("error_summary").unwrap_or_default(),
            warnings: r.string_list("warnings"),
            schema_version: r.string_or("schema_version", SCHEMA_VERSION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProcessingStep;
    use serde_json::json;

    #[test]
    fn test_result_from_completed_job() {
        let mut job = Job::new("x.csv", "acme", "ops@acme.test");
        job.update_progress(60.0, ProcessingStep::SubmittingApi);
        job.mark_completed(9, 1, None);

        let result = ProcessingResult::from_job(&job, "Daily loads");
        assert_eq!(result.job_id, job.job_id);
        assert_eq!(result.records_processed, 10);
        assert_eq!(result.overall_status, ResultStatus::PartialSuccess);
        assert_eq!(result.processed_at, job.completed_at.unwrap());
        assert!((result.success_rate() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_result_dict_round_trip() {
        let mut job = Job::new("x.csv", "acme", "src");
        job.mark_failed("bad header", None);
        let result = ProcessingResult::from_job(&job, "subj")
            .with_output_files(vec![OutputFile {
                kind: "csv".into(),
                path: "/tmp/out.csv".into(),
                size: 12,
            }])
            .with_warnings(vec!["column 'ref' unmapped".into()]);

        assert_eq!(ProcessingResult::from_dict(&result.to_dict()), result);
        assert_eq!(result.overall_status, ResultStatus::Failed);
    }

    #[test]
    fn test_result_reads_older_layout() {
        let legacy = json!({
            "filename": "loads.xlsx",
            "brokerage_key": "Acme_Freight",
            "processed_time": "2024-01-02T03:04:05",
            "record_count": 12,
            "success": false,
            "download_links": ["ignored"],
        });
        let result = ProcessingResult::from_dict(legacy.as_object().unwrap());
        assert_eq!(result.tenant_key, "acme-freight");
        assert_eq!(result.records_processed, 12);
        assert_eq!(result.overall_status, ResultStatus::Failed);
        assert!(result.result_id.starts_with("result_"));
    }
}
