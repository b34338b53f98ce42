use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Whether a job in this status may move to `next`. Terminal states
    /// never change and nothing re-enters `pending`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (JobStatus::Pending, _) => true,
            (JobStatus::Processing, JobStatus::Pending) => false,
            (JobStatus::Processing, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == lowered)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// Named stage of the per-attachment pipeline, in processing order.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    #[default]
    Queued,
    ParsingEmail,
    AnalyzingData,
    ApplyingMappings,
    SubmittingApi,
    EnrichingData,
    GeneratingResults,
}

impl ProcessingStep {
    pub const ALL: [ProcessingStep; 7] = [
        ProcessingStep::Queued,
        ProcessingStep::ParsingEmail,
        ProcessingStep::AnalyzingData,
        ProcessingStep::ApplyingMappings,
        ProcessingStep::SubmittingApi,
        ProcessingStep::EnrichingData,
        ProcessingStep::GeneratingResults,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::Queued => "queued",
            ProcessingStep::ParsingEmail => "parsing_email",
            ProcessingStep::AnalyzingData => "analyzing_data",
            ProcessingStep::ApplyingMappings => "applying_mappings",
            ProcessingStep::SubmittingApi => "submitting_api",
            ProcessingStep::EnrichingData => "enriching_data",
            ProcessingStep::GeneratingResults => "generating_results",
        }
    }

    /// Position in the fixed stage order.
    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    /// Progress posted when a job enters this stage.
    pub fn entry_percent(&self) -> f64 {
        match self {
            ProcessingStep::Queued => 0.0,
            ProcessingStep::ParsingEmail => 10.0,
            ProcessingStep::AnalyzingData => 25.0,
            ProcessingStep::ApplyingMappings => 40.0,
            ProcessingStep::SubmittingApi => 60.0,
            ProcessingStep::EnrichingData => 75.0,
            ProcessingStep::GeneratingResults => 90.0,
        }
    }

    /// Human-readable label for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingStep::Queued => "Queued",
            ProcessingStep::ParsingEmail => "Parsing email attachment",
            ProcessingStep::AnalyzingData => "Analyzing data",
            ProcessingStep::ApplyingMappings => "Applying field mappings",
            ProcessingStep::SubmittingApi => "Submitting to API",
            ProcessingStep::EnrichingData => "Enriching data",
            ProcessingStep::GeneratingResults => "Generating results",
        }
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ProcessingStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        ProcessingStep::ALL
            .into_iter()
            .find(|step| step.as_str() == lowered)
            .ok_or_else(|| format!("unknown processing step '{}'", s))
    }
}

/// Coerces a free-form status string, falling back to `pending`.
pub fn parse_status(value: Option<&str>, job_id: &str) -> JobStatus {
    match value {
        None => JobStatus::Pending,
        Some(s) if s.trim().is_empty() => JobStatus::Pending,
        Some(s) => s.parse().unwrap_or_else(|_| {
            log::warn!(
                "Unknown job status '{}' for job {}, defaulting to pending",
                s,
                job_id
            );
            JobStatus::Pending
        }),
    }
}

/// Coerces a free-form step string, falling back to `queued`.
pub fn parse_step(value: Option<&str>, job_id: &str) -> ProcessingStep {
    match value {
        None => ProcessingStep::Queued,
        Some(s) if s.trim().is_empty() => ProcessingStep::Queued,
        Some(s) => s.parse().unwrap_or_else(|_| {
            log::warn!(
                "Unknown processing step '{}' for job {}, defaulting to queued",
                s,
                job_id
            );
            ProcessingStep::Queued
        }),
    }
}
