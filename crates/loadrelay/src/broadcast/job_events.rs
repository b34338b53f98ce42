//! In-process job event stream for readers sharing the worker's process.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{Job, JobStatus, ProcessingResult, ProcessingStep, ResultStatus};

/// What happened to a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Created,
    Progress,
    Completed,
    Failed,
    Cancelled,
    ResultRecorded,
}

impl JobEventKind {
    fn for_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending | JobStatus::Processing => JobEventKind::Progress,
            JobStatus::Completed => JobEventKind::Completed,
            JobStatus::Failed => JobEventKind::Failed,
            JobStatus::Cancelled => JobEventKind::Cancelled,
        }
    }
}

/// A job change as seen by subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job_id: String,
    pub tenant_key: String,
    pub filename: String,
    pub status: JobStatus,
    pub step: ProcessingStep,
    pub progress_percent: f64,
    pub timestamp: DateTime<Utc>,
    /// Error message (failed and cancelled jobs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Outcome (result events only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ResultStatus>,
}

impl JobEvent {
    fn from_job(kind: JobEventKind, job: &Job) -> Self {
        Self {
            kind,
            job_id: job.job_id.clone(),
            tenant_key: job.tenant_key.clone(),
            filename: job.filename.clone(),
            status: job.status,
            step: job.current_step,
            progress_percent: job.progress_percent,
            timestamp: Utc::now(),
            error: (!job.error_message.is_empty()).then(|| job.error_message.clone()),
            outcome: None,
        }
    }

    pub fn created(job: &Job) -> Self {
        Self::from_job(JobEventKind::Created, job)
    }

    /// Event describing the job's state after an update.
    pub fn updated(job: &Job) -> Self {
        Self::from_job(JobEventKind::for_status(job.status), job)
    }

    pub fn result_recorded(result: &ProcessingResult) -> Self {
        Self {
            kind: JobEventKind::ResultRecorded,
            job_id: result.job_id.clone(),
            tenant_key: result.tenant_key.clone(),
            filename: result.filename.clone(),
            status: match result.overall_status {
                ResultStatus::Failed => JobStatus::Failed,
                ResultStatus::Cancelled => JobStatus::Cancelled,
                _ => JobStatus::Completed,
            },
            step: ProcessingStep::GeneratingResults,
            progress_percent: 100.0,
            timestamp: Utc::now(),
            error: (!result.error_summary.is_empty()).then(|| result.error_summary.clone()),
            outcome: Some(result.overall_status),
        }
    }
}

/// Broadcasts job events to any number of subscribers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

impl std::fmt::Debug for JobEventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEventBroadcaster")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
