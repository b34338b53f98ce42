use std::sync::Arc;

use tracing::warn;

use crate::model::{Job, JobUpdate, ProcessingResult, ProcessingStep};
use crate::storage::UnifiedStorage;

/// Events emitted by the pipeline while it processes one attachment.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Stage {
        step: ProcessingStep,
        message: String,
    },
    Records {
        count: u64,
    },
    Completed {
        update: JobUpdate,
        result: ProcessingResult,
    },
    Failed {
        step: ProcessingStep,
        update: JobUpdate,
        result: ProcessingResult,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes pipeline progress through to unified storage so readers in other
/// processes can follow the job.
pub struct StorageProgress {
    storage: Arc<UnifiedStorage>,
    job_id: String,
    tenant_key: String,
}

impl StorageProgress {
    pub fn new(storage: Arc<UnifiedStorage>, job: &Job) -> Self {
        Self {
            storage,
            job_id: job.job_id.clone(),
            tenant_key: job.tenant_key.clone(),
        }
    }

    fn update(&self, update: &JobUpdate, what: &str) {
        if !self.storage.update_job(&self.job_id, &self.tenant_key, update) {
            warn!("Job {} not updated ({})", self.job_id, what);
        }
    }

    fn finish(&self, update: &JobUpdate, result: &ProcessingResult) {
        self.update(update, "final status");
        if !self.storage.add_result(result) {
            warn!("Result for job {} was not recorded", self.job_id);
        }
    }
}

impl ProgressReporter for StorageProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage { step, .. } => {
                self.update(&JobUpdate::stage(step, step.entry_percent()), step.as_str());
            }
            ProgressEvent::Records { count } => {
                self.update(&JobUpdate::new().records(count), "record count");
            }
            ProgressEvent::Completed { update, result } => self.finish(&update, &result),
            ProgressEvent::Failed { update, result, .. } => self.finish(&update, &result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;
    use crate::storage::{SessionStore, StorageSettings};

    #[test]
    fn test_storage_progress_writes_through() {
        let storage = Arc::new(UnifiedStorage::new(
            Arc::new(SessionStore::default()),
            None,
            StorageSettings::default(),
        ));
        let job = storage
            .create_job("loads.csv", "Acme", "ops@acme.test", 10, "text/csv")
            .unwrap();
        let progress = StorageProgress::new(storage.clone(), &job);

        progress.report(ProgressEvent::Stage {
            step: ProcessingStep::AnalyzingData,
            message: String::new(),
        });
        progress.report(ProgressEvent::Records { count: 3 });

        let active = storage.get_active_jobs("acme");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, JobStatus::Processing);
        assert_eq!(active[0].current_step, ProcessingStep::AnalyzingData);
        assert_eq!(active[0].progress_percent, 25.0);
        assert_eq!(active[0].record_count, 3);

        let mut finished = active[0].clone();
        let update = JobUpdate::completed(3, 0);
        finished.apply(&update);
        progress.report(ProgressEvent::Completed {
            update,
            result: ProcessingResult::from_job(&finished, "loads"),
        });

        assert!(storage.get_active_jobs("acme").is_empty());
        assert_eq!(storage.get_completed_jobs("acme", 10).len(), 1);
        assert_eq!(storage.get_recent_results("acme", 10).len(), 1);
    }
}
