use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::job::Job;
use super::status::JobStatus;

/// Per-tenant job counts, derived by scanning the job list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Jobs completed on the current UTC calendar day.
    pub completed_today: usize,
}

impl ProcessingStats {
    pub fn from_jobs<'a, I>(jobs: I) -> Self
    where
        I: IntoIterator<Item = &'a Job>,
    {
        Self::from_jobs_on(jobs, Utc::now().date_naive())
    }

    pub fn from_jobs_on<'a, I>(jobs: I, today: NaiveDate) -> Self
    where
        I: IntoIterator<Item = &'a Job>,
    {
        let mut stats = Self::default();
        for job in jobs {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => {
                    stats.completed += 1;
                    if job.completed_at.is_some_and(|at| at.date_naive() == today) {
                        stats.completed_today += 1;
                    }
                }
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    pub fn active(&self) -> usize {
        self.pending + self.processing
    }
}
