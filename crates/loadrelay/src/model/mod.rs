//! Canonical job/result model and conversions from the legacy record shapes.

mod fields;
pub mod job;
pub mod result;
pub mod shapes;
pub mod stats;
pub mod status;
pub mod validate;

pub use fields::{format_timestamp, parse_timestamp};
pub use job::{generate_job_id, Job, JobUpdate, SCHEMA_VERSION};
pub use result::{OutputFile, ProcessingResult, ResultStatus};
pub use shapes::{
    convert_any, from_dashboard_job, from_session_state_job, from_shared_storage_job,
    to_dashboard_job, to_session_state_job, to_shared_storage_job, DashboardJob,
    SharedJobRecord, SourceFormat,
};
pub use stats::ProcessingStats;
pub use status::{JobStatus, ProcessingStep};
pub use validate::{create_job, repair_job_record, validate_job_record, RecordProblem};
