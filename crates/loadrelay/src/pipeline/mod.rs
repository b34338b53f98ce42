//! Processing pipeline: drives one attachment through
//! parse → analyze → map → submit → enrich → export, posting stage progress.

pub mod config;
pub mod context;
pub mod error;
pub mod mapping;
pub mod processor;
pub mod progress;
pub mod runner;
pub mod tabular;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::{PipelineError, PipelineWarning};
pub use mapping::{apply_mappings, ColumnMappings, MappingReport};
pub use processor::{
    LoadProcessor, LocalExportProcessor, ProcessRequest, ProcessSummary, ProcessorError,
    ProcessorPhase,
};
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter, StorageProgress};
pub use runner::Pipeline;
pub use tabular::{DataFormat, TabularData};
