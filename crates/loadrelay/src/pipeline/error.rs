use std::fmt;

use thiserror::Error;

use super::processor::ProcessorError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unsupported attachment type '{mime_type}' for '{filename}'")]
    UnsupportedFormat { filename: String, mime_type: String },

    #[error("Failed to parse '{filename}': {reason}")]
    Parse { filename: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("'{0}' contains no records")]
    EmptyFile(String),

    #[error("Credentials unavailable: {0}")]
    Credentials(#[from] crate::secrets::SecretError),

    #[error("Load processor failed: {0}")]
    Processor(#[from] ProcessorError),
}

impl PipelineError {
    /// Short machine-readable tag stored with failed jobs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedFormat { .. } => "unsupported_format",
            PipelineError::Parse { .. } | PipelineError::Csv(_) | PipelineError::Json(_) => {
                "parse_error"
            }
            PipelineError::EmptyFile(_) => "empty_file",
            PipelineError::Credentials(_) => "credentials",
            PipelineError::Processor(_) => "processor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    /// A saved mapping names a column the file does not have.
    UnmatchedMapping { source: String },
    /// A mapping target collides with a column already present.
    DuplicateColumn { column: String },
    Processor(String),
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::UnmatchedMapping { source } => {
                write!(f, "Mapped column '{}' not found in file", source)
            }
            PipelineWarning::DuplicateColumn { column } => {
                write!(f, "Mapping would duplicate column '{}', skipped", column)
            }
            PipelineWarning::Processor(message) => f.write_str(message),
        }
    }
}
