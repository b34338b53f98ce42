//! Attachment discovery error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InboxError {
    /// The message could not be parsed as RFC 5322 mail.
    #[error("Failed to parse email '{origin}': {reason}")]
    ParseError { origin: String, reason: String },

    #[error("Failed to read spool directory '{path}': {source}")]
    SpoolDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid filename pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Discovery backend is not reachable (remote mailboxes).
    #[error("Attachment source unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, InboxError>;
