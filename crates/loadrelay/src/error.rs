use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadRelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Inbox error: {0}")]
    Inbox(#[from] crate::inbox::InboxError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid pattern '{pattern}' for tenant '{tenant}': {reason}")]
    InvalidPattern {
        tenant: String,
        pattern: String,
        reason: String,
    },

    #[error("Duplicate tenant '{tenant}' (normalizes to '{canonical}')")]
    DuplicateTenant { tenant: String, canonical: String },
}

/// Failures of a job backend. The unified storage layer turns these into
/// health flags; they never reach readers of job data.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to acquire lock on '{path}': {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize table: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to spawn monitoring worker: {0}")]
    SpawnFailed(String),

    #[error("Tenant configuration source failed: {0}")]
    TenantSource(String),

    #[error("Attachment discovery failed for '{tenant}': {source}")]
    Discovery {
        tenant: String,
        #[source]
        source: crate::inbox::InboxError,
    },
}

pub type Result<T> = std::result::Result<T, LoadRelayError>;
