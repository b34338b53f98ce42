use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::{BridgeOptions, RetentionPolicy};
use crate::inbox::AttachmentFilter;
use crate::pipeline::ColumnMappings;
use crate::secrets::{expand_home, SecretSource};
use crate::service::ServiceSettings;
use crate::storage::StorageSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub spool_directory: String,
    pub output_directory: String,
    /// Columns every exported row must fill.
    #[serde(default)]
    pub required_columns: Vec<String>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

impl Config {
    pub fn spool_dir(&self) -> PathBuf {
        expand_home(&self.spool_directory)
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.output_directory)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Shared storage directory; `~/.loadrelay/shared` when unset.
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_max_jobs")]
    pub max_jobs_per_tenant: usize,
    #[serde(default = "default_max_results")]
    pub max_results_per_tenant: usize,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_seconds: u64,
    #[serde(default = "default_health_interval")]
    pub health_check_interval_seconds: u64,
    /// Keep jobs in process memory while shared storage is down.
    #[serde(default = "default_true")]
    pub session_fallback: bool,
}

fn default_max_jobs() -> usize {
    crate::bridge::DEFAULT_MAX_JOBS_PER_TENANT
}

fn default_max_results() -> usize {
    crate::bridge::DEFAULT_MAX_RESULTS_PER_TENANT
}

fn default_lock_timeout() -> u64 {
    5
}

fn default_health_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_jobs_per_tenant: default_max_jobs(),
            max_results_per_tenant: default_max_results(),
            lock_timeout_seconds: default_lock_timeout(),
            health_check_interval_seconds: default_health_interval(),
            session_fallback: true,
        }
    }
}

impl StorageConfig {
    pub fn directory(&self) -> PathBuf {
        match &self.directory {
            Some(dir) => expand_home(dir),
            None => default_storage_dir(),
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_jobs_per_tenant: self.max_jobs_per_tenant,
            max_results_per_tenant: self.max_results_per_tenant,
        }
    }

    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            retention: self.retention(),
            lock_timeout: Duration::from_secs(self.lock_timeout_seconds),
        }
    }

    pub fn settings(&self) -> StorageSettings {
        StorageSettings {
            health_check_interval: Duration::from_secs(self.health_check_interval_seconds),
        }
    }
}

pub fn default_storage_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".loadrelay")
        .join("shared")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_idle_delay")]
    pub idle_delay_seconds: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_check_interval")]
    pub default_check_interval_minutes: u64,
    #[serde(default = "default_join_timeout")]
    pub join_timeout_seconds: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_idle_delay() -> u64 {
    30
}

fn default_retry_delay() -> u64 {
    60
}

fn default_check_interval() -> u64 {
    5
}

fn default_join_timeout() -> u64 {
    10
}

fn default_retention_days() -> u32 {
    7
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            idle_delay_seconds: default_idle_delay(),
            retry_delay_seconds: default_retry_delay(),
            default_check_interval_minutes: default_check_interval(),
            join_timeout_seconds: default_join_timeout(),
            retention_days: default_retention_days(),
        }
    }
}

impl ServiceConfig {
    pub fn settings(&self) -> ServiceSettings {
        ServiceSettings {
            idle_delay: Duration::from_secs(self.idle_delay_seconds),
            retry_delay: Duration::from_secs(self.retry_delay_seconds),
            default_interval: Duration::from_secs(self.default_check_interval_minutes * 60),
            join_timeout: Duration::from_secs(self.join_timeout_seconds),
            retention_days: i64::from(self.retention_days),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub key: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Falls back to the service default when unset.
    #[serde(default)]
    pub check_interval_minutes: Option<u64>,
    #[serde(default)]
    pub filter: AttachmentFilter,
    #[serde(default)]
    pub column_mappings: ColumnMappings,
    #[serde(default)]
    pub credentials: Option<SecretSource>,
}

impl TenantConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            enabled: true,
            check_interval_minutes: None,
            filter: AttachmentFilter::default(),
            column_mappings: ColumnMappings::new(),
            credentials: None,
        }
    }
}
