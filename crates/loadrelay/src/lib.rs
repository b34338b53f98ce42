pub mod bridge;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod inbox;
pub mod model;
pub mod pipeline;
pub mod secrets;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod tenant;

pub use bridge::{BridgeOptions, RetentionPolicy, SharedStorageBridge};
pub use broadcast::{JobEvent, JobEventBroadcaster, JobEventKind};
pub use config::{load_config, Config, TenantConfig, TenantRegistry};
pub use error::{ConfigError, LoadRelayError, Result, ServiceError, StorageError};
pub use inbox::{Attachment, AttachmentFilter, AttachmentSource, EmailParser, SpoolDirectorySource};
pub use model::{Job, JobStatus, JobUpdate, ProcessingResult, ProcessingStats, ProcessingStep};
pub use pipeline::{LoadProcessor, LocalExportProcessor, Pipeline, PipelineConfig};
pub use secrets::{SecretError, SecretSource};
pub use service::{MonitoringService, ServiceContext, ServiceSettings, TenantConfigSource};
pub use storage::{SessionStore, StorageSettings, UnifiedStorage};
pub use telemetry::{init_tracing, LogFormat};
