pub mod loader;
pub mod registry;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use registry::TenantRegistry;
pub use schema::{default_storage_dir, Config, ServiceConfig, StorageConfig, TenantConfig};
