//! Test harness for isolated test execution.
//!
//! `TestHarness` owns a temp directory holding the mail spool, the export
//! directory, the shared storage directory and the config file, and wires
//! the storage, pipeline and service the way the binary does.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use tempfile::TempDir;

use loadrelay::config::{load_config, Config, TenantRegistry};
use loadrelay::storage::JobBackend;
use loadrelay::{
    BridgeOptions, LocalExportProcessor, MonitoringService, Pipeline, RetentionPolicy,
    ServiceContext, SessionStore, SharedStorageBridge, SpoolDirectorySource, StorageSettings,
    UnifiedStorage,
};

use super::builders::ConfigBuilder;

pub struct TestHarness {
    temp_dir: TempDir,
    pub spool_dir: PathBuf,
    pub output_dir: PathBuf,
    pub storage_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let spool_dir = base.join("spool");
        let output_dir = base.join("exports");
        let storage_dir = base.join("shared");

        std::fs::create_dir_all(&spool_dir).expect("Failed to create spool dir");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        Self {
            temp_dir,
            spool_dir,
            output_dir,
            storage_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Config builder pointing at this harness's directories.
    pub fn config_builder(&self) -> ConfigBuilder {
        ConfigBuilder::new(
            &self.spool_dir.to_string_lossy(),
            &self.output_dir.to_string_lossy(),
        )
        .storage_directory(&self.storage_dir.to_string_lossy())
    }

    /// Writes the config to disk and loads it back through the loader.
    pub fn load(&self, builder: &ConfigBuilder) -> Config {
        let path = self.temp_path().join("loadrelay.json");
        let json = serde_json::to_string_pretty(&builder.build()).expect("Failed to serialize config");
        std::fs::write(&path, json).expect("Failed to write config file");
        load_config(&path).expect("Config should load")
    }

    /// Drops a message into a tenant's spool directory.
    pub fn spool_message(&self, tenant_dir: &str, name: &str, message: &str) -> PathBuf {
        let dir = self.spool_dir.join(tenant_dir);
        std::fs::create_dir_all(&dir).expect("Failed to create tenant spool dir");
        let path = dir.join(name);
        std::fs::write(&path, message).expect("Failed to write message");
        path
    }

    pub fn bridge(&self) -> SharedStorageBridge {
        self.bridge_with(RetentionPolicy::default())
    }

    pub fn bridge_with(&self, retention: RetentionPolicy) -> SharedStorageBridge {
        SharedStorageBridge::open(
            &self.storage_dir,
            BridgeOptions {
                retention,
                lock_timeout: Duration::from_secs(2),
            },
        )
        .expect("Failed to open shared storage")
    }

    /// Unified storage over the shared bridge with a session fallback.
    pub fn storage(&self) -> Arc<UnifiedStorage> {
        let session: Arc<dyn JobBackend> = Arc::new(SessionStore::default());
        Arc::new(UnifiedStorage::new(
            Arc::new(self.bridge()),
            Some(session),
            StorageSettings::default(),
        ))
    }

    /// The full stack for a loaded config, reading and writing the shared
    /// storage directory.
    pub fn service(&self, config: &Config) -> (MonitoringService, Arc<UnifiedStorage>) {
        let storage = self.storage();
        let processor = LocalExportProcessor::new(config.output_dir())
            .with_required_columns(config.required_columns.clone());
        let pipeline = Arc::new(Pipeline::new(storage.clone(), Arc::new(processor)));
        let service = MonitoringService::new(ServiceContext {
            tenants: Arc::new(TenantRegistry::from_config(config)),
            attachments: Arc::new(SpoolDirectorySource::new(config.spool_dir())),
            pipeline,
            settings: config.service.settings(),
        });
        (service, storage)
    }

    /// Takes the exclusive advisory lock another process would hold while
    /// writing `file` in the storage directory. Released on drop.
    pub fn hold_storage_lock(&self, file: &str) -> std::fs::File {
        std::fs::create_dir_all(&self.storage_dir).expect("Failed to create storage dir");
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.storage_dir.join(format!("{file}.lock")))
            .expect("Failed to open lock file");
        FileExt::lock_exclusive(&lock).expect("Failed to take storage lock");
        lock
    }

    pub fn files_in(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}
