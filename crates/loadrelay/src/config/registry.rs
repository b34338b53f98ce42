//! Config-backed tenant registry with in-memory monitor state.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::schema::{Config, TenantConfig};
use crate::error::ServiceError;
use crate::service::{MonitorStatus, TenantConfigSource, TenantProfile};
use crate::tenant;

#[derive(Debug, Clone)]
struct Entry {
    config: TenantConfig,
    last_check: Option<DateTime<Utc>>,
    status: MonitorStatus,
}

/// Tenants keyed by normalized key.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    default_interval_minutes: u64,
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl TenantRegistry {
    pub fn new(tenants: Vec<TenantConfig>, default_interval_minutes: u64) -> Self {
        let registry = Self {
            default_interval_minutes,
            entries: RwLock::new(BTreeMap::new()),
        };
        for tenant in tenants {
            registry.upsert(tenant);
        }
        registry
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.tenants.clone(),
            config.service.default_check_interval_minutes,
        )
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Tenant registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Tenant registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Adds or replaces a tenant. Monitor state survives replacement.
    pub fn upsert(&self, config: TenantConfig) {
        let key = tenant::storage_key(&config.key);
        let mut entries = self.write();
        match entries.get_mut(&key) {
            Some(entry) => entry.config = config,
            None => {
                entries.insert(
                    key,
                    Entry {
                        config,
                        last_check: None,
                        status: MonitorStatus::Idle,
                    },
                );
            }
        }
    }

    /// Turns background monitoring on or off. Returns whether the tenant
    /// exists.
    pub fn set_enabled(&self, tenant_key: &str, enabled: bool) -> bool {
        let key = tenant::storage_key(tenant_key);
        match self.write().get_mut(&key) {
            Some(entry) => {
                entry.config.enabled = enabled;
                log::info!(
                    "Monitoring {} for {}",
                    if enabled { "enabled" } else { "disabled" },
                    key
                );
                true
            }
            None => false,
        }
    }

    pub fn set_check_interval(&self, tenant_key: &str, minutes: u64) -> bool {
        let key = tenant::storage_key(tenant_key);
        match self.write().get_mut(&key) {
            Some(entry) => {
                entry.config.check_interval_minutes = Some(minutes);
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, tenant_key: &str) -> bool {
        self.read()
            .get(&tenant::storage_key(tenant_key))
            .is_some_and(|e| e.config.enabled)
    }

    pub fn monitor_state(&self, tenant_key: &str) -> Option<(MonitorStatus, Option<DateTime<Utc>>)> {
        self.read()
            .get(&tenant::storage_key(tenant_key))
            .map(|e| (e.status, e.last_check))
    }

    pub fn tenant_keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }
}

impl TenantConfigSource for TenantRegistry {
    fn list_enabled_tenants(&self) -> Result<Vec<TenantProfile>, ServiceError> {
        Ok(self
            .read()
            .iter()
            .filter(|(_, entry)| entry.config.enabled)
            .map(|(key, entry)| TenantProfile {
                tenant_key: key.clone(),
                check_interval_minutes: entry
                    .config
                    .check_interval_minutes
                    .unwrap_or(self.default_interval_minutes),
                last_check: entry.last_check,
                status: entry.status,
                filter: entry.config.filter.clone(),
                column_mappings: entry.config.column_mappings.clone(),
                credentials: entry.config.credentials.clone(),
            })
            .collect())
    }

    fn record_check(&self, tenant_key: &str, status: MonitorStatus) -> Result<(), ServiceError> {
        let key = tenant::storage_key(tenant_key);
        let mut entries = self.write();
        let entry = entries
            .get_mut(&key)
            .ok_or_else(|| ServiceError::TenantSource(format!("unknown tenant '{}'", key)))?;
        entry.status = status;
        if status == MonitorStatus::Active {
            entry.last_check = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TenantRegistry {
        let mut acme = TenantConfig::new("Acme Freight");
        acme.check_interval_minutes = Some(2);
        let mut disabled = TenantConfig::new("eshipping");
        disabled.enabled = false;
        TenantRegistry::new(vec![acme, disabled, TenantConfig::new("test_brokerage")], 5)
    }

    #[test]
    fn test_lists_enabled_tenants_with_defaults() {
        let profiles = registry().list_enabled_tenants().unwrap();
        let keys: Vec<&str> = profiles.iter().map(|p| p.tenant_key.as_str()).collect();
        assert_eq!(keys, vec!["acme-freight", "test-brokerage"]);
        assert_eq!(profiles[0].check_interval_minutes, 2);
        assert_eq!(profiles[1].check_interval_minutes, 5);
        assert_eq!(profiles[0].status, MonitorStatus::Idle);
    }

    #[test]
    fn test_enable_disable_by_variant_key() {
        let registry = registry();
        assert!(registry.set_enabled("ESHIPPING", true));
        assert!(registry.is_enabled("eshipping"));
        assert!(registry.set_enabled("Acme_Freight", false));
        assert!(!registry.is_enabled("acme-freight"));
        assert!(!registry.set_enabled("nobody", true));
        assert_eq!(registry.list_enabled_tenants().unwrap().len(), 2);
    }

    #[test]
    fn test_record_check_stamps_active() {
        let registry = registry();
        registry.record_check("Acme Freight", MonitorStatus::Active).unwrap();
        let (status, last_check) = registry.monitor_state("acme-freight").unwrap();
        assert_eq!(status, MonitorStatus::Active);
        assert!(last_check.is_some());

        registry.record_check("acme-freight", MonitorStatus::Stopped).unwrap();
        let (status, kept) = registry.monitor_state("acme-freight").unwrap();
        assert_eq!(status, MonitorStatus::Stopped);
        assert_eq!(kept, last_check);

        assert!(registry.record_check("nobody", MonitorStatus::Active).is_err());
    }

    #[test]
    fn test_upsert_keeps_monitor_state() {
        let registry = registry();
        registry.record_check("acme-freight", MonitorStatus::Error).unwrap();
        registry.upsert(TenantConfig::new("ACME FREIGHT"));
        assert_eq!(
            registry.monitor_state("acme-freight").unwrap().0,
            MonitorStatus::Error
        );
        assert_eq!(registry.tenant_keys().len(), 3);
    }
}
