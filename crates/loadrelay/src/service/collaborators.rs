//! What the monitoring loop needs from the outside world.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::inbox::AttachmentFilter;
use crate::pipeline::ColumnMappings;
use crate::secrets::SecretSource;

/// Monitor state recorded per tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    /// Never checked.
    #[default]
    Idle,
    Active,
    Error,
    Stopped,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Idle => "idle",
            MonitorStatus::Active => "active",
            MonitorStatus::Error => "error",
            MonitorStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tenant with background monitoring enabled.
#[derive(Debug, Clone, Default)]
pub struct TenantProfile {
    pub tenant_key: String,
    pub check_interval_minutes: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub status: MonitorStatus,
    pub filter: AttachmentFilter,
    pub column_mappings: ColumnMappings,
    pub credentials: Option<SecretSource>,
}

impl TenantProfile {
    pub fn new(tenant_key: impl Into<String>, check_interval_minutes: u64) -> Self {
        Self {
            tenant_key: tenant_key.into(),
            check_interval_minutes,
            ..Self::default()
        }
    }

    /// The configured interval; `fallback` when none is set.
    pub fn check_interval(&self, fallback: Duration) -> Duration {
        match self.check_interval_minutes {
            0 => fallback,
            minutes => Duration::from_secs(minutes * 60),
        }
    }

    /// Whether the interval has elapsed since the last check.
    pub fn is_due(&self, now: DateTime<Utc>, fallback: Duration) -> bool {
        let Some(last) = self.last_check else {
            return true;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed >= self.check_interval(fallback),
            // Last check in the future: clock skew, check anyway.
            Err(_) => true,
        }
    }
}

/// Source of tenants to monitor, and sink for their monitor state.
pub trait TenantConfigSource: Send + Sync {
    fn list_enabled_tenants(&self) -> Result<Vec<TenantProfile>, ServiceError>;

    /// Records a check. `Active` also stamps the tenant's last check time.
    fn record_check(&self, tenant_key: &str, status: MonitorStatus) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_due_after_interval() {
        let now = Utc::now();
        let fallback = Duration::from_secs(300);
        let mut profile = TenantProfile::new("acme", 10);
        assert!(profile.is_due(now, fallback));

        profile.last_check = Some(now - ChronoDuration::minutes(5));
        assert!(!profile.is_due(now, fallback));
        profile.last_check = Some(now - ChronoDuration::minutes(10));
        assert!(profile.is_due(now, fallback));
        profile.last_check = Some(now + ChronoDuration::minutes(10));
        assert!(profile.is_due(now, fallback));
    }

    #[test]
    fn test_zero_interval_uses_fallback() {
        let profile = TenantProfile::new("acme", 0);
        assert_eq!(
            profile.check_interval(Duration::from_secs(42)),
            Duration::from_secs(42)
        );
        assert_eq!(
            TenantProfile::new("acme", 2).check_interval(Duration::ZERO),
            Duration::from_secs(120)
        );
    }
}
