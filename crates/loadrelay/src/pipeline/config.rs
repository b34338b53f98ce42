use crate::secrets::SecretSource;
use crate::service::TenantProfile;

use super::mapping::ColumnMappings;

/// Per-tenant settings the pipeline needs for one run.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub column_mappings: ColumnMappings,
    pub credentials: Option<SecretSource>,
}

impl PipelineConfig {
    pub fn from_profile(profile: &TenantProfile) -> Self {
        Self {
            column_mappings: profile.column_mappings.clone(),
            credentials: profile.credentials.clone(),
        }
    }
}
