use std::collections::HashMap;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::inbox::EmailParser;
use crate::tenant;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for tenant in &config.tenants {
        let canonical = tenant::normalize(&tenant.key);
        if canonical.is_empty() {
            return Err(ConfigError::Validation {
                message: format!("Tenant key '{}' has no usable characters", tenant.key),
            });
        }
        if seen.insert(canonical.clone(), &tenant.key).is_some() {
            return Err(ConfigError::DuplicateTenant {
                tenant: tenant.key.clone(),
                canonical,
            });
        }

        if tenant.check_interval_minutes == Some(0) {
            return Err(ConfigError::Validation {
                message: format!("Tenant '{}' has a zero check interval", tenant.key),
            });
        }

        // Compiling the filter checks every glob.
        if let Err(e) = EmailParser::new(&tenant.filter) {
            return Err(ConfigError::InvalidPattern {
                tenant: tenant.key.clone(),
                pattern: pattern_of(&e),
                reason: e.to_string(),
            });
        }
    }

    let storage = &config.storage;
    if storage.max_jobs_per_tenant == 0 || storage.max_results_per_tenant == 0 {
        return Err(ConfigError::Validation {
            message: "Retention caps must be positive".to_string(),
        });
    }

    Ok(())
}

fn pattern_of(error: &crate::inbox::InboxError) -> String {
    match error {
        crate::inbox::InboxError::InvalidPattern { pattern, .. } => pattern.clone(),
        _ => String::new(),
    }
}
