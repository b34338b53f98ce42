//! Secret resolution for tenant credentials.
//!
//! A secret may be configured three ways, tried in this order:
//!
//! 1. **Direct value** (`value`), for local testing
//! 2. **File reference** (`file`), for mounted secrets
//! 3. **Env var reference** (`env`), for production deployments

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: value, file, or env)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where to find one secret. Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretSource {
    pub value: Option<String>,
    pub file: Option<String>,
    pub env: Option<String>,
}

impl SecretSource {
    pub fn from_env(name: impl Into<String>) -> Self {
        Self {
            env: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        has_secret_source(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env.as_deref(),
        )
    }

    pub fn resolve(&self) -> Result<SecretString> {
        resolve_secret(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env.as_deref(),
        )
    }

    /// Like [`SecretSource::resolve`], but an unconfigured source is `None`.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        match self.resolve() {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretError::NoSourceProvided) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Resolves a secret from the first configured source. File contents and
/// env values are trimmed.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return match std::fs::read_to_string(&expanded) {
            Ok(content) => Ok(SecretString::from(content.trim().to_string())),
            Err(e) => Err(SecretError::FileReadError {
                path: expanded.display().to_string(),
                source: e,
            }),
        };
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|s| !s.is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

/// Expands a leading `~` to the home directory. `~user` is not supported.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => Some(""),
        Some(rest) if rest.starts_with('/') => Some(&rest[1..]),
        _ => None,
    };
    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
