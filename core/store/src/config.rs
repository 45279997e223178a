//! Store configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use strata_common::{path, Error, ProviderKind, Result};
use strata_index::IndexLocation;

fn default_namespace() -> String {
    "strata".to_string()
}

fn default_provider() -> ProviderKind {
    ProviderKind::Database
}

fn default_max_versions() -> u32 {
    10
}

/// Configuration for one external provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Provider-specific settings, opaque to the store.
    #[serde(default)]
    pub config: Value,
    /// Retention count for files on this provider, overriding the store default.
    #[serde(default)]
    pub max_versions: Option<u32>,
}

/// Construction-time configuration for a [`FileStore`](crate::FileStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Where the index database lives.
    #[serde(default)]
    pub index: IndexLocation,
    /// Namespace the index table name is derived from.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Leading folder segment isolating this tenant's files.
    #[serde(default)]
    pub app_prefix: Option<String>,
    /// Provider used when a request names none.
    #[serde(default = "default_provider")]
    pub default_provider: ProviderKind,
    /// Versions kept per file. `0` keeps every version.
    #[serde(default = "default_max_versions")]
    pub max_versions: u32,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            index: IndexLocation::Memory,
            namespace: default_namespace(),
            app_prefix: None,
            default_provider: default_provider(),
            max_versions: default_max_versions(),
            providers: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid store configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Check the configuration for contradictions.
    ///
    /// # Errors
    /// - Namespace is not an identifier
    /// - Application prefix is an absolute path
    /// - The embedded provider, or any kind twice, listed under `providers`
    /// - Default provider is external but not configured
    pub fn validate(&self) -> Result<()> {
        strata_index::validate_namespace(&self.namespace)?;

        if let Some(prefix) = &self.app_prefix {
            if path::is_absolute(prefix) {
                return Err(Error::Configuration(format!(
                    "app prefix '{}' must be relative",
                    prefix
                )));
            }
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.kind.is_embedded() {
                return Err(Error::Configuration(
                    "the database provider needs no configuration entry".to_string(),
                ));
            }
            if !seen.insert(provider.kind) {
                return Err(Error::Configuration(format!(
                    "provider '{}' is configured twice",
                    provider.kind
                )));
            }
        }

        if !self.default_provider.is_embedded() && !seen.contains(&self.default_provider) {
            return Err(Error::Configuration(format!(
                "default provider '{}' is not configured",
                self.default_provider
            )));
        }

        Ok(())
    }

    /// Application prefix, if a non-blank one is set.
    pub fn app_prefix(&self) -> Option<&str> {
        self.app_prefix
            .as_deref()
            .map(str::trim)
            .filter(|prefix| !prefix.is_empty())
    }
}
