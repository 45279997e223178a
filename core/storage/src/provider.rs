//! Storage provider trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

use strata_common::path::{self, split_extension, strip_version_suffix};
use strata_common::{mime, DiscoveredFile, Error, FileRecord, ProviderKind, Result};

/// Lazy sequence of blobs found by a provider scan.
pub type DiscoveryStream = Pin<Box<dyn Stream<Item = Result<DiscoveredFile>> + Send>>;

/// Storage provider trait for the physical backends.
///
/// Locators returned by [`StorageProvider::save`] are opaque to callers and
/// are handed back verbatim to `get` and `delete`. Implementations must
/// handle their own authentication, pagination and rate limiting, and
/// report a backend that cannot be reached at all as
/// `Error::ProviderUnavailable`.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Backend kind this handle serves.
    fn kind(&self) -> ProviderKind;

    /// Get the provider name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Largest payload the backend accepts, if it documents one.
    fn max_file_size(&self) -> Option<u64> {
        None
    }

    /// Store the payload of `record` and return its locator.
    ///
    /// # Preconditions
    /// - `record.data` holds the complete content
    /// - `record.folder`, `name`, `extension` and `version` are final
    ///
    /// # Errors
    /// - Backend unreachable
    /// - Network/I/O errors
    async fn save(&self, record: &FileRecord) -> Result<String>;

    /// Download the blob at `locator`.
    ///
    /// # Errors
    /// - Blob not found
    /// - Backend unreachable
    async fn get(&self, locator: &str) -> Result<Vec<u8>>;

    /// Delete the blob at `locator`.
    ///
    /// Returns `false` when nothing was stored there.
    async fn delete(&self, locator: &str) -> Result<bool>;

    /// Enumerate blobs beneath `scope_path` (root-relative, `/`-separated).
    ///
    /// Discovered items carry their provider-relative folder and the
    /// locator needed to fetch them.
    async fn index_contents(&self, scope_path: &str, recursive: bool) -> Result<DiscoveryStream>;
}

/// Registration data for one provider slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// Provider-specific configuration.
    #[serde(default)]
    pub config: Value,
    /// Retention count for files hosted on this provider.
    #[serde(default)]
    pub max_versions: Option<u32>,
    /// Application scope prefix in effect for this provider.
    #[serde(default)]
    pub app_prefix: Option<String>,
}

impl ProviderSettings {
    /// Create settings with no retention override or prefix.
    pub fn new(kind: ProviderKind, config: Value) -> Self {
        Self {
            kind,
            config,
            max_versions: None,
            app_prefix: None,
        }
    }

    /// String value from the provider configuration.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    /// Required string value from the provider configuration.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.config_str(key).ok_or_else(|| {
            Error::Configuration(format!("{} provider requires '{}'", self.kind, key))
        })
    }

    /// Unsigned integer value from the provider configuration.
    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(|v| v.as_u64())
    }
}

/// Reject payloads larger than the provider accepts.
pub fn check_size(provider: &dyn StorageProvider, size: u64) -> Result<()> {
    match provider.max_file_size() {
        Some(limit) if size > limit => Err(Error::SizeLimitExceeded { size, limit }),
        _ => Ok(()),
    }
}

/// Map a root-relative storage key to the common discovery shape.
///
/// Returns `None` for keys that do not end in a file name.
pub fn discover_key(
    key: &str,
    size_in_bytes: u64,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
) -> Option<DiscoveredFile> {
    let file = path::file_name(key)?;
    let (stem, extension) = split_extension(file);
    let (name, _) = strip_version_suffix(stem);

    Some(DiscoveredFile {
        folder: path::to_relative_folder(key, None, ""),
        name: name.to_string(),
        extension: extension.to_string(),
        mime_type: mime::from_extension(extension).to_string(),
        size_in_bytes,
        ext_client_ref: key.to_string(),
        created,
        modified,
    })
}
