//! Common types used throughout Strata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable handle identifying one logical file across all of its versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef(String);

impl FileRef {
    /// Create a FileRef from an existing string.
    ///
    /// # Errors
    /// - Returns error if the handle is empty or blank
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "FileRef cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Mint a fresh random handle.
    ///
    /// Uniqueness against the index is verified by the caller before use.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical backend hosting the bytes of a file version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Bytes embedded in the index row itself.
    Database,
    /// Local directory or network share.
    FileSystem,
    /// Object store bucket.
    ObjectStore,
    /// Third-party document vault.
    DocumentVault,
}

impl ProviderKind {
    /// All kinds, in discriminator order.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Database,
        ProviderKind::FileSystem,
        ProviderKind::ObjectStore,
        ProviderKind::DocumentVault,
    ];

    /// Discriminator persisted in the index.
    pub fn id(self) -> i64 {
        match self {
            ProviderKind::Database => 0,
            ProviderKind::FileSystem => 1,
            ProviderKind::ObjectStore => 2,
            ProviderKind::DocumentVault => 3,
        }
    }

    /// Map a persisted discriminator back to a kind.
    pub fn from_id(id: i64) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == id)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown provider id {}", id)))
    }

    /// Whether rows of this kind carry their payload in the index.
    pub fn is_embedded(self) -> bool {
        self == ProviderKind::Database
    }

    /// Short lowercase name used in logs and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Database => "database",
            ProviderKind::FileSystem => "filesystem",
            ProviderKind::ObjectStore => "objectstore",
            ProviderKind::DocumentVault => "documentvault",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(|c: char| c == '-' || c == '_', "");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown provider kind '{}'", s)))
    }
}

/// One stored version of a logical file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Index surrogate key, `None` until the row is inserted.
    pub id: Option<i64>,
    pub file_ref: FileRef,
    /// File stem, without extension or version suffix.
    pub name: String,
    /// Extension including the leading dot, or empty.
    pub extension: String,
    pub mime_type: String,
    pub description: Option<String>,
    pub uploaded_by: Option<String>,
    /// Canonical relative folder (`/`-separated, trailing `/`).
    pub folder: String,
    /// Provider-native locator. `None` for embedded rows.
    pub ext_client_ref: Option<String>,
    pub provider: ProviderKind,
    pub version: u32,
    pub size_in_bytes: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Payload; only kept by the index for embedded rows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
}

impl FileRecord {
    /// File name as presented to callers (`name` + `extension`).
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }

    /// Logical path of the file (`folder` + file name).
    pub fn logical_path(&self) -> String {
        format!("{}{}", self.folder, self.file_name())
    }

    /// Name under which providers store this version.
    pub fn stored_file_name(&self) -> String {
        crate::path::versioned_file_name(&self.name, self.version, &self.extension)
    }

    /// Root-relative storage key for providers that address blobs by path.
    pub fn storage_key(&self) -> String {
        format!("{}{}", self.folder, self.stored_file_name())
    }

    /// Copy of the record without its payload.
    pub fn without_data(&self) -> Self {
        Self {
            data: Vec::new(),
            ..self.clone()
        }
    }
}

/// A blob found by scanning a provider, before it has a FileRef.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredFile {
    /// Provider-relative folder, `/`-separated.
    pub folder: String,
    pub name: String,
    pub extension: String,
    pub mime_type: String,
    pub size_in_bytes: u64,
    /// Provider-native locator for later fetch/delete.
    pub ext_client_ref: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl DiscoveredFile {
    /// Turn the discovery into an index row for the given chain.
    pub fn into_record(
        self,
        file_ref: FileRef,
        provider: ProviderKind,
        folder: String,
        version: u32,
    ) -> FileRecord {
        FileRecord {
            id: None,
            file_ref,
            name: self.name,
            extension: self.extension,
            mime_type: self.mime_type,
            description: None,
            uploaded_by: None,
            folder,
            ext_client_ref: Some(self.ext_client_ref),
            provider,
            version,
            size_in_bytes: self.size_in_bytes,
            created: self.created,
            modified: self.modified,
            data: Vec::new(),
        }
    }
}
