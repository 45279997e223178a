//! In-memory storage provider for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use strata_common::path::{canonical_folder, FOLDER_SEPARATOR};
use strata_common::{Error, FileRecord, ProviderKind, Result};

use crate::provider::{discover_key, DiscoveryStream, ProviderSettings, StorageProvider};

/// In-memory blob.
#[derive(Debug, Clone)]
struct Blob {
    data: Vec<u8>,
    created: DateTime<Utc>,
}

/// In-memory storage provider.
///
/// Stands in for any provider kind. Useful for testing and development:
/// all data is stored in memory and lost on drop. Outages and short
/// writes can be simulated with [`MemoryProvider::set_offline`] and
/// [`MemoryProvider::set_truncate_writes`].
pub struct MemoryProvider {
    kind: ProviderKind,
    max_file_size: Option<u64>,
    storage: RwLock<HashMap<String, Blob>>,
    offline: AtomicBool,
    /// Payloads longer than this are stored cut in half.
    truncate_above: AtomicUsize,
}

impl MemoryProvider {
    /// Create a new empty memory provider serving `kind`.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            max_file_size: None,
            storage: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
            truncate_above: AtomicUsize::new(usize::MAX),
        }
    }

    /// Build from registry settings (`max_file_size` is optional).
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let mut provider = Self::new(settings.kind);
        provider.max_file_size = settings.config_u64("max_file_size");
        provider
    }

    /// Set the largest payload accepted.
    pub fn with_max_file_size(mut self, limit: u64) -> Self {
        self.max_file_size = Some(limit);
        self
    }

    /// Make every call fail as if the backend were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Store only the first half of each payload.
    pub fn set_truncate_writes(&self, truncate: bool) {
        let limit = if truncate { 0 } else { usize::MAX };
        self.truncate_above.store(limit, Ordering::SeqCst);
    }

    /// Store only the first half of payloads longer than `len` bytes.
    pub fn set_truncate_above(&self, len: usize) {
        self.truncate_above.store(len, Ordering::SeqCst);
    }

    /// Whether a blob is stored at `locator`.
    pub fn contains(&self, locator: &str) -> bool {
        self.read()
            .map(|storage| storage.contains_key(locator))
            .unwrap_or(false)
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.read().map(|storage| storage.len()).unwrap_or(0)
    }

    /// Check if no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Place a blob directly, bypassing the index (e.g. content written by
    /// another system that a reindex should pick up).
    pub fn insert_raw(&self, key: impl Into<String>, data: Vec<u8>) -> Result<()> {
        let blob = Blob {
            data,
            created: Utc::now(),
        };
        self.write()?.insert(key.into(), blob);
        Ok(())
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::ProviderUnavailable(format!(
                "{} memory provider is offline",
                self.kind
            )));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Blob>>> {
        self.storage
            .read()
            .map_err(|_| Error::Storage("Memory provider lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Blob>>> {
        self.storage
            .write()
            .map_err(|_| Error::Storage("Memory provider lock poisoned".to_string()))
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn name(&self) -> &str {
        "memory"
    }

    fn max_file_size(&self) -> Option<u64> {
        self.max_file_size
    }

    async fn save(&self, record: &FileRecord) -> Result<String> {
        self.ensure_online()?;

        let key = record.storage_key();
        let mut data = record.data.clone();
        if data.len() > self.truncate_above.load(Ordering::SeqCst) {
            data.truncate(data.len() / 2);
        }

        self.insert_raw(key.clone(), data)?;
        Ok(key)
    }

    async fn get(&self, locator: &str) -> Result<Vec<u8>> {
        self.ensure_online()?;

        match self.read()?.get(locator) {
            Some(blob) => Ok(blob.data.clone()),
            None => Err(Error::NotFound(format!("Blob not found: {}", locator))),
        }
    }

    async fn delete(&self, locator: &str) -> Result<bool> {
        self.ensure_online()?;
        Ok(self.write()?.remove(locator).is_some())
    }

    async fn index_contents(&self, scope_path: &str, recursive: bool) -> Result<DiscoveryStream> {
        self.ensure_online()?;

        let scope = canonical_folder(scope_path, None);
        let now = Utc::now();
        let mut found: Vec<_> = self
            .read()?
            .iter()
            .filter(|(key, _)| key.starts_with(&scope))
            .filter(|(key, _)| recursive || !key[scope.len()..].contains(FOLDER_SEPARATOR))
            .filter_map(|(key, blob)| discover_key(key, blob.data.len() as u64, blob.created, now))
            .collect();
        found.sort_by(|a, b| a.ext_client_ref.cmp(&b.ext_client_ref));

        Ok(Box::pin(stream::iter(found.into_iter().map(Ok))))
    }
}
