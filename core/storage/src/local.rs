//! Local filesystem storage provider.
//!
//! Serves the `FileSystem` kind: a local directory or a mounted network
//! share. Blobs live at `<root>/<folder>/<name>_v<version><ext>` and the
//! root-relative, `/`-separated key doubles as the locator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use strata_common::path::FOLDER_SEPARATOR;
use strata_common::{path, Error, FileRecord, ProviderKind, Result};

use crate::provider::{discover_key, DiscoveryStream, ProviderSettings, StorageProvider};

/// Marker files written by the readiness probe start with this.
const PROBE_PREFIX: &str = ".strata-probe-";

/// Local filesystem storage provider.
pub struct LocalProvider {
    root: PathBuf,
    max_file_size: Option<u64>,
}

impl LocalProvider {
    /// Create a new local provider with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            max_file_size: None,
        })
    }

    /// Build a ready provider from registry settings.
    ///
    /// Reads `root` (required, absolute) and `max_file_size` (optional),
    /// then runs the readiness probe.
    ///
    /// # Errors
    /// - Missing or relative `root`
    /// - Probe failure (root not writable, read-back mismatch)
    pub async fn connect(settings: ProviderSettings) -> Result<Self> {
        let root = settings.require_str("root")?;
        if !path::is_absolute(root) {
            return Err(Error::Configuration(format!(
                "filesystem root '{}' must be an absolute path",
                root
            )));
        }

        let mut provider = Self::new(root)?;
        provider.max_file_size = settings.config_u64("max_file_size");
        provider.probe().await?;

        info!(root = %provider.root.display(), "Filesystem provider ready");
        Ok(provider)
    }

    /// Root directory of this provider.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write, read back and delete a throwaway marker file.
    pub async fn probe(&self) -> Result<()> {
        let marker = self.root.join(format!("{}{}", PROBE_PREFIX, Uuid::new_v4()));
        let payload = b"strata-readiness-probe";

        fs::write(&marker, payload).await.map_err(|e| {
            Error::Configuration(format!("cannot write to {}: {}", self.root.display(), e))
        })?;
        let read_back = fs::read(&marker).await;
        fs::remove_file(&marker).await?;

        if read_back? != payload {
            return Err(Error::Configuration(format!(
                "read-back mismatch in {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Convert a root-relative key to a filesystem path.
    fn to_fs_path(&self, key: &str) -> Result<PathBuf> {
        let mut fs_path = self.root.clone();
        let components = key
            .split(|c: char| path::SEPARATORS.contains(&c))
            .filter(|c| !c.is_empty());
        for component in components {
            match Path::new(component).components().next() {
                Some(Component::Normal(_)) => fs_path.push(component),
                _ => {
                    return Err(Error::InvalidPath(format!(
                        "locator '{}' escapes the provider root",
                        key
                    )))
                }
            }
        }
        Ok(fs_path)
    }

    fn ensure_online(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::ProviderUnavailable(format!(
                "filesystem root {} is not reachable",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn walk(&self, start: PathBuf, recursive: bool) -> Result<Vec<(String, std::fs::Metadata)>> {
        let mut files = Vec::new();
        let mut pending = vec![start];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    if recursive {
                        pending.push(entry_path);
                    }
                    continue;
                }

                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(PROBE_PREFIX) {
                    continue;
                }

                let key = self.key_for(&entry_path);
                files.push((key, meta));
            }
        }

        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    fn key_for(&self, fs_path: &Path) -> String {
        fs_path
            .strip_prefix(&self.root)
            .unwrap_or(fs_path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(&FOLDER_SEPARATOR.to_string())
    }
}

fn timestamp(time: std::io::Result<SystemTime>) -> DateTime<Utc> {
    time.map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::FileSystem
    }

    fn name(&self) -> &str {
        "local"
    }

    fn max_file_size(&self) -> Option<u64> {
        self.max_file_size
    }

    async fn save(&self, record: &FileRecord) -> Result<String> {
        self.ensure_online()?;

        let key = record.storage_key();
        let fs_path = self.to_fs_path(&key)?;
        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&fs_path, &record.data).await?;
        debug!(key = %key, size = record.data.len(), "Blob written");
        Ok(key)
    }

    async fn get(&self, locator: &str) -> Result<Vec<u8>> {
        self.ensure_online()?;
        let fs_path = self.to_fs_path(locator)?;

        if !fs_path.is_file() {
            return Err(Error::NotFound(format!("File not found: {}", locator)));
        }

        Ok(fs::read(&fs_path).await?)
    }

    async fn delete(&self, locator: &str) -> Result<bool> {
        self.ensure_online()?;
        let fs_path = self.to_fs_path(locator)?;

        if !fs_path.is_file() {
            return Ok(false);
        }

        fs::remove_file(&fs_path).await?;
        debug!(key = %locator, "Blob deleted");
        Ok(true)
    }

    async fn index_contents(&self, scope_path: &str, recursive: bool) -> Result<DiscoveryStream> {
        self.ensure_online()?;

        let start = self.to_fs_path(scope_path)?;
        if !start.is_dir() {
            return Ok(Box::pin(stream::empty()));
        }

        let found: Vec<_> = self
            .walk(start, recursive)
            .await?
            .into_iter()
            .filter_map(|(key, meta)| {
                discover_key(&key, meta.len(), timestamp(meta.created()), timestamp(meta.modified()))
            })
            .collect();

        Ok(Box::pin(stream::iter(found.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use strata_common::FileRef;
    use tempfile::TempDir;

    fn record(folder: &str, name: &str, version: u32, data: &[u8]) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: None,
            file_ref: FileRef::generate(),
            name: name.to_string(),
            extension: ".txt".to_string(),
            mime_type: "text/plain".to_string(),
            description: None,
            uploaded_by: None,
            folder: folder.to_string(),
            ext_client_ref: None,
            provider: ProviderKind::FileSystem,
            version,
            size_in_bytes: data.len() as u64,
            created: now,
            modified: now,
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_local_save_get_delete() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        let locator = provider
            .save(&record("A/B/", "hello", 2, b"Hello, Local!"))
            .await
            .unwrap();
        assert_eq!(locator, "A/B/hello_v2.txt");
        assert!(temp.path().join("A").join("B").join("hello_v2.txt").is_file());

        assert_eq!(provider.get(&locator).await.unwrap(), b"Hello, Local!");
        assert!(provider.delete(&locator).await.unwrap());
        assert!(!provider.delete(&locator).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_rejects_escaping_locator() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        let result = provider.get("../outside.txt").await;
        assert!(matches!(result, Err(Error::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_connect_probes_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("files");
        let settings = ProviderSettings::new(
            ProviderKind::FileSystem,
            json!({ "root": root.to_string_lossy(), "max_file_size": 8 }),
        );

        let provider = LocalProvider::connect(settings).await.unwrap();
        assert_eq!(provider.max_file_size(), Some(8));
        // Probe markers are cleaned up
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_connect_requires_root() {
        let missing = ProviderSettings::new(ProviderKind::FileSystem, json!({}));
        assert!(matches!(
            LocalProvider::connect(missing).await,
            Err(Error::Configuration(_))
        ));

        let relative = ProviderSettings::new(ProviderKind::FileSystem, json!({ "root": "rel/dir" }));
        assert!(matches!(
            LocalProvider::connect(relative).await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_local_index_contents() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();
        provider.save(&record("docs/", "a", 1, b"1")).await.unwrap();
        provider.save(&record("docs/deep/", "b", 1, b"22")).await.unwrap();
        provider.save(&record("", "c", 1, b"333")).await.unwrap();

        let all: Vec<_> = provider
            .index_contents("", true)
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(all.len(), 3);
        let deep = all.iter().find(|d| d.name == "b").unwrap();
        assert_eq!(deep.folder, "docs/deep/");
        assert_eq!(deep.ext_client_ref, "docs/deep/b_v1.txt");
        assert_eq!(deep.size_in_bytes, 2);

        let shallow = provider.index_contents("docs", false).await.unwrap().count().await;
        assert_eq!(shallow, 1);

        let missing = provider.index_contents("nowhere", true).await.unwrap().count().await;
        assert_eq!(missing, 0);
    }

    #[tokio::test]
    async fn test_unreachable_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("gone");
        let provider = LocalProvider::new(&root).unwrap();
        std::fs::remove_dir(&root).unwrap();

        let result = provider.get("x.txt").await;
        assert!(matches!(result, Err(Error::ProviderUnavailable(_))));
    }
}
