//! The file store orchestrator.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use strata_common::path::{self, canonical_folder, PathInfo};
use strata_common::{Error, FileRecord, FileRef, ProviderKind, Result};
use strata_index::VersionedIndex;
use strata_storage::provider::check_size;
use strata_storage::{create_default_registry, ProviderRegistry, StorageProvider};

use crate::config::StoreConfig;
use crate::report::{OperationReport, ReindexSummary};

/// A request to store a new version of a file.
#[derive(Debug, Clone, Default)]
pub struct UpsertRequest {
    /// Logical path, `folder/name.ext`, in any separator convention.
    pub path: String,
    pub data: Vec<u8>,
    /// Target provider; the configured default when `None`.
    pub provider: Option<ProviderKind>,
    pub description: Option<String>,
    pub uploaded_by: Option<String>,
    /// Creation time to record; now when `None`.
    pub created: Option<DateTime<Utc>>,
    /// Retention override for this file.
    pub max_versions: Option<u32>,
}

impl UpsertRequest {
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            data,
            ..Self::default()
        }
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_uploaded_by(mut self, uploaded_by: impl Into<String>) -> Self {
        self.uploaded_by = Some(uploaded_by.into());
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_max_versions(mut self, max_versions: u32) -> Self {
        self.max_versions = Some(max_versions);
        self
    }
}

/// Where a move puts a file.
struct Destination {
    folder: String,
    name: String,
    extension: String,
    mime_type: String,
}

impl Destination {
    fn file_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }
}

fn row_id(record: &FileRecord) -> Result<i64> {
    record
        .id
        .ok_or_else(|| Error::Index(format!("row for {} has no id", record.file_ref)))
}

fn locator(record: &FileRecord) -> Result<&str> {
    record.ext_client_ref.as_deref().ok_or_else(|| {
        Error::Index(format!(
            "{} version {} on {} has no locator",
            record.file_ref, record.version, record.provider
        ))
    })
}

/// Versioned file store over the index and the configured providers.
///
/// The index is the single source of truth for which versions exist.
/// Providers only hold bytes; no operation leaves a row pointing at a
/// provider write that was not confirmed.
///
/// Operations await their provider calls one at a time and take no locks
/// across calls. Two concurrent upserts of the same path can be assigned
/// the same version number; callers needing strict ordering must
/// serialize writes per path themselves.
pub struct FileStore {
    index: VersionedIndex,
    registry: ProviderRegistry,
    config: StoreConfig,
}

impl FileStore {
    /// Open the index and register the configured providers.
    ///
    /// Providers are not contacted here; each one is brought online on
    /// first use.
    ///
    /// # Errors
    /// - `Error::Configuration` for an invalid configuration
    /// - `Error::IndexUnavailable` if the index cannot be opened
    pub fn open(config: StoreConfig, mut registry: ProviderRegistry) -> Result<Self> {
        config.validate()?;

        for provider in &config.providers {
            registry.register(
                provider.kind,
                provider.config.clone(),
                provider.max_versions,
                config.app_prefix().map(str::to_string),
            )?;
        }

        let index = VersionedIndex::open(&config.index, &config.namespace)?;

        info!(
            namespace = %config.namespace,
            default_provider = %config.default_provider,
            providers = config.providers.len(),
            "File store opened"
        );

        Ok(Self {
            index,
            registry,
            config,
        })
    }

    /// Open with the built-in provider factories.
    pub fn open_default(config: StoreConfig) -> Result<Self> {
        Self::open(config, create_default_registry())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn index(&self) -> &VersionedIndex {
        &self.index
    }

    fn prefix(&self) -> Option<&str> {
        self.config.app_prefix()
    }

    /// Handle for an external provider, `None` for the embedded one.
    async fn handle(&self, kind: ProviderKind) -> Result<Option<Arc<dyn StorageProvider>>> {
        if kind.is_embedded() {
            return Ok(None);
        }
        self.registry.require(kind).await.map(Some)
    }

    /// Versions to keep for a file on `kind`; `0` keeps all.
    ///
    /// An unlimited configuration stays unlimited; otherwise a larger
    /// per-request override wins.
    fn retention(&self, kind: ProviderKind, requested: Option<u32>) -> u32 {
        let configured = self
            .registry
            .slot_max_versions(kind)
            .unwrap_or(self.config.max_versions);
        match configured {
            0 => 0,
            n => n.max(requested.unwrap_or(0)),
        }
    }

    /// Apply a `max_file_size` from the provider configuration.
    ///
    /// Runs before the provider is resolved, so an oversized payload never
    /// triggers the provider's first-use readiness probe.
    fn check_configured_size(&self, kind: ProviderKind, size: u64) -> Result<()> {
        let limit = self
            .registry
            .settings(kind)
            .and_then(|settings| settings.config_u64("max_file_size"));
        match limit {
            Some(limit) if size > limit => Err(Error::SizeLimitExceeded { size, limit }),
            _ => Ok(()),
        }
    }

    fn mint_file_ref(&self) -> Result<FileRef> {
        loop {
            let candidate = FileRef::generate();
            if self.index.is_file_ref_unique(&candidate)? {
                return Ok(candidate);
            }
        }
    }

    /// The live chain at an exact (folder, file name) key, newest first.
    fn rows_at(&self, folder: &str, file_name: &str) -> Result<Vec<FileRecord>> {
        self.index.find_by_folder(folder, false, Some(file_name), true)
    }

    /// Store a new version of the file at `request.path`.
    ///
    /// A file already live at the same folder, name and extension keeps
    /// its `FileRef`; otherwise a fresh one is minted. After the write,
    /// versions beyond the retention count are pruned oldest first.
    ///
    /// Returns `None` when the index row could not be written; the
    /// provider blob is removed again in that case.
    ///
    /// # Errors
    /// - `Error::InvalidPath` if the path does not name a file
    /// - `Error::ProviderUnavailable` if the target provider is down
    /// - `Error::SizeLimitExceeded` before any provider call when the limit
    ///   is configured; a limit only the provider itself reports is checked
    ///   after it has been brought online
    pub async fn upsert(&self, request: UpsertRequest) -> Result<Option<FileRef>> {
        let kind = request.provider.unwrap_or(self.config.default_provider);
        let info = PathInfo::parse(&request.path, self.prefix())?;
        let size = request.data.len() as u64;

        self.check_configured_size(kind, size)?;
        let handle = self.handle(kind).await?;
        if let Some(handle) = &handle {
            check_size(handle.as_ref(), size)?;
        }

        let file_ref = match self.rows_at(&info.folder, &info.file_name())?.first() {
            Some(live) => live.file_ref.clone(),
            None => self.mint_file_ref()?,
        };
        let version = self
            .index
            .next_version_number(&info.folder, &info.name, &info.extension)?;

        let now = Utc::now();
        let mut record = FileRecord {
            id: None,
            file_ref,
            name: info.name,
            extension: info.extension,
            mime_type: info.mime_type,
            description: request.description,
            uploaded_by: request.uploaded_by,
            folder: info.folder,
            ext_client_ref: None,
            provider: kind,
            version,
            size_in_bytes: size,
            created: request.created.unwrap_or(now),
            modified: now,
            data: request.data,
        };

        if let Some(handle) = &handle {
            record.ext_client_ref = Some(handle.save(&record).await?);
        }

        if let Err(e) = self.index.upsert(&mut record) {
            error!(file_ref = %record.file_ref, version, error = %e, "Index write failed");
            if let (Some(handle), Some(locator)) = (&handle, &record.ext_client_ref) {
                if let Err(e) = handle.delete(locator).await {
                    warn!(locator = %locator, error = %e, "Orphaned blob left behind");
                }
            }
            return Ok(None);
        }

        info!(
            file_ref = %record.file_ref,
            path = %record.logical_path(),
            version,
            provider = %kind,
            size,
            "Stored new version"
        );

        let keep = self.retention(kind, request.max_versions);
        let pruned = self.prune(&record.file_ref, keep).await?;
        for message in &pruned.messages {
            warn!(file_ref = %record.file_ref, "{}", message);
        }

        Ok(Some(record.file_ref))
    }

    /// Fetch one version with its bytes.
    ///
    /// `version_offset` indexes the newest-first history: `0` is the
    /// latest version. Returns `None` for an unknown ref or an offset past
    /// the oldest version.
    pub async fn fetch(&self, file_ref: &FileRef, version_offset: usize) -> Result<Option<FileRecord>> {
        let versions = self.index.find_by_file_ref(file_ref)?;
        let Some(meta) = versions.into_iter().nth(version_offset) else {
            debug!(file_ref = %file_ref, version_offset, "No such version");
            return Ok(None);
        };

        let data = self.read_payload(&meta).await?;
        Ok(Some(FileRecord { data, ..meta }))
    }

    async fn read_payload(&self, record: &FileRecord) -> Result<Vec<u8>> {
        match self.handle(record.provider).await? {
            Some(handle) => handle.get(locator(record)?).await,
            None => {
                let id = row_id(record)?;
                let row = self
                    .index
                    .get(id)?
                    .ok_or_else(|| Error::NotFound(format!("index row {}", id)))?;
                Ok(row.data)
            }
        }
    }

    /// Every version of a file, newest first, without payloads.
    pub fn list_versions(&self, file_ref: &FileRef) -> Result<Vec<FileRecord>> {
        self.index.find_by_file_ref(file_ref)
    }

    /// Latest version of each file in a folder, without payloads.
    ///
    /// `name_filter` is a case-insensitive substring of the file name.
    pub fn list_folder(
        &self,
        folder: &str,
        include_subfolders: bool,
        name_filter: Option<&str>,
    ) -> Result<Vec<FileRecord>> {
        let folder = canonical_folder(folder, self.prefix());
        let rows = self
            .index
            .find_by_folder(&folder, include_subfolders, name_filter, false)?;

        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .filter(|row| seen.insert(row.file_ref.clone()))
            .collect())
    }

    async fn remove_blob(&self, record: &FileRecord) -> Result<()> {
        if let Some(handle) = self.handle(record.provider).await? {
            handle.delete(locator(record)?).await?;
        }
        Ok(())
    }

    /// Remove one version from its provider and the index.
    ///
    /// The index row is removed even when the provider delete fails; that
    /// failure is handed back for reporting. Only an index failure is an
    /// error.
    async fn retire(&self, record: &FileRecord) -> Result<Option<Error>> {
        let blob_result = self.remove_blob(record).await;
        self.index.delete(row_id(record)?)?;
        debug!(file_ref = %record.file_ref, version = record.version, "Version retired");
        Ok(blob_result.err())
    }

    /// Retire versions beyond the newest `keep`, oldest first.
    ///
    /// `keep == 0` keeps everything.
    pub async fn prune(&self, file_ref: &FileRef, keep: u32) -> Result<OperationReport> {
        let mut report = OperationReport::new();
        let versions = self.index.find_by_file_ref(file_ref)?;
        if keep == 0 || versions.len() <= keep as usize {
            return Ok(report);
        }

        for record in versions.iter().skip(keep as usize).rev() {
            match self.retire(record).await {
                Ok(None) => report.record_success(),
                Ok(Some(e)) => {
                    report.record_success();
                    report.record_failure(format!(
                        "pruned version {} but its blob was not removed: {}",
                        record.version, e
                    ));
                }
                Err(e) => report.record_failure(format!(
                    "pruning version {} failed: {}",
                    record.version, e
                )),
            }
        }

        info!(file_ref = %file_ref, pruned = report.affected, keep, "Retention applied");
        Ok(report)
    }

    /// Delete every version of a file from its providers and the index.
    ///
    /// The index is cleaned up regardless of provider failures, which are
    /// reported per version.
    pub async fn delete(&self, file_ref: &FileRef) -> Result<OperationReport> {
        let mut report = OperationReport::new();
        let versions = self.index.find_by_file_ref(file_ref)?;
        if versions.is_empty() {
            report.note(format!("{} has no versions", file_ref));
            return Ok(report);
        }

        for record in &versions {
            match self.retire(record).await {
                Ok(None) => report.record_success(),
                Ok(Some(e)) => {
                    warn!(file_ref = %file_ref, version = record.version, error = %e, "Blob not removed");
                    report.record_success();
                    report.record_failure(format!(
                        "version {}: blob not removed: {}",
                        record.version, e
                    ));
                }
                Err(e) => {
                    warn!(file_ref = %file_ref, version = record.version, error = %e, "Delete failed");
                    report.record_failure(format!("version {}: {}", record.version, e));
                }
            }
        }

        info!(file_ref = %file_ref, deleted = report.affected, "File deleted");
        Ok(report)
    }

    /// Write `data` to the updated location, verify it, and repoint the row.
    ///
    /// `original` is the row as indexed; `updated` is the same row with
    /// the new provider or path applied. The written length is checked by
    /// reading the blob back before the index changes. The source copy is
    /// removed afterwards only when `remove_source` is set; failing to
    /// remove it is noted, not an error.
    async fn transfer(
        &self,
        original: &FileRecord,
        mut updated: FileRecord,
        data: Vec<u8>,
        remove_source: bool,
        report: &mut OperationReport,
    ) -> Result<()> {
        let expected = data.len() as u64;
        updated.data = data;
        updated.ext_client_ref = None;

        if let Some(target) = self.handle(updated.provider).await? {
            check_size(target.as_ref(), expected)?;
            let new_locator = target.save(&updated).await?;
            let actual = target.get(&new_locator).await?.len() as u64;
            if actual != expected {
                if let Err(e) = target.delete(&new_locator).await {
                    warn!(locator = %new_locator, error = %e, "Failed to remove unverified copy");
                }
                return Err(Error::IntegrityMismatch { expected, actual });
            }
            updated.ext_client_ref = Some(new_locator);
        }

        self.index.upsert(&mut updated)?;

        let moved_in_place = original.provider == updated.provider
            && original.ext_client_ref == updated.ext_client_ref;
        if remove_source && !moved_in_place {
            if let Err(e) = self.remove_blob(original).await {
                warn!(file_ref = %original.file_ref, version = original.version, error = %e, "Source copy not removed");
                report.note(format!(
                    "version {}: source copy not removed: {}",
                    original.version, e
                ));
            }
        }
        Ok(())
    }

    /// Run [`FileStore::transfer`] for each planned version, oldest first.
    ///
    /// A failed version is reported and the rest continue. Only a source
    /// provider that cannot be reached at all stops the run.
    async fn relocate(
        &self,
        file_ref: &FileRef,
        plan: Vec<(&FileRecord, FileRecord)>,
        remove_source: bool,
    ) -> OperationReport {
        let mut report = OperationReport::new();

        for (original, updated) in plan {
            let version = original.version;
            let data = match self.read_payload(original).await {
                Ok(data) => data,
                Err(e) if e.is_provider_unreachable() => {
                    error!(file_ref = %file_ref, version, error = %e, "Source unreachable, relocation aborted");
                    report.record_failure(format!("aborted at version {}: {}", version, e));
                    break;
                }
                Err(e) => {
                    warn!(file_ref = %file_ref, version, error = %e, "Source version unreadable");
                    report.record_failure(format!("version {}: {}", version, e));
                    continue;
                }
            };

            match self
                .transfer(original, updated, data, remove_source, &mut report)
                .await
            {
                Ok(()) => report.record_success(),
                Err(e) => {
                    warn!(file_ref = %file_ref, version, error = %e, "Version not relocated");
                    report.record_failure(format!("version {}: {}", version, e));
                }
            }
        }
        report
    }

    /// Relocate every version of a file to another provider.
    ///
    /// Versions are handled oldest first; those already on `target` are
    /// skipped. With `move_source` the source copy is deleted once the new
    /// copy is verified; otherwise it is left in place. A failed version is
    /// reported and the rest continue, unless the source provider turns out
    /// to be unreachable, which aborts the migration.
    ///
    /// # Errors
    /// - `Error::ProviderUnavailable` if `target` is not available
    pub async fn migrate(
        &self,
        file_ref: &FileRef,
        target: ProviderKind,
        move_source: bool,
    ) -> Result<OperationReport> {
        let versions = self.index.find_by_file_ref(file_ref)?;
        if versions.is_empty() {
            let mut report = OperationReport::new();
            report.note(format!("{} has no versions", file_ref));
            return Ok(report);
        }

        // Fail fast before reading anything if the target cannot be brought up.
        self.handle(target).await?;

        let plan = versions
            .iter()
            .rev()
            .filter(|r| r.provider != target)
            .map(|original| {
                let updated = FileRecord {
                    provider: target,
                    ..original.without_data()
                };
                (original, updated)
            })
            .collect();
        let report = self.relocate(file_ref, plan, move_source).await;

        info!(
            file_ref = %file_ref,
            target = %target,
            migrated = report.affected,
            success = report.success,
            "Migration finished"
        );
        Ok(report)
    }

    fn destination(&self, current: &FileRecord, new_path: &str) -> Result<Destination> {
        let trimmed = new_path.trim();
        if trimmed.ends_with(|c: char| path::SEPARATORS.contains(&c)) {
            return Ok(Destination {
                folder: canonical_folder(trimmed, self.prefix()),
                name: current.name.clone(),
                extension: current.extension.clone(),
                mime_type: current.mime_type.clone(),
            });
        }

        let info = PathInfo::parse(trimmed, self.prefix())?;
        Ok(Destination {
            folder: info.folder,
            name: info.name,
            extension: info.extension,
            mime_type: info.mime_type,
        })
    }

    /// Move every version of a file to a new logical path.
    ///
    /// The provider stays the same. A path ending in a separator names a
    /// folder and keeps the current file name.
    ///
    /// # Errors
    /// - `Error::AlreadyExists` if another file lives at the destination
    /// - `Error::InvalidPath` for a path that names neither file nor folder
    pub async fn move_file(&self, file_ref: &FileRef, new_path: &str) -> Result<OperationReport> {
        let versions = self.index.find_by_file_ref(file_ref)?;
        let Some(current) = versions.first() else {
            let mut report = OperationReport::new();
            report.note(format!("{} has no versions", file_ref));
            return Ok(report);
        };

        let dest = self.destination(current, new_path)?;
        if self
            .rows_at(&dest.folder, &dest.file_name())?
            .iter()
            .any(|row| row.file_ref != *file_ref)
        {
            return Err(Error::AlreadyExists(format!(
                "{}{} belongs to another file",
                dest.folder,
                dest.file_name()
            )));
        }

        let now = Utc::now();
        let plan = versions
            .iter()
            .rev()
            .filter(|original| {
                original.folder != dest.folder
                    || original.name != dest.name
                    || original.extension != dest.extension
            })
            .map(|original| {
                let updated = FileRecord {
                    folder: dest.folder.clone(),
                    name: dest.name.clone(),
                    extension: dest.extension.clone(),
                    mime_type: dest.mime_type.clone(),
                    modified: now,
                    ..original.without_data()
                };
                (original, updated)
            })
            .collect();
        let report = self.relocate(file_ref, plan, true).await;

        info!(
            file_ref = %file_ref,
            destination = %format!("{}{}", dest.folder, dest.file_name()),
            moved = report.affected,
            "Move finished"
        );
        Ok(report)
    }

    /// Index provider content that the index does not know about.
    ///
    /// Scans `scope_path` recursively (under the application prefix when
    /// `scope_to_app_prefix` is set) and gives every item whose folder,
    /// name and extension are not yet indexed a fresh chain. Existing rows
    /// are never touched, so repeated passes add nothing new.
    /// Items the provider fails to describe are counted and skipped.
    pub async fn reindex(
        &self,
        kind: ProviderKind,
        scope_path: &str,
        scope_to_app_prefix: bool,
    ) -> Result<ReindexSummary> {
        let handle = self.registry.require(kind).await?;
        let prefix = if scope_to_app_prefix { self.prefix() } else { None };
        let scope = canonical_folder(scope_path, prefix);

        let mut discovered = handle.index_contents(&scope, true).await?;
        let mut summary = ReindexSummary::default();

        while let Some(item) = discovered.next().await {
            let found = match item {
                Ok(found) => found,
                Err(e) => {
                    warn!(provider = %kind, error = %e, "Discovered item skipped");
                    summary.failed += 1;
                    continue;
                }
            };
            summary.discovered += 1;

            let folder = canonical_folder(&found.folder, None);
            let file_name = format!("{}{}", found.name, found.extension);
            if !self.rows_at(&folder, &file_name)?.is_empty() {
                continue;
            }

            let file_ref = self.mint_file_ref()?;
            let version = self
                .index
                .next_version_number(&folder, &found.name, &found.extension)?;
            let mut record = found.into_record(file_ref, kind, folder, version);
            self.index.upsert(&mut record)?;
            summary.added += 1;

            debug!(file_ref = %record.file_ref, path = %record.logical_path(), "Discovered file indexed");
        }

        info!(
            provider = %kind,
            scope = %scope,
            discovered = summary.discovered,
            added = summary.added,
            failed = summary.failed,
            "Reindex finished"
        );
        Ok(summary)
    }
}
