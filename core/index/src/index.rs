//! SQLite-backed catalog of file versions.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use strata_common::{Error, FileRecord, FileRef, Result};

use crate::schema::{create_statements, map_row, table_name, META_COLUMNS};

/// Where the index database lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexLocation {
    /// Private in-memory database, gone on drop.
    Memory,
    /// Database file on disk.
    File(PathBuf),
}

impl Default for IndexLocation {
    fn default() -> Self {
        IndexLocation::Memory
    }
}

fn index_err(err: rusqlite::Error) -> Error {
    Error::Index(err.to_string())
}

fn sql_size(size: u64) -> Result<i64> {
    i64::try_from(size).map_err(|_| Error::InvalidInput(format!("size {} out of range", size)))
}

/// Durable catalog of file metadata rows.
///
/// Every row is one stored version. Rows sharing a `file_ref`, ordered by
/// `id` descending, form that file's version history, newest first.
pub struct VersionedIndex {
    conn: Mutex<Connection>,
    table: String,
}

impl VersionedIndex {
    /// Open (or create) the index and verify it is usable.
    ///
    /// # Errors
    /// - `Error::Configuration` if `namespace` is not an identifier
    /// - `Error::IndexUnavailable` if the store cannot be opened, the
    ///   schema cannot be created, or the readiness query fails
    pub fn open(location: &IndexLocation, namespace: &str) -> Result<Self> {
        let table = table_name(namespace)?;
        let unavailable = |e: rusqlite::Error| Error::IndexUnavailable(e.to_string());

        let conn = match location {
            IndexLocation::Memory => Connection::open_in_memory(),
            IndexLocation::File(path) => Connection::open(path),
        }
        .map_err(unavailable)?;

        conn.execute_batch(&create_statements(&table))
            .map_err(unavailable)?;
        let rows: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .map_err(unavailable)?;

        info!(table = %table, rows, "Index opened");
        Ok(Self {
            conn: Mutex::new(conn),
            table,
        })
    }

    /// Create an in-memory index (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(&IndexLocation::Memory, "strata")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Index("index connection lock poisoned".to_string()))
    }

    fn query(&self, sql: &str, values: Vec<SqlValue>) -> Result<Vec<FileRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(index_err)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| map_row(row, false))
            .map_err(index_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(index_err)
    }

    /// Rows in a folder, newest first, without payloads.
    ///
    /// With `include_subfolders`, `path_prefix` is matched as a prefix of
    /// the folder instead of by equality. `name_filter` matches
    /// `name + extension` exactly when `exact_match` is set, otherwise as a
    /// case-insensitive substring.
    pub fn find_by_folder(
        &self,
        path_prefix: &str,
        include_subfolders: bool,
        name_filter: Option<&str>,
        exact_match: bool,
    ) -> Result<Vec<FileRecord>> {
        let mut sql = format!("SELECT {} FROM {} WHERE ", META_COLUMNS, self.table);
        let mut values = vec![SqlValue::Text(path_prefix.to_string())];

        if include_subfolders {
            sql.push_str("substr(folder, 1, ?2) = ?1");
            values.push(SqlValue::Integer(path_prefix.chars().count() as i64));
        } else {
            sql.push_str("folder = ?1");
        }

        if let Some(filter) = name_filter {
            let idx = values.len() + 1;
            if exact_match {
                sql.push_str(&format!(" AND (name || extension) = ?{}", idx));
                values.push(SqlValue::Text(filter.to_string()));
            } else {
                sql.push_str(&format!(" AND instr(lower(name || extension), ?{}) > 0", idx));
                values.push(SqlValue::Text(filter.to_ascii_lowercase()));
            }
        }
        sql.push_str(" ORDER BY id DESC");

        debug!(folder = %path_prefix, include_subfolders, ?name_filter, "Folder lookup");
        self.query(&sql, values)
    }

    /// All versions of a file, newest first, without payloads.
    pub fn find_by_file_ref(&self, file_ref: &FileRef) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE file_ref = ?1 ORDER BY id DESC",
            META_COLUMNS, self.table
        );
        self.query(&sql, vec![SqlValue::Text(file_ref.to_string())])
    }

    /// A single row, including its payload when embedded.
    pub fn get(&self, id: i64) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {}, data FROM {} WHERE id = ?1", META_COLUMNS, self.table);
        let conn = self.lock()?;
        conn.query_row(&sql, [id], |row| map_row(row, true))
            .optional()
            .map_err(index_err)
    }

    /// One past the highest version recorded for a key, or 1.
    pub fn next_version_number(&self, folder: &str, name: &str, extension: &str) -> Result<u32> {
        let sql = format!(
            "SELECT COALESCE(MAX(version), 0) FROM {} \
             WHERE folder = ?1 AND name = ?2 AND extension = ?3",
            self.table
        );
        let conn = self.lock()?;
        let max: u32 = conn
            .query_row(&sql, params![folder, name, extension], |row| row.get(0))
            .map_err(index_err)?;
        Ok(max + 1)
    }

    /// Whether no row carries `file_ref`.
    pub fn is_file_ref_unique(&self, file_ref: &FileRef) -> Result<bool> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE file_ref = ?1", self.table);
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(&sql, [file_ref.as_str()], |row| row.get(0))
            .map_err(index_err)?;
        Ok(count == 0)
    }

    /// Insert a row (when `record.id` is `None`) or update it by id.
    ///
    /// The payload is dropped for every provider except the embedded one,
    /// and embedded rows never carry a locator, whatever the caller passed.
    /// On insert the assigned id is written back to `record`.
    ///
    /// # Errors
    /// - `Error::NotFound` when updating an id that does not exist
    pub fn upsert(&self, record: &mut FileRecord) -> Result<i64> {
        if record.provider.is_embedded() {
            record.ext_client_ref = None;
        } else {
            record.data.clear();
        }

        let data: Option<&[u8]> = if record.data.is_empty() {
            None
        } else {
            Some(record.data.as_slice())
        };
        let size = sql_size(record.size_in_bytes)?;
        let created = record.created.to_rfc3339();
        let modified = record.modified.to_rfc3339();

        let conn = self.lock()?;
        match record.id {
            None => {
                let sql = format!(
                    "INSERT INTO {} (file_ref, name, extension, mime_type, description, \
                     uploaded_by, folder, ext_client_ref, provider_id, version, size_in_bytes, \
                     data, created, modified) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    self.table
                );
                conn.execute(
                    &sql,
                    params![
                        record.file_ref.as_str(),
                        record.name,
                        record.extension,
                        record.mime_type,
                        record.description,
                        record.uploaded_by,
                        record.folder,
                        record.ext_client_ref,
                        record.provider.id(),
                        record.version,
                        size,
                        data,
                        created,
                        modified,
                    ],
                )
                .map_err(index_err)?;

                let id = conn.last_insert_rowid();
                record.id = Some(id);
                debug!(id, file_ref = %record.file_ref, version = record.version, "Row inserted");
                Ok(id)
            }
            Some(id) => {
                let sql = format!(
                    "UPDATE {} SET file_ref = ?1, name = ?2, extension = ?3, mime_type = ?4, \
                     description = ?5, uploaded_by = ?6, folder = ?7, ext_client_ref = ?8, \
                     provider_id = ?9, version = ?10, size_in_bytes = ?11, data = ?12, \
                     created = ?13, modified = ?14 WHERE id = ?15",
                    self.table
                );
                let changed = conn
                    .execute(
                        &sql,
                        params![
                            record.file_ref.as_str(),
                            record.name,
                            record.extension,
                            record.mime_type,
                            record.description,
                            record.uploaded_by,
                            record.folder,
                            record.ext_client_ref,
                            record.provider.id(),
                            record.version,
                            size,
                            data,
                            created,
                            modified,
                            id,
                        ],
                    )
                    .map_err(index_err)?;

                if changed == 0 {
                    return Err(Error::NotFound(format!("No index row with id {}", id)));
                }
                debug!(id, file_ref = %record.file_ref, "Row updated");
                Ok(id)
            }
        }
    }

    /// Delete a row. Returns `false` if it did not exist.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.table);
        let conn = self.lock()?;
        let changed = conn.execute(&sql, [id]).map_err(index_err)?;
        debug!(id, removed = changed > 0, "Row deleted");
        Ok(changed > 0)
    }

    /// Total number of rows.
    pub fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let conn = self.lock()?;
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0)).map_err(index_err)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strata_common::ProviderKind;
    use tempfile::TempDir;

    fn record(folder: &str, name: &str, ext: &str, provider: ProviderKind) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: None,
            file_ref: FileRef::generate(),
            name: name.to_string(),
            extension: ext.to_string(),
            mime_type: "text/plain".to_string(),
            description: Some("notes".to_string()),
            uploaded_by: None,
            folder: folder.to_string(),
            ext_client_ref: Some("blob-key".to_string()),
            provider,
            version: 1,
            size_in_bytes: 5,
            created: now,
            modified: now,
            data: b"hello".to_vec(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let index = VersionedIndex::in_memory().unwrap();
        let mut row = record("A/", "a", ".txt", ProviderKind::Database);

        let id = index.upsert(&mut row).unwrap();
        assert_eq!(row.id, Some(id));

        let stored = index.get(id).unwrap().unwrap();
        assert_eq!(stored.data, b"hello");
        assert_eq!(stored.ext_client_ref, None);
        assert_eq!(stored.description.as_deref(), Some("notes"));
        assert_eq!(stored.created, row.created);
        assert!(index.get(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_payload_dropped_for_external_providers() {
        let index = VersionedIndex::in_memory().unwrap();
        let mut row = record("A/", "a", ".txt", ProviderKind::FileSystem);

        let id = index.upsert(&mut row).unwrap();
        assert!(row.data.is_empty());

        let stored = index.get(id).unwrap().unwrap();
        assert!(stored.data.is_empty());
        assert_eq!(stored.ext_client_ref.as_deref(), Some("blob-key"));
        assert_eq!(stored.size_in_bytes, 5);
    }

    #[test]
    fn test_update_in_place() {
        let index = VersionedIndex::in_memory().unwrap();
        let mut row = record("A/", "a", ".txt", ProviderKind::Database);
        let id = index.upsert(&mut row).unwrap();

        row.provider = ProviderKind::ObjectStore;
        row.ext_client_ref = Some("A/a_v1.txt".to_string());
        row.data = b"hello".to_vec();
        assert_eq!(index.upsert(&mut row).unwrap(), id);

        assert_eq!(index.count().unwrap(), 1);
        let stored = index.get(id).unwrap().unwrap();
        assert_eq!(stored.provider, ProviderKind::ObjectStore);
        assert!(stored.data.is_empty());

        row.id = Some(999);
        assert!(matches!(index.upsert(&mut row), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_history_is_newest_first() {
        let index = VersionedIndex::in_memory().unwrap();
        let file_ref = FileRef::generate();
        for version in 1..=3 {
            let mut row = record("A/", "a", ".txt", ProviderKind::Database);
            row.file_ref = file_ref.clone();
            row.version = version;
            index.upsert(&mut row).unwrap();
        }

        let versions: Vec<u32> = index
            .find_by_file_ref(&file_ref)
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![3, 2, 1]);
        assert!(index.find_by_file_ref(&file_ref).unwrap()[0].data.is_empty());
    }

    #[test]
    fn test_next_version_and_uniqueness() {
        let index = VersionedIndex::in_memory().unwrap();
        assert_eq!(index.next_version_number("A/", "a", ".txt").unwrap(), 1);

        let mut row = record("A/", "a", ".txt", ProviderKind::Database);
        row.version = 4;
        let id = index.upsert(&mut row).unwrap();

        assert_eq!(index.next_version_number("A/", "a", ".txt").unwrap(), 5);
        assert_eq!(index.next_version_number("A/", "a", ".md").unwrap(), 1);
        assert!(!index.is_file_ref_unique(&row.file_ref).unwrap());

        assert!(index.delete(id).unwrap());
        assert!(!index.delete(id).unwrap());
        assert!(index.is_file_ref_unique(&row.file_ref).unwrap());
    }

    #[test]
    fn test_find_by_folder() {
        let index = VersionedIndex::in_memory().unwrap();
        for (folder, name) in [
            ("A/", "Report"),
            ("A/", "summary"),
            ("A/B/", "report"),
            ("AB/", "other"),
        ] {
            index
                .upsert(&mut record(folder, name, ".pdf", ProviderKind::Database))
                .unwrap();
        }

        assert_eq!(index.find_by_folder("A/", false, None, false).unwrap().len(), 2);
        assert_eq!(index.find_by_folder("A/", true, None, false).unwrap().len(), 3);
        assert_eq!(index.find_by_folder("", true, None, false).unwrap().len(), 4);
        assert_eq!(index.find_by_folder("a/", false, None, false).unwrap().len(), 0);

        let fuzzy = index.find_by_folder("A/", true, Some("REPORT"), false).unwrap();
        assert_eq!(fuzzy.len(), 2);

        let exact = index.find_by_folder("A/", false, Some("Report.pdf"), true).unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].name, "Report");
        assert!(index
            .find_by_folder("A/", false, Some("report.pdf"), true)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_ids_never_reused() {
        let index = VersionedIndex::in_memory().unwrap();
        let first = index
            .upsert(&mut record("", "a", ".txt", ProviderKind::Database))
            .unwrap();
        index.delete(first).unwrap();
        let second = index
            .upsert(&mut record("", "a", ".txt", ProviderKind::Database))
            .unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_file_index_persists() {
        let temp = TempDir::new().unwrap();
        let location = IndexLocation::File(temp.path().join("index.db"));

        let id = {
            let index = VersionedIndex::open(&location, "tenant").unwrap();
            index
                .upsert(&mut record("A/", "a", ".txt", ProviderKind::Database))
                .unwrap()
        };

        let reopened = VersionedIndex::open(&location, "tenant").unwrap();
        assert_eq!(reopened.get(id).unwrap().unwrap().data, b"hello");
    }

    #[test]
    fn test_unreachable_store_fails_fast() {
        let temp = TempDir::new().unwrap();
        let location = IndexLocation::File(temp.path().join("missing").join("index.db"));

        let result = VersionedIndex::open(&location, "strata");
        assert!(matches!(result, Err(Error::IndexUnavailable(_))));
    }

    #[test]
    fn test_bad_namespace() {
        let result = VersionedIndex::open(&IndexLocation::Memory, "no-dashes");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
