//! Table layout and row mapping.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;

use strata_common::{Error, FileRecord, FileRef, ProviderKind, Result};

/// Columns read for metadata-only queries, in row-mapping order.
pub(crate) const META_COLUMNS: &str = "id, file_ref, name, extension, mime_type, description, \
     uploaded_by, folder, ext_client_ref, provider_id, version, size_in_bytes, created, modified";

/// Check that a namespace can be used as a table name prefix.
///
/// It must be an ASCII identifier: a letter or `_`, then letters, digits
/// or `_`.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    let valid = namespace
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && namespace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(Error::Configuration(format!(
            "index namespace '{}' is not a valid identifier",
            namespace
        )));
    }
    Ok(())
}

/// Validate a namespace and derive the table name from it.
pub(crate) fn table_name(namespace: &str) -> Result<String> {
    validate_namespace(namespace)?;
    Ok(format!("{}_file_records", namespace))
}

/// Idempotent schema creation for `table`.
pub(crate) fn create_statements(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {t} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_ref TEXT NOT NULL,
            name TEXT NOT NULL,
            extension TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            description TEXT,
            uploaded_by TEXT,
            folder TEXT NOT NULL,
            ext_client_ref TEXT,
            provider_id INTEGER NOT NULL,
            version INTEGER NOT NULL,
            size_in_bytes INTEGER NOT NULL,
            data BLOB,
            created TEXT NOT NULL,
            modified TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_{t}_file_ref ON {t}(file_ref);
        CREATE INDEX IF NOT EXISTS idx_{t}_key ON {t}(folder, name, extension);
        "#,
        t = table
    )
}

fn conversion_error(idx: usize, ty: Type, err: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, Type::Text, Error::Serialization(e.to_string())))
}

/// Map a row selected with [`META_COLUMNS`] (plus `data` when `with_data`).
pub(crate) fn map_row(row: &Row<'_>, with_data: bool) -> rusqlite::Result<FileRecord> {
    let file_ref: String = row.get(1)?;
    let file_ref = FileRef::new(file_ref).map_err(|e| conversion_error(1, Type::Text, e))?;
    let provider_id: i64 = row.get(9)?;
    let provider =
        ProviderKind::from_id(provider_id).map_err(|e| conversion_error(9, Type::Integer, e))?;
    let size: i64 = row.get(11)?;

    let data = if with_data {
        row.get::<_, Option<Vec<u8>>>(14)?.unwrap_or_default()
    } else {
        Vec::new()
    };

    Ok(FileRecord {
        id: Some(row.get(0)?),
        file_ref,
        name: row.get(2)?,
        extension: row.get(3)?,
        mime_type: row.get(4)?,
        description: row.get(5)?,
        uploaded_by: row.get(6)?,
        folder: row.get(7)?,
        ext_client_ref: row.get(8)?,
        provider,
        version: row.get(10)?,
        size_in_bytes: u64::try_from(size).unwrap_or_default(),
        created: timestamp(row, 12)?,
        modified: timestamp(row, 13)?,
        data,
    })
}
