//! SQLite-based image catalog.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::image::{ImageKind, ImageRecord};

/// Errors from catalog operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Image not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid record: {0}")]
    Invalid(String),
}

/// SQLite image catalog.
pub struct ImageStore {
    conn: Connection,
}

impl ImageStore {
    /// Open or create a catalog at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateStoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self { conn };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory catalog (for testing).
    pub fn open_in_memory() -> Result<Self, StateStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StateStoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                uuid TEXT PRIMARY KEY,
                path_prefix TEXT NOT NULL,
                filename TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                size INTEGER NOT NULL DEFAULT 0,
                verification_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_images_prefix ON images(path_prefix);
            "#,
        )?;

        debug!("Image catalog schema initialized");
        Ok(())
    }

    /// Insert or replace an image record.
    ///
    /// Only verified records are accepted.
    pub fn put_image(&self, record: &ImageRecord) -> Result<(), StateStoreError> {
        let hash = record.verification_hash.as_deref().ok_or_else(|| {
            StateStoreError::Invalid(format!("image {} has no verification hash", record.uuid))
        })?;
        let size = i64::try_from(record.size)
            .map_err(|_| StateStoreError::Invalid(format!("size out of range: {}", record.size)))?;

        self.conn.execute(
            r#"
            INSERT INTO images (uuid, path_prefix, filename, description, size, verification_hash, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(uuid) DO UPDATE SET
                path_prefix = excluded.path_prefix,
                filename = excluded.filename,
                description = excluded.description,
                size = excluded.size,
                verification_hash = excluded.verification_hash
            "#,
            params![
                record.uuid.to_string(),
                record.path_prefix(),
                record.filename,
                record.description,
                size,
                hash,
                chrono::Utc::now().timestamp(),
            ],
        )?;

        debug!(uuid = %record.uuid, "Stored image record");
        Ok(())
    }

    /// Get an image record.
    pub fn get_image(&self, uuid: &Uuid) -> Result<Option<ImageRecord>, StateStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid, path_prefix, filename, description, size, verification_hash
             FROM images WHERE uuid = ?1",
        )?;

        let row = stmt
            .query_row(params![uuid.to_string()], RawImageRow::from_row)
            .optional()?;

        row.map(RawImageRow::into_record).transpose()
    }

    /// Delete an image record. Returns whether a row was removed.
    pub fn delete_image(&self, uuid: &Uuid) -> Result<bool, StateStoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM images WHERE uuid = ?1", params![uuid.to_string()])?;
        Ok(deleted > 0)
    }
}

/// Columns as stored, before validation.
struct RawImageRow {
    uuid: String,
    path_prefix: String,
    filename: String,
    description: String,
    size: i64,
    verification_hash: String,
}

impl RawImageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            path_prefix: row.get(1)?,
            filename: row.get(2)?,
            description: row.get(3)?,
            size: row.get(4)?,
            verification_hash: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<ImageRecord, StateStoreError> {
        let uuid = Uuid::parse_str(&self.uuid)
            .map_err(|e| StateStoreError::Invalid(format!("uuid {}: {}", self.uuid, e)))?;
        let kind: ImageKind = self.path_prefix.parse().map_err(StateStoreError::Invalid)?;

        let mut record = ImageRecord::new(kind, uuid).with_description(self.description);
        record.filename = self.filename;
        record.size = u64::try_from(self.size).unwrap_or(0);
        record.verification_hash = Some(self.verification_hash);
        Ok(record)
    }
}
