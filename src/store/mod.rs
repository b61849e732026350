//! Local record store for previously resolved identifiers.
//!
//! The store is a cache keyed by `(identifier, kind)`. The resolution engine
//! reads it before querying any source and writes the merged record back once
//! per identifier per run.
//!
//! # Overview
//!
//! - [`RecordStore`] - the data-access contract the engine depends on
//! - [`SqliteRecordStore`] - `SQLite`-backed implementation
//! - [`StoredRecord`] - a raw row, used by maintenance commands
//!
//! # Example
//!
//! ```ignore
//! use harvester_core::{Database, Identifier, MetadataRecord, RecordStore, SqliteRecordStore};
//! use std::path::Path;
//!
//! let db = Database::new(Path::new("records.db")).await?;
//! let store = SqliteRecordStore::new(db);
//! let id = Identifier::infer("9780191513015");
//! store.upsert(&id, &MetadataRecord::for_identifier(&id)).await?;
//! assert!(store.has(&id).await?);
//! ```

mod error;

pub use error::{StoreDbErrorKind, StoreError};

use async_trait::async_trait;
use sqlx::FromRow;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::identifier::{Identifier, IdentifierKind};
use crate::record::{Field, MetadataRecord};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Data-access contract for the resolution cache.
///
/// `upsert` must be idempotent and must not lose concurrent writes to
/// different identifiers.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns whether a record exists for `identifier`.
    async fn has(&self, identifier: &Identifier) -> Result<bool>;

    /// Loads the record stored for `identifier`.
    async fn get(&self, identifier: &Identifier) -> Result<Option<MetadataRecord>>;

    /// Inserts or updates the record for `identifier`.
    async fn upsert(&self, identifier: &Identifier, record: &MetadataRecord) -> Result<()>;
}

/// A raw stored row.
#[derive(Debug, Clone, FromRow)]
pub struct StoredRecord {
    /// Identifier the row is keyed by.
    pub identifier: String,
    /// Identifier kind stored as text (`isbn` or `oclc`).
    pub identifier_kind: String,
    /// Stored ISBN.
    pub isbn: Option<String>,
    /// Stored OCLC number.
    pub oclc: Option<String>,
    /// Stored call number.
    pub lccn: Option<String>,
    /// Source that supplied the call number.
    pub lccn_source: Option<String>,
    /// When the row was first written.
    pub created_at: String,
}

impl StoredRecord {
    /// Parses the row key back into an [`Identifier`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] for an unknown identifier kind.
    pub fn key(&self) -> Result<Identifier> {
        let kind = self
            .identifier_kind
            .parse::<IdentifierKind>()
            .map_err(|reason| StoreError::CorruptRow {
                identifier: self.identifier.clone(),
                reason,
            })?;
        Ok(Identifier::new(&self.identifier, kind))
    }

    /// Converts the row into a [`MetadataRecord`].
    #[must_use]
    pub fn to_record(&self) -> MetadataRecord {
        MetadataRecord {
            isbn: self.isbn.clone(),
            oclc: self.oclc.clone(),
            lccn: self.lccn.clone(),
            lccn_source: self.lccn_source.clone(),
        }
    }
}

/// `SQLite`-backed [`RecordStore`].
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db: Database,
}

impl SqliteRecordStore {
    /// Wraps an opened database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the number of stored records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// Lists stored rows, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: i64) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query_as::<_, StoredRecord>(
            r"SELECT identifier, identifier_kind, isbn, oclc, lccn, lccn_source, created_at
              FROM records
              ORDER BY created_at DESC, identifier ASC
              LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Deletes every stored record and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM records")
            .execute(self.db.pool())
            .await?;
        debug!(removed = result.rows_affected(), "cleared record store");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    #[instrument(skip(self), fields(identifier = %identifier))]
    async fn has(&self, identifier: &Identifier) -> Result<bool> {
        let (exists,): (i64,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM records WHERE identifier = ? AND identifier_kind = ?)",
        )
        .bind(identifier.value())
        .bind(identifier.kind().as_str())
        .fetch_one(self.db.pool())
        .await?;
        Ok(exists != 0)
    }

    #[instrument(skip(self), fields(identifier = %identifier))]
    async fn get(&self, identifier: &Identifier) -> Result<Option<MetadataRecord>> {
        let row = sqlx::query_as::<_, StoredRecord>(
            r"SELECT identifier, identifier_kind, isbn, oclc, lccn, lccn_source, created_at
              FROM records
              WHERE identifier = ? AND identifier_kind = ?",
        )
        .bind(identifier.value())
        .bind(identifier.kind().as_str())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.map(|row| row.to_record()))
    }

    /// Absent fields never erase stored values, and the LCCN attribution is
    /// replaced only together with the LCCN.
    #[instrument(skip(self, record), fields(identifier = %identifier))]
    async fn upsert(&self, identifier: &Identifier, record: &MetadataRecord) -> Result<()> {
        let lccn = record.get(Field::Lccn);
        let lccn_source = lccn.and(record.get(Field::LccnSource));

        sqlx::query(
            r"INSERT INTO records (identifier, identifier_kind, isbn, oclc, lccn, lccn_source)
              VALUES (?, ?, ?, ?, ?, ?)
              ON CONFLICT (identifier, identifier_kind) DO UPDATE SET
                  isbn = COALESCE(excluded.isbn, records.isbn),
                  oclc = COALESCE(excluded.oclc, records.oclc),
                  lccn_source = CASE WHEN excluded.lccn IS NOT NULL
                                     THEN excluded.lccn_source
                                     ELSE records.lccn_source END,
                  lccn = COALESCE(excluded.lccn, records.lccn)",
        )
        .bind(identifier.value())
        .bind(identifier.kind().as_str())
        .bind(record.get(Field::Isbn))
        .bind(record.get(Field::Oclc))
        .bind(lccn)
        .bind(lccn_source)
        .execute(self.db.pool())
        .await?;

        debug!("upserted record");
        Ok(())
    }
}
