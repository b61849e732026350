//! `SQLite` pool setup for the record store.
//!
//! File-backed databases run in WAL mode with a per-connection busy timeout so
//! concurrent resolutions can write without tripping over `SQLITE_BUSY`.
//! The schema lives in `migrations/` and is applied on open.
//!
//! ```no_run
//! use harvester_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("records.db")).await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// `SQLite` locks the whole file, so a handful of connections is plenty.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// Failures opening or migrating the record database.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to create database directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("failed to apply schema migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pool tuning for file-backed databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Busy timeout applied to every connection, in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// A migrated connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database at `db_path` with [`DatabaseOptions::default`].
    ///
    /// # Errors
    ///
    /// See [`Database::new_with_options`].
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        Self::new_with_options(db_path, &DatabaseOptions::default()).await
    }

    /// Opens the database at `db_path`, creating the file and its parent
    /// directory when missing, then applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Directory`] if the parent directory cannot be created,
    /// [`DbError::Connection`] if the pool cannot connect, or
    /// [`DbError::Migration`] if the schema cannot be applied.
    #[instrument(skip(db_path, options), fields(path = %db_path.display()))]
    pub async fn new_with_options(
        db_path: &Path,
        options: &DatabaseOptions,
    ) -> Result<Self, DbError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DbError::Directory {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let connect = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(u64::from(options.busy_timeout_ms)));
        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await?;

        Self::migrated(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// Limited to one connection: every new in-memory connection would see
    /// an empty database of its own.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] or [`DbError::Migration`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await?;

        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("record database ready");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Reports whether the database runs in WAL mode.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the pragma query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.eq_ignore_ascii_case("wal"))
    }

    /// Closes every pooled connection, flushing the WAL.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_has_records_table() {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO records (identifier, identifier_kind, oclc) VALUES ('9780191513015', 'isbn', '123')",
        )
        .execute(db.pool())
        .await
        .unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn test_identifier_kind_is_constrained() {
        let db = Database::new_in_memory().await.unwrap();
        let result = sqlx::query(
            "INSERT INTO records (identifier, identifier_kind) VALUES ('x', 'issn')",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_and_enables_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("records.db");

        let db = Database::new(&db_path).await.unwrap();
        assert!(db_path.exists());
        assert!(db.is_wal_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_directory_error_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let err = Database::new(&blocker.join("records.db")).await.unwrap_err();
        assert!(matches!(err, DbError::Directory { .. }));
        assert!(err.to_string().contains("file"));
    }
}
