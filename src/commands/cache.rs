//! Cache command handlers: inspect and clear the record store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use harvester_core::{Database, SqliteRecordStore, StoredRecord};

use crate::app_config::{load_config, resolve_default_database_path};
use crate::cli::CacheCommand;

/// Header of `cache show` output.
const CACHE_SHOW_HEADER: &str = "Identifier\tKind\tISBN\tOCLC\tLCCN\tLCCN-Source\tStored-At";

pub async fn run_cache_command(
    command: &CacheCommand,
    db: Option<&Path>,
    config: Option<&Path>,
) -> Result<()> {
    let path = database_path(db, config)?;
    let database = Database::new(&path)
        .await
        .with_context(|| format!("Failed to open record store '{}'", path.display()))?;
    let store = SqliteRecordStore::new(database);

    match command {
        CacheCommand::Show { limit } => {
            let rows = store.list(i64::from(*limit)).await?;
            println!("{CACHE_SHOW_HEADER}");
            for row in &rows {
                println!("{}", format_stored_row(row));
            }
        }
        CacheCommand::Clear => {
            let removed = store.clear().await?;
            println!("Removed {removed} records from {}", path.display());
        }
        CacheCommand::Stats => {
            let count = store.count().await?;
            println!("path = {}", path.display());
            println!("records = {count}");
        }
    }
    Ok(())
}

/// `--db`, then the config file's `database_path`, then the XDG default.
fn database_path(db: Option<&Path>, config: Option<&Path>) -> Result<PathBuf> {
    if let Some(db) = db {
        return Ok(db.to_path_buf());
    }
    let loaded = load_config(config)?;
    loaded
        .config
        .database_path
        .or_else(resolve_default_database_path)
        .context("Cannot determine the record store location.\n  Suggestion: Pass --db <PATH>")
}

pub(crate) fn format_stored_row(row: &StoredRecord) -> String {
    [
        Some(row.identifier.as_str()),
        Some(row.identifier_kind.as_str()),
        row.isbn.as_deref(),
        row.oclc.as_deref(),
        row.lccn.as_deref(),
        row.lccn_source.as_deref(),
        Some(row.created_at.as_str()),
    ]
    .into_iter()
    .map(Option::unwrap_or_default)
    .collect::<Vec<_>>()
    .join("\t")
}
