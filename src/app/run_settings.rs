//! Effective settings of one harvest run: CLI flags over file config over defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use harvester_core::source::SourceSettings;
use harvester_core::{WantedFields, default_output_path};

use crate::app_config::{FileConfig, resolve_default_database_path};
use crate::cli::HarvestArgs;

#[derive(Debug, Clone)]
pub(crate) struct RunSettings {
    pub(crate) input: PathBuf,
    pub(crate) output: PathBuf,
    pub(crate) source_order: Vec<String>,
    pub(crate) wanted: WantedFields,
    pub(crate) source_settings: SourceSettings,
    pub(crate) concurrency: usize,
    /// `None` when the record store is disabled.
    pub(crate) database_path: Option<PathBuf>,
    pub(crate) skip_probe: bool,
}

pub(crate) fn resolve_run_settings(args: &HarvestArgs, config: &FileConfig) -> Result<RunSettings> {
    let input = args
        .input
        .clone()
        .context("No input file given.\n  Suggestion: Run `harvester <INPUT>`")?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&input));

    let wanted = WantedFields::from_toggles(
        config.retrieve_isbn.unwrap_or(true) && !args.no_isbn,
        config.retrieve_oclc.unwrap_or(true) && !args.no_oclc,
        config.retrieve_lccn.unwrap_or(true) && !args.no_lccn,
    );
    if wanted.is_empty() {
        bail!(
            "Every field is disabled; nothing to retrieve.\n  Suggestion: Drop one of --no-isbn, --no-oclc, --no-lccn"
        );
    }

    let source_order = if args.sources.is_empty() {
        config.source_order()
    } else {
        args.sources
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    };

    let source_settings = config.source_settings(args.timeout.map(Duration::from_secs))?;
    let concurrency = args
        .concurrency
        .map_or_else(|| config.concurrency(), usize::from);

    let database_path = if args.no_cache {
        None
    } else {
        let path = args
            .db
            .clone()
            .or_else(|| config.database_path.clone())
            .or_else(resolve_default_database_path)
            .context(
                "Cannot determine the record store location.\n  Suggestion: Pass --db <PATH> or --no-cache",
            )?;
        Some(path)
    };

    Ok(RunSettings {
        input,
        output,
        source_order,
        wanted,
        source_settings,
        concurrency,
        database_path,
        skip_probe: args.skip_probe,
    })
}
