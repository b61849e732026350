//! Top-level run flow: parse CLI, dispatch subcommands, run a harvest batch.

use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result, bail};
use clap::Parser;
use harvester_core::{
    Database, MetadataRecord, ProbeOptions, RateLimiter, RecordStore, ResolutionEngine, ResolutionRun, RunStats,
    SqliteRecordStore, build_source_registry, read_input, write_output,
};
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::run_settings::{RunSettings, resolve_run_settings};
use crate::app::{command_dispatcher, exit_handler, progress_manager, terminal};
use crate::app_config::load_config;
use crate::cli::Cli;

pub(crate) async fn run_harvester() -> Result<ProcessExit> {
    let cli = Cli::parse();
    terminal::init_tracing(terminal::default_log_level(cli.verbose, cli.quiet));
    debug!(?cli, "CLI arguments parsed");

    if let Some(exit) = command_dispatcher::try_dispatch(&cli).await? {
        return Ok(exit);
    }

    let loaded = load_config(cli.config.as_deref())?;
    if loaded.loaded_from_file
        && let Some(path) = &loaded.path
    {
        debug!(path = %path.display(), "loaded config file");
    }
    let settings = resolve_run_settings(&cli.harvest, &loaded.config)?;
    run_harvest(&settings, cli.quiet).await
}

async fn open_store(path: Option<&Path>) -> Result<Option<Arc<dyn RecordStore>>> {
    let Some(path) = path else {
        info!("record store disabled");
        return Ok(None);
    };
    let db = Database::new(path)
        .await
        .with_context(|| format!("Failed to open record store '{}'", path.display()))?;
    debug!(path = %path.display(), "record store open");
    Ok(Some(Arc::new(SqliteRecordStore::new(db))))
}

pub(crate) async fn run_harvest(settings: &RunSettings, quiet: bool) -> Result<ProcessExit> {
    info!("Harvester starting");

    let batch = read_input(&settings.input)?;
    let (Some(sample), Some(kind)) = (batch.identifiers.first(), batch.kind) else {
        warn!(input = %settings.input.display(), "input holds no identifiers");
        write_output(&settings.output, std::iter::empty::<&MetadataRecord>())?;
        return Ok(ProcessExit::Success);
    };
    info!(
        identifiers = batch.identifiers.len(),
        kind = %kind,
        mismatched = batch.mismatched,
        "read input"
    );

    let limiter = Arc::new(RateLimiter::new(settings.source_settings.default_rate_limit));
    let registry = build_source_registry(&settings.source_settings, &limiter);
    let adapters = registry.select(&settings.source_order);
    if adapters.is_empty() {
        bail!(
            "None of the requested sources ({}) is known.\n  Suggestion: Choose from: {}",
            settings.source_order.join(", "),
            registry.names().join(", ")
        );
    }

    let run = ResolutionRun::prepare(
        adapters,
        sample,
        settings.wanted.clone(),
        ProbeOptions {
            skip_network: settings.skip_probe,
        },
    )
    .await;
    if run.usable_sources().next().is_none() {
        warn!("no usable source for this run; only stored records can be used");
    }

    let store = open_store(settings.database_path.as_deref()).await?;
    let engine = ResolutionEngine::new(store, settings.concurrency)?;

    let cancel = run.cancel_flag();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let use_bar = terminal::should_use_progress_bar(
        io::stderr().is_terminal(),
        quiet,
        terminal::is_dumb_terminal(),
    );
    let total = batch.identifiers.len();
    let bar = progress_manager::create_progress_ui(use_bar, total);
    let outcome = engine
        .resolve_batch(&run, &batch.identifiers, |resolution, done, _total| {
            progress_manager::report_progress(bar.as_ref(), resolution, done);
        })
        .await;
    progress_manager::finish_progress_ui(bar);
    signal_task.abort();

    write_output(
        &settings.output,
        outcome.resolutions.iter().map(|resolution| &resolution.record),
    )?;
    info!(
        output = %settings.output.display(),
        rows = outcome.resolutions.len(),
        "wrote results"
    );

    if !quiet {
        for line in summary_lines(run.stats(), total, &settings.output) {
            println!("{line}");
        }
    }

    if outcome.interrupted {
        warn!(
            processed = outcome.resolutions.len(),
            total, "Interrupted. Rows resolved so far were written."
        );
    }

    Ok(exit_handler::determine_exit_outcome(
        run.stats(),
        outcome.interrupted,
    ))
}

/// Human-readable end-of-run summary.
pub(crate) fn summary_lines(stats: &RunStats, total: usize, output: &Path) -> Vec<String> {
    let mut lines = vec![format!(
        "Processed {}/{total} identifiers: {} complete, {} incomplete, {} from cache",
        stats.processed(),
        stats.complete(),
        stats.incomplete(),
        stats.cache_hits()
    )];
    if stats.source_failures() > 0 {
        lines.push(format!(
            "{} of {} source calls failed",
            stats.source_failures(),
            stats.source_calls()
        ));
    }
    if stats.store_failures() > 0 {
        lines.push(format!(
            "{} record store operations failed",
            stats.store_failures()
        ));
    }
    if stats.skipped() > 0 {
        lines.push(format!("{} identifiers skipped after interrupt", stats.skipped()));
    }
    lines.push(format!("Results written to {}", output.display()));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::FileConfig;
    use crate::cli::HarvestArgs;

    #[test]
    fn test_summary_lines_for_clean_run() {
        let lines = summary_lines(&RunStats::new(), 0, Path::new("out.tsv"));
        assert_eq!(
            lines,
            vec![
                "Processed 0/0 identifiers: 0 complete, 0 incomplete, 0 from cache".to_string(),
                "Results written to out.tsv".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_harvest_with_empty_input_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.tsv");
        std::fs::write(&input, "\n\n").unwrap();
        let args = HarvestArgs {
            input: Some(input),
            no_cache: true,
            ..HarvestArgs::default()
        };
        let settings = resolve_run_settings(&args, &FileConfig::default()).unwrap();

        let exit = run_harvest(&settings, true).await.unwrap();
        assert_eq!(exit, ProcessExit::Success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("empty_results.tsv")).unwrap(),
            "ISBN\tOCLC\tLCCN\tLCCN-Source\n"
        );
    }

    #[tokio::test]
    async fn test_run_harvest_rejects_unknown_sources() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.tsv");
        std::fs::write(&input, "9780191513015\n").unwrap();
        let args = HarvestArgs {
            input: Some(input),
            output: Some(dir.path().join("out.tsv")),
            sources: vec!["Nowhere".to_string()],
            no_cache: true,
            ..HarvestArgs::default()
        };
        let settings = resolve_run_settings(&args, &FileConfig::default()).unwrap();

        let err = run_harvest(&settings, true).await.unwrap_err();
        assert!(err.to_string().contains("Nowhere"));
    }
}
