//! CLI command routing: runs Config and Cache subcommands.
//!
//! If the user invoked a subcommand (e.g. `harvester cache stats`), this
//! module runs the corresponding handler and returns the exit outcome.
//! Otherwise returns `None` so the caller continues with the harvest flow.

use anyhow::Result;

use crate::cli::{Cli, Command};
use crate::{ProcessExit, commands};

/// If `cli` has a subcommand, run it and return `Some(exit)`; otherwise return `None`.
pub(crate) async fn try_dispatch(cli: &Cli) -> Result<Option<ProcessExit>> {
    let Some(command) = &cli.command else {
        return Ok(None);
    };

    match command {
        Command::Config { command } => {
            commands::run_config_command(command, cli.config.as_deref())?;
        }
        Command::Cache { db, command } => {
            commands::run_cache_command(command, db.as_deref(), cli.config.as_deref()).await?;
        }
    }

    Ok(Some(ProcessExit::Success))
}
