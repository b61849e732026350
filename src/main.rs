//! CLI entry point for the harvester tool.

use std::process::ExitCode;

use tracing::error;

mod app;
mod app_config;
mod cli;
mod commands;

/// Process exit outcome of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every identifier processed and complete.
    Success,
    /// Every identifier processed; some incomplete or not persisted.
    Partial,
    /// Interrupted before every identifier was processed.
    Interrupted,
    /// Fatal error.
    Failure,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
            Self::Interrupted => 130,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match app::runtime::run_harvester().await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(err) => {
            error!(error = %format!("{err:#}"), "harvester failed");
            eprintln!("Error: {err:#}");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}
