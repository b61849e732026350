//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use harvester_core::MAX_CONCURRENCY;

/// Resolve ISBN / OCLC numbers into Library of Congress call numbers.
///
/// Reads identifiers from the first column of INPUT, asks the configured
/// library catalogs in priority order, and writes one tab-separated row per
/// identifier.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
#[command(subcommand_negates_reqs = true, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub harvest: HarvestArgs,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
}

/// Arguments of a harvest run.
#[derive(Args, Debug, Clone, Default)]
pub struct HarvestArgs {
    /// Input file: one identifier per line in the first tab-separated column
    #[arg(value_name = "INPUT", required = true)]
    pub input: Option<PathBuf>,

    /// Output file (default: <INPUT stem>_results.tsv next to the input)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Comma-separated source names, in query order (overrides configured order)
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    pub sources: Vec<String>,

    /// Do not retrieve ISBNs
    #[arg(long)]
    pub no_isbn: bool,

    /// Do not retrieve OCLC numbers
    #[arg(long)]
    pub no_oclc: bool,

    /// Do not retrieve LC call numbers
    #[arg(long)]
    pub no_lccn: bool,

    /// Per-source connection timeout in seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Identifiers resolved at once
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=MAX_CONCURRENCY as i64))]
    pub concurrency: Option<u8>,

    /// Record store database file
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Neither read nor write the record store
    #[arg(long)]
    pub no_cache: bool,

    /// Skip the network status check of each source before the run
    #[arg(long)]
    pub skip_probe: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Inspect or change the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Inspect or clear the record store
    Cache {
        /// Record store database file
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,

        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Set the default per-source timeout
    SetTimeout {
        /// Timeout in seconds
        #[arg(value_parser = clap::value_parser!(u64).range(1..=3600))]
        seconds: u64,
    },
    /// Store the Google Books API key
    SetGoogleKey {
        /// API key
        key: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CacheCommand {
    /// Print stored records as tab-separated rows
    Show {
        /// Maximum rows to print
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Delete every stored record
    Clear,
    /// Print the number of stored records
    Stats,
}
