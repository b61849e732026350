//! CLI command handlers.

mod cache;
mod config;

pub use cache::run_cache_command;
pub use config::run_config_command;
