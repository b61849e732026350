//! Config command handlers: show, locate and edit the configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::app_config::{
    FileConfig, LoadedConfig, load_config, resolve_default_config_path,
    resolve_default_database_path, save_config,
};
use crate::cli::ConfigCommand;

pub fn run_config_command(command: &ConfigCommand, explicit: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let loaded = load_config(explicit)?;
            for line in show_lines(&loaded) {
                println!("{line}");
            }
        }
        ConfigCommand::Path => {
            let path = config_path(explicit)?;
            println!("{}", path.display());
        }
        ConfigCommand::SetTimeout { seconds } => {
            let path = config_path(explicit)?;
            set_timeout(&path, *seconds)?;
            println!("search_timeout_secs = {seconds} (saved to {})", path.display());
        }
        ConfigCommand::SetGoogleKey { key } => {
            let path = config_path(explicit)?;
            set_google_key(&path, key)?;
            println!("google_api_key saved to {}", path.display());
        }
    }
    Ok(())
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(resolve_default_config_path)
        .context("Cannot determine the config file location.\n  Suggestion: Set HOME or pass --config <PATH>")
}

/// Loads the file at `path` if it exists, applies `edit`, and saves it back.
fn update_config(path: &Path, edit: impl FnOnce(&mut FileConfig)) -> Result<()> {
    let mut config = if path.exists() {
        load_config(Some(path))?.config
    } else {
        FileConfig::default()
    };
    edit(&mut config);
    config.validate()?;
    save_config(path, &config)
}

pub(crate) fn set_timeout(path: &Path, seconds: u64) -> Result<()> {
    update_config(path, |config| config.search_timeout_secs = Some(seconds))
}

pub(crate) fn set_google_key(path: &Path, key: &str) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        bail!("Google API key is empty.\n  Suggestion: Pass the key shown in the Google Cloud console");
    }
    update_config(path, |config| config.google_api_key = Some(key.to_string()))
}

pub(crate) fn show_lines(loaded: &LoadedConfig) -> Vec<String> {
    let config = &loaded.config;
    let resolved_path = loaded.path.as_ref().map_or_else(
        || "<unresolved>".to_string(),
        |path| path.display().to_string(),
    );
    let database_path = config
        .database_path
        .clone()
        .or_else(resolve_default_database_path)
        .map_or_else(|| "<unresolved>".to_string(), |path| path.display().to_string());
    let settings_summary = config.source_settings(None).map_or_else(
        |err| vec![format!("source_settings = invalid ({err:#})")],
        |settings| {
            vec![
                format!("yaz_client_path = {}", settings.yaz_client_path.display()),
                format!(
                    "z3950_sources = {}",
                    settings.z3950_targets.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
                format!(
                    "web_scraping_sources = {}",
                    settings
                        .scraping_catalogs
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ]
        },
    );

    let mut lines = vec![
        format!("config_path = {resolved_path}"),
        format!(
            "config_file = {}",
            if loaded.loaded_from_file {
                "loaded"
            } else {
                "not found (using defaults)"
            }
        ),
        format!("sources = {}", config.source_order().join(", ")),
        format!("retrieve = {}", config.wanted_fields()),
        format!("search_timeout_secs = {}", config.search_timeout().as_secs()),
        format!("concurrency = {}", config.concurrency()),
        format!(
            "google_api_key = {}",
            if config.usable_google_key().is_some() {
                "set"
            } else {
                "not set"
            }
        ),
        format!("database_path = {database_path}"),
    ];
    lines.extend(settings_summary);
    lines
}
