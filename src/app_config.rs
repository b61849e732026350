//! Application configuration: JSON file defaults for harvest runs.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use harvester_core::source::{
    GOOGLE_KEY_PLACEHOLDER, ScrapingTemplate, SourceSettings, default_z3950_targets,
    order_by_priority,
};
use harvester_core::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY, RateLimit, WantedFields};

/// Sources queried when the file names none, in this order.
pub const DEFAULT_SOURCE_ORDER: [&str; 3] = ["LOC", "Harvard", "OpenLibrary"];

/// Default `search_timeout_secs`.
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 10;

const MAX_TIMEOUT_SECS: u64 = 3600;

/// One entry of the `sources` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceEntry {
    /// Registered source name.
    pub name: String,
    /// Lower runs first.
    #[serde(default)]
    pub priority: u32,
}

/// One entry of the `rate_limits` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitEntry {
    /// Calls allowed per period.
    pub calls: u32,
    /// Period length in seconds.
    pub period_secs: u64,
}

/// JSON-backed file configuration.
///
/// Every key is optional; absent keys fall back to built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Sources with their priorities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieve_isbn: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieve_oclc: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieve_lccn: Option<bool>,
    /// Timeout for every source without an entry in `timeouts`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaz_client_path: Option<PathBuf>,
    /// Z39.50 targets as `host:port/database`; replaces the built-in table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z3950_sources: Option<BTreeMap<String, String>>,
    /// Scraped catalogs as `[search URL with {number}, record base URL]`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub web_scraping_sources: BTreeMap<String, (String, String)>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub rate_limits: BTreeMap<String, RateLimitEntry>,
    /// Per-source timeouts in seconds.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub timeouts: BTreeMap<String, u64>,
    /// Per-source API base URL overrides.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub base_urls: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=MAX_CONCURRENCY).contains(&concurrency)
        {
            bail!(
                "Invalid config value for `concurrency`: {concurrency}. Expected range: 1..={MAX_CONCURRENCY}"
            );
        }
        validate_timeout_secs("search_timeout_secs", self.search_timeout_secs)?;
        for (name, secs) in &self.timeouts {
            validate_timeout_secs(&format!("timeouts.{name}"), Some(*secs))?;
        }

        for (name, limit) in &self.rate_limits {
            if limit.calls == 0 {
                bail!("Invalid config value for `rate_limits.{name}.calls`: 0. Expected at least 1");
            }
            if limit.period_secs == 0 {
                bail!(
                    "Invalid config value for `rate_limits.{name}.period_secs`: 0. Expected at least 1"
                );
            }
        }

        if let Some(sources) = &self.sources
            && let Some(entry) = sources.iter().find(|entry| entry.name.trim().is_empty())
        {
            bail!(
                "Invalid config value for `sources`: entry with priority {} has an empty name",
                entry.priority
            );
        }

        for (name, (seed, base)) in &self.web_scraping_sources {
            ScrapingTemplate::new(name, seed.as_str(), base.as_str())
                .with_context(|| format!("Invalid config value for `web_scraping_sources.{name}`"))?;
        }

        for (name, base) in &self.base_urls {
            url::Url::parse(base)
                .with_context(|| format!("Invalid config value for `base_urls.{name}`: '{base}'"))?;
        }

        Ok(())
    }

    /// Source names in run order: ascending priority, ties in list order.
    #[must_use]
    pub fn source_order(&self) -> Vec<String> {
        match &self.sources {
            Some(sources) if !sources.is_empty() => order_by_priority(
                sources
                    .iter()
                    .map(|entry| (entry.name.trim().to_string(), i64::from(entry.priority)))
                    .collect(),
            ),
            _ => DEFAULT_SOURCE_ORDER.iter().map(ToString::to_string).collect(),
        }
    }

    /// Fields retrieved unless the CLI disables them.
    #[must_use]
    pub fn wanted_fields(&self) -> WantedFields {
        WantedFields::from_toggles(
            self.retrieve_isbn.unwrap_or(true),
            self.retrieve_oclc.unwrap_or(true),
            self.retrieve_lccn.unwrap_or(true),
        )
    }

    #[must_use]
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(
            self.search_timeout_secs
                .unwrap_or(DEFAULT_SEARCH_TIMEOUT_SECS),
        )
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(DEFAULT_CONCURRENCY)
    }

    /// Returns the Google key unless it is absent or the placeholder.
    #[must_use]
    pub fn usable_google_key(&self) -> Option<&str> {
        self.google_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != GOOGLE_KEY_PLACEHOLDER)
    }

    /// Builds adapter settings. `timeout_override` replaces `search_timeout_secs`.
    pub fn source_settings(&self, timeout_override: Option<Duration>) -> Result<SourceSettings> {
        let mut scraping_catalogs = BTreeMap::new();
        for (name, (seed, base)) in &self.web_scraping_sources {
            let template = ScrapingTemplate::new(name, seed.as_str(), base.as_str())
                .with_context(|| format!("Invalid config value for `web_scraping_sources.{name}`"))?;
            scraping_catalogs.insert(name.clone(), template);
        }

        let defaults = SourceSettings::default();
        Ok(SourceSettings {
            default_timeout: timeout_override.unwrap_or_else(|| self.search_timeout()),
            rate_limits: self
                .rate_limits
                .iter()
                .map(|(name, limit)| {
                    (
                        name.clone(),
                        RateLimit::new(limit.calls, Duration::from_secs(limit.period_secs)),
                    )
                })
                .collect(),
            timeouts: self
                .timeouts
                .iter()
                .map(|(name, secs)| (name.clone(), Duration::from_secs(*secs)))
                .collect(),
            base_urls: self.base_urls.clone(),
            google_api_key: self.google_api_key.clone(),
            yaz_client_path: self
                .yaz_client_path
                .clone()
                .unwrap_or(defaults.yaz_client_path),
            z3950_targets: self
                .z3950_sources
                .clone()
                .unwrap_or_else(default_z3950_targets),
            scraping_catalogs,
            default_rate_limit: defaults.default_rate_limit,
        })
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=MAX_TIMEOUT_SECS).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..={MAX_TIMEOUT_SECS}");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config, or defaults when no file exists.
    pub config: FileConfig,
    /// Indicates whether configuration was loaded from disk.
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/harvester/config.json`
/// 2. `$HOME/.config/harvester/config.json`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("harvester")
                .join("config.json"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("harvester")
            .join("config.json"),
    )
}

/// Resolves default record store path.
///
/// Priority:
/// 1. `$XDG_DATA_HOME/harvester/records.db`
/// 2. `$HOME/.local/share/harvester/records.db`
#[must_use]
pub fn resolve_default_database_path() -> Option<PathBuf> {
    if let Some(xdg_data_home) = env_var_non_empty_os("XDG_DATA_HOME") {
        return Some(
            PathBuf::from(xdg_data_home)
                .join("harvester")
                .join("records.db"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("harvester")
            .join("records.db"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit`, or from the default path if present.
///
/// An explicit path that does not exist is an error; a missing default file is not.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(path_ref) if path_ref.exists() => {
            let config = load_file_config(path_ref)?;
            Ok(LoadedConfig {
                path,
                config,
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            config: FileConfig::default(),
            loaded_from_file: false,
        }),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Parses and validates a config document.
pub fn parse_config_str(raw: &str) -> Result<FileConfig> {
    if raw.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    let config: FileConfig = serde_json::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Writes `config` as pretty JSON, creating parent directories.
pub fn save_config(path: &Path, config: &FileConfig) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create config directory '{}'", parent.display())
        })?;
    }
    let mut raw = serde_json::to_string_pretty(config)?;
    raw.push('\n');
    fs::write(path, raw)
        .with_context(|| format!("Failed to write config file '{}'", path.display()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"{
                "sources": [
                    {"name": "OpenLibrary", "priority": 3},
                    {"name": "LOC", "priority": 1},
                    {"name": "Harvard", "priority": 1}
                ],
                "retrieve_isbn": false,
                "search_timeout_secs": 20
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.source_order(), vec!["LOC", "Harvard", "OpenLibrary"]);
        assert!(!cfg.wanted_fields().contains(harvester_core::Field::Isbn));
        assert!(cfg.wanted_fields().wants_lccn());
        assert_eq!(cfg.search_timeout(), Duration::from_secs(20));
        assert_eq!(cfg.concurrency(), DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config_str("  ").unwrap();
        assert_eq!(cfg.source_order(), DEFAULT_SOURCE_ORDER.to_vec());
        assert_eq!(
            cfg.search_timeout(),
            Duration::from_secs(DEFAULT_SEARCH_TIMEOUT_SECS)
        );
        let settings = cfg.source_settings(None).unwrap();
        assert_eq!(settings.z3950_targets, default_z3950_targets());
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        assert!(parse_config_str(r#"{"retreive_lccn": true}"#).is_err());
    }

    #[test]
    fn test_parse_config_rejects_zero_rate_limit() {
        let err = parse_config_str(r#"{"rate_limits": {"LOC": {"calls": 0, "period_secs": 10}}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("rate_limits.LOC.calls"));

        let err = parse_config_str(r#"{"rate_limits": {"LOC": {"calls": 5, "period_secs": 0}}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("rate_limits.LOC.period_secs"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_concurrency() {
        let err = parse_config_str(r#"{"concurrency": 0}"#).unwrap_err();
        assert!(err.to_string().contains("concurrency"));
        assert!(parse_config_str(r#"{"concurrency": 33}"#).is_err());
    }

    #[test]
    fn test_parse_config_rejects_bad_scraping_template() {
        let err = parse_config_str(
            r#"{"web_scraping_sources": {"Stanford": ["https://searchworks.stanford.edu/?q=x", "https://searchworks.stanford.edu/view"]}}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("web_scraping_sources.Stanford"));
    }

    #[test]
    fn test_source_settings_maps_overrides() {
        let cfg = parse_config_str(
            r#"{
                "search_timeout_secs": 15,
                "timeouts": {"Yale": 30},
                "rate_limits": {"LOC": {"calls": 2, "period_secs": 5}},
                "z3950_sources": {"Yale": "z3950.library.yale.edu:7090/voyager"},
                "web_scraping_sources": {
                    "Stanford": ["https://searchworks.stanford.edu/?q={number}", "https://searchworks.stanford.edu/view/"]
                },
                "google_api_key": "k"
            }"#,
        )
        .unwrap();
        let settings = cfg.source_settings(None).unwrap();
        assert_eq!(settings.default_timeout, Duration::from_secs(15));
        assert_eq!(settings.timeouts["Yale"], Duration::from_secs(30));
        assert_eq!(
            settings.rate_limits["LOC"],
            RateLimit::new(2, Duration::from_secs(5))
        );
        assert_eq!(settings.z3950_targets.len(), 1);
        assert_eq!(
            settings.scraping_catalogs["Stanford"].record_base_url,
            "https://searchworks.stanford.edu/view"
        );
        assert_eq!(settings.google_api_key.as_deref(), Some("k"));

        let overridden = cfg.source_settings(Some(Duration::from_secs(3))).unwrap();
        assert_eq!(overridden.default_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_usable_google_key_ignores_placeholder() {
        let mut cfg = FileConfig::default();
        assert_eq!(cfg.usable_google_key(), None);
        cfg.google_api_key = Some(GOOGLE_KEY_PLACEHOLDER.to_string());
        assert_eq!(cfg.usable_google_key(), None);
        cfg.google_api_key = Some(" real-key ".to_string());
        assert_eq!(cfg.usable_google_key(), Some("real-key"));
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let cfg = FileConfig {
            search_timeout_secs: Some(25),
            google_api_key: Some("abc".to_string()),
            ..FileConfig::default()
        };
        save_config(&path, &cfg).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert!(loaded.loaded_from_file);
        assert_eq!(loaded.config, cfg);
        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("z3950_sources"));
    }

    #[test]
    fn test_load_config_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}
