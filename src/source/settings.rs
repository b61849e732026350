//! Source settings resolved from configuration at run start.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::rate_limiter::{DEFAULT_RATE_LIMIT, RateLimit};

use super::scraper::ScrapingTemplate;
use super::{KindSupport, SourceKind, SourcePolicy};

/// Default connection and subprocess timeout.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Well-known public Z39.50 targets, as `host:port/database`.
#[must_use]
pub fn default_z3950_targets() -> BTreeMap<String, String> {
    [
        ("LOC-Z3950", "lx2.loc.gov:210/LCDB"),
        ("Yale", "z3950.library.yale.edu:7090/voyager"),
        ("UVa", "virgo.lib.virginia.edu:2200/unicorn"),
        ("UAlberta", "ualapp.library.ualberta.ca:2200/unicorn"),
        ("Oxford", "library.ox.ac.uk:210/44OXF_INST"),
        ("Mich", "141.215.16.4:210/INNOPAC"),
        ("UCLA", "z3950.library.ucla.edu:1921/01UCS_LAL"),
        ("Cambridge", "newton.lib.cam.ac.uk:7790/voyager"),
        ("NLA", "catalogue.nla.gov.au:7090/voyager"),
        ("NCSU", "sirsi.lib.ncsu.edu:2200/UNICORN"),
        ("Toronto", "utoronto.alma.exlibrisgroup.com:1921/01UTORONTO_INST"),
        ("UBC", "ils.library.ubc.ca:7090/Voyager"),
        ("DUKE", "catalog.library.duke.edu:9991/DUK01"),
        ("IUCAT", "libprd.uits.indiana.edu:2200/UNICORN"),
        ("QUEENS", "ocul-qu.alma.exlibrisgroup.com:210/01OCUL_QU"),
        ("UCB", "berkeley.alma.exlibrisgroup.com:1921/01UCS_BER/UCB"),
        ("NYU", "aleph.library.nyu.edu:9991/NYU01PUB"),
        ("UPenn", "na03.alma.exlibrisgroup.com:1921/01UPENN_INST"),
        ("NYPL", "nyst.sirsi.net:8419/unicorn"),
    ]
    .into_iter()
    .map(|(name, target)| (name.to_string(), target.to_string()))
    .collect()
}

/// Everything the registry needs to construct adapters.
///
/// Per-source maps are keyed by source name, compared case-insensitively.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Timeout for sources without an explicit entry in `timeouts`.
    pub default_timeout: Duration,
    /// Rate limit for sources without an explicit entry in `rate_limits`.
    pub default_rate_limit: RateLimit,
    /// Per-source rate limits.
    pub rate_limits: BTreeMap<String, RateLimit>,
    /// Per-source timeouts.
    pub timeouts: BTreeMap<String, Duration>,
    /// Per-source API base URL overrides.
    pub base_urls: BTreeMap<String, String>,
    /// Google Books API key.
    pub google_api_key: Option<String>,
    /// Path or name of the `yaz-client` executable.
    pub yaz_client_path: PathBuf,
    /// Z39.50 targets by source name.
    pub z3950_targets: BTreeMap<String, String>,
    /// Scraped catalogs by source name.
    pub scraping_catalogs: BTreeMap<String, ScrapingTemplate>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_SOURCE_TIMEOUT,
            default_rate_limit: DEFAULT_RATE_LIMIT,
            rate_limits: BTreeMap::new(),
            timeouts: BTreeMap::new(),
            base_urls: BTreeMap::new(),
            google_api_key: None,
            yaz_client_path: PathBuf::from("yaz-client"),
            z3950_targets: default_z3950_targets(),
            scraping_catalogs: BTreeMap::new(),
        }
    }
}

fn lookup<'a, T>(map: &'a BTreeMap<String, T>, name: &str) -> Option<&'a T> {
    map.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

impl SourceSettings {
    /// Builds the policy for a source from its static traits and the configured overrides.
    #[must_use]
    pub fn policy_for(&self, name: &str, kind: SourceKind, supports: KindSupport) -> SourcePolicy {
        SourcePolicy {
            name: name.to_string(),
            kind,
            supports,
            rate_limit: lookup(&self.rate_limits, name)
                .copied()
                .unwrap_or(self.default_rate_limit),
            timeout: lookup(&self.timeouts, name)
                .copied()
                .unwrap_or(self.default_timeout),
        }
    }

    /// Returns the configured base URL for `name`, or `default`.
    #[must_use]
    pub fn base_url(&self, name: &str, default: &str) -> String {
        lookup(&self.base_urls, name)
            .map_or(default, String::as_str)
            .trim_end_matches('/')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_carry_z3950_targets() {
        let settings = SourceSettings::default();
        assert_eq!(
            settings.z3950_targets.get("LOC-Z3950").map(String::as_str),
            Some("lx2.loc.gov:210/LCDB")
        );
        assert!(settings.scraping_catalogs.is_empty());
    }

    #[test]
    fn test_policy_for_applies_case_insensitive_overrides() {
        let mut settings = SourceSettings::default();
        settings
            .rate_limits
            .insert("loc".to_string(), RateLimit::new(2, Duration::from_secs(1)));
        settings
            .timeouts
            .insert("LOC".to_string(), Duration::from_secs(3));

        let policy = settings.policy_for("LOC", SourceKind::Api, KindSupport::Both);
        assert_eq!(policy.rate_limit, RateLimit::new(2, Duration::from_secs(1)));
        assert_eq!(policy.timeout, Duration::from_secs(3));

        let other = settings.policy_for("Harvard", SourceKind::Api, KindSupport::IsbnOnly);
        assert_eq!(other.rate_limit, DEFAULT_RATE_LIMIT);
        assert_eq!(other.timeout, DEFAULT_SOURCE_TIMEOUT);
    }

    #[test]
    fn test_base_url_override_trims_trailing_slash() {
        let mut settings = SourceSettings::default();
        settings
            .base_urls
            .insert("harvard".to_string(), "http://127.0.0.1:9000/".to_string());
        assert_eq!(
            settings.base_url("Harvard", "http://default"),
            "http://127.0.0.1:9000"
        );
        assert_eq!(settings.base_url("LOC", "https://www.loc.gov"), "https://www.loc.gov");
    }
}
