//! Bibliographic source adapters.
//!
//! Every external metadata provider implements [`SourceAdapter`]: given an
//! identifier it returns whatever subset of ISBN, OCLC number and call number
//! it can find. Adapters hold a shared [`RateLimiter`] and call through it
//! before every network or subprocess call.
//!
//! # Architecture
//!
//! - [`SourceAdapter`] - async trait implemented by every source
//! - [`SourcePolicy`] - static per-source settings (kind, applicable identifiers, limits)
//! - [`SourceRegistry`] - name → adapter table built from configuration
//! - [`HarvardAdapter`], [`LocAdapter`], [`OpenLibraryAdapter`], [`GoogleBooksAdapter`] - JSON APIs
//! - [`ScraperAdapter`] - HTML catalog scraping
//! - [`Z3950Adapter`] - legacy Z39.50 access through the `yaz-client` program
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use harvester_core::rate_limiter::{RateLimiter, DEFAULT_RATE_LIMIT};
//! use harvester_core::source::{SourceSettings, build_source_registry};
//!
//! let limiter = Arc::new(RateLimiter::new(DEFAULT_RATE_LIMIT));
//! let registry = build_source_registry(&SourceSettings::default(), &limiter);
//! let ordered = registry.select(&["LOC".to_string(), "Harvard".to_string()]);
//! assert_eq!(ordered.len(), 2);
//! ```

mod error;
mod google;
mod harvard;
mod http_client;
mod loc;
mod open_library;
mod registry;
mod scraper;
mod settings;
mod utils;
mod z3950;

pub use error::SourceError;
pub use google::{GOOGLE_KEY_PLACEHOLDER, GoogleBooksAdapter};
pub use harvard::HarvardAdapter;
pub use http_client::build_source_http_client;
pub use loc::LocAdapter;
pub use open_library::OpenLibraryAdapter;
pub use registry::{SourceRegistry, build_source_registry, order_by_priority};
pub use scraper::{ScraperAdapter, ScrapingTemplate};
pub use settings::{SourceSettings, default_z3950_targets};
pub use utils::{accept_call_number, is_valid_call_number};
pub use z3950::{MarcFields, Z3950Adapter, parse_text_marc};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::identifier::{Identifier, IdentifierKind};
use crate::rate_limiter::{RateLimit, RateLimiter};
use crate::record::{PartialRecord, WantedFields};

/// Transport family of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// JSON REST API.
    Api,
    /// Z39.50 access through an external client program.
    LegacyProtocol,
    /// HTML catalog pages.
    Scraping,
}

impl SourceKind {
    /// Returns the display label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::LegacyProtocol => "z39.50",
            Self::Scraping => "scraping",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier kinds a source can look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindSupport {
    /// ISBN lookups only.
    IsbnOnly,
    /// OCLC lookups only.
    OclcOnly,
    /// Both ISBN and OCLC lookups.
    Both,
}

impl KindSupport {
    /// Returns whether `kind` can be looked up.
    #[must_use]
    pub fn allows(&self, kind: IdentifierKind) -> bool {
        match self {
            Self::IsbnOnly => kind == IdentifierKind::Isbn,
            Self::OclcOnly => kind == IdentifierKind::Oclc,
            Self::Both => true,
        }
    }
}

/// Static per-source configuration, immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePolicy {
    /// Display name, also used as the LCCN attribution.
    pub name: String,
    /// Transport family.
    pub kind: SourceKind,
    /// Applicable identifier kinds.
    pub supports: KindSupport,
    /// Call frequency bound.
    pub rate_limit: RateLimit,
    /// Connection / subprocess timeout.
    pub timeout: Duration,
}

/// Result of a pre-flight status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The source answered.
    Reachable,
    /// The source could not be reached or refused service.
    Unreachable,
}

/// Contract every metadata source implements.
///
/// `fetch` must apply the shared rate limiter before the underlying call and
/// must tolerate malformed sub-records by skipping them. `probe_status` never
/// fails; problems are reported as [`ProbeStatus::Unreachable`].
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Returns the static policy of this source.
    fn policy(&self) -> &SourcePolicy;

    /// Returns the source name.
    fn name(&self) -> &str {
        &self.policy().name
    }

    /// Returns whether this source can look up identifiers of `kind`.
    fn supports(&self, kind: IdentifierKind) -> bool {
        self.policy().supports.allows(kind)
    }

    /// Checks configuration preconditions (credentials, endpoints) without any I/O.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] when the source cannot be used.
    fn check_preconditions(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Looks up `identifier` and returns the fields this source knows.
    async fn fetch(
        &self,
        identifier: &Identifier,
        wanted: &WantedFields,
    ) -> Result<PartialRecord, SourceError>;

    /// Issues one cheap status request, using `sample` to build the request.
    async fn probe_status(&self, sample: &Identifier) -> ProbeStatus;
}

/// Shared construction inputs for adapters.
#[derive(Debug, Clone)]
pub(crate) struct AdapterContext {
    pub(crate) policy: SourcePolicy,
    pub(crate) limiter: std::sync::Arc<RateLimiter>,
}

impl AdapterContext {
    pub(crate) fn new(policy: SourcePolicy, limiter: std::sync::Arc<RateLimiter>) -> Self {
        limiter.register(&policy.name, policy.rate_limit);
        Self { policy, limiter }
    }

    pub(crate) fn name(&self) -> &str {
        &self.policy.name
    }
}

/// Fails with a precondition error when `kind` is outside the source policy.
pub(crate) fn ensure_supported(
    policy: &SourcePolicy,
    identifier: &Identifier,
) -> Result<(), SourceError> {
    if policy.supports.allows(identifier.kind()) {
        Ok(())
    } else {
        Err(SourceError::precondition(
            &policy.name,
            &format!("{} lookups are not supported", identifier.kind()),
            "Remove this source from the source list for this input kind",
        ))
    }
}
