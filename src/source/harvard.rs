//! Harvard Library HOLLIS MODS API adapter (ISBN lookups only).
//!
//! The service answers with JSONP; the MODS `identifier` and `classification`
//! elements may each be a single object or an array.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::identifier::Identifier;
use crate::rate_limiter::RateLimiter;
use crate::record::{PartialRecord, WantedFields};

use super::http_client::{build_source_http_client, get_text, probe_url};
use super::utils::{OneOrMany, accept_call_number, decode_entries, strip_jsonp};
use super::{
    AdapterContext, KindSupport, ProbeStatus, SourceAdapter, SourceError, SourceKind,
    SourcePolicy, SourceSettings, ensure_supported,
};

/// Source name, also used as the LCCN attribution.
pub const HARVARD_SOURCE_NAME: &str = "Harvard";

/// Default Harvard web services base URL.
const DEFAULT_BASE_URL: &str = "http://webservices.lib.harvard.edu";

// ==================== Harvard API Response Types ====================

#[derive(Debug, Deserialize)]
struct HarvardEnvelope {
    mods: Option<HarvardMods>,
}

#[derive(Debug, Deserialize)]
struct HarvardMods {
    identifier: Option<OneOrMany<serde_json::Value>>,
    classification: Option<OneOrMany<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct HarvardIdentifier {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(alias = "#text")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HarvardClassification {
    authority: Option<String>,
    #[serde(alias = "#text")]
    content: Option<String>,
}

// ==================== HarvardAdapter ====================

/// Looks up ISBNs in the HOLLIS catalog for OCLC numbers and LC call numbers.
pub struct HarvardAdapter {
    ctx: AdapterContext,
    client: Client,
    base_url: String,
}

impl HarvardAdapter {
    /// Creates the adapter from resolved settings.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] if HTTP client construction fails.
    pub fn new(settings: &SourceSettings, limiter: Arc<RateLimiter>) -> Result<Self, SourceError> {
        let policy = settings.policy_for(HARVARD_SOURCE_NAME, SourceKind::Api, KindSupport::IsbnOnly);
        let base_url = settings.base_url(HARVARD_SOURCE_NAME, DEFAULT_BASE_URL);
        Self::build(policy, base_url, limiter)
    }

    /// Creates the adapter against a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] if HTTP client construction fails.
    pub fn with_base_url(
        base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, SourceError> {
        let policy = SourceSettings::default().policy_for(
            HARVARD_SOURCE_NAME,
            SourceKind::Api,
            KindSupport::IsbnOnly,
        );
        Self::build(policy, base_url.into(), limiter)
    }

    fn build(
        policy: SourcePolicy,
        base_url: String,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, SourceError> {
        let client = build_source_http_client(&policy.name, policy.timeout)?;
        Ok(Self {
            ctx: AdapterContext::new(policy, limiter),
            client,
            base_url,
        })
    }

    fn lookup_url(&self, identifier: &Identifier) -> String {
        format!(
            "{}/rest/v3/hollis/mods/isbn/{}?jsonp=record",
            self.base_url,
            urlencoding::encode(identifier.value())
        )
    }
}

impl std::fmt::Debug for HarvardAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvardAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Extracts OCLC number and call number from a JSONP body.
fn parse_harvard_body(source: &str, body: &str) -> Result<PartialRecord, SourceError> {
    let json = strip_jsonp(body)
        .ok_or_else(|| SourceError::malformed(source, "response is not wrapped in JSONP"))?;
    let envelope: HarvardEnvelope = serde_json::from_str(json)
        .map_err(|e| SourceError::malformed(source, &format!("invalid JSON payload: {e}")))?;

    let mut partial = PartialRecord::new();
    let Some(mods) = envelope.mods else {
        debug!(source, "response carries no MODS record");
        return Ok(partial);
    };

    let identifiers: Vec<HarvardIdentifier> = decode_entries(
        source,
        mods.identifier.map(OneOrMany::into_vec).unwrap_or_default(),
    );
    if let Some(oclc) = identifiers
        .into_iter()
        .filter(|entry| {
            entry
                .kind
                .as_deref()
                .is_some_and(|kind| kind.eq_ignore_ascii_case("oclc"))
        })
        .find_map(|entry| entry.content.filter(|c| !c.trim().is_empty()))
    {
        partial = partial.with_oclc(oclc);
    }

    let classifications: Vec<HarvardClassification> = decode_entries(
        source,
        mods.classification.map(OneOrMany::into_vec).unwrap_or_default(),
    );
    if let Some(lccn) = classifications
        .into_iter()
        .filter(|entry| {
            entry
                .authority
                .as_deref()
                .is_some_and(|authority| authority.eq_ignore_ascii_case("lcc"))
        })
        .find_map(|entry| accept_call_number(source, entry.content.as_deref().unwrap_or_default()))
    {
        partial = partial.with_lccn(lccn);
    }

    Ok(partial)
}

#[async_trait]
impl SourceAdapter for HarvardAdapter {
    fn policy(&self) -> &SourcePolicy {
        &self.ctx.policy
    }

    #[instrument(skip(self, wanted), fields(source = HARVARD_SOURCE_NAME, identifier = %identifier))]
    async fn fetch(
        &self,
        identifier: &Identifier,
        wanted: &WantedFields,
    ) -> Result<PartialRecord, SourceError> {
        ensure_supported(self.policy(), identifier)?;

        let url = self.lookup_url(identifier);
        let Some(body) = get_text(
            &self.client,
            &self.ctx.limiter,
            self.ctx.name(),
            self.policy().timeout,
            &url,
        )
        .await?
        else {
            return Ok(PartialRecord::new());
        };

        Ok(parse_harvard_body(self.ctx.name(), &body)?.retain_wanted(wanted))
    }

    async fn probe_status(&self, sample: &Identifier) -> ProbeStatus {
        probe_url(
            &self.client,
            &self.ctx.limiter,
            self.ctx.name(),
            &self.lookup_url(sample),
        )
        .await
    }
}
