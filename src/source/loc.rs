//! Library of Congress search API adapter.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::identifier::{Identifier, IdentifierKind};
use crate::rate_limiter::RateLimiter;
use crate::record::{PartialRecord, WantedFields};

use super::http_client::{build_source_http_client, get_text, probe_url};
use super::utils::{accept_call_number, decode_entries, first_non_blank};
use super::{
    AdapterContext, KindSupport, ProbeStatus, SourceAdapter, SourceError, SourceKind,
    SourcePolicy, SourceSettings, ensure_supported,
};

/// Source name, also used as the LCCN attribution.
pub const LOC_SOURCE_NAME: &str = "LOC";

const DEFAULT_BASE_URL: &str = "https://www.loc.gov";

#[derive(Debug, Deserialize)]
struct LocSearchResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LocResult {
    item: Option<LocItem>,
    number_oclc: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct LocItem {
    call_number: Option<Vec<String>>,
}

/// Searches loc.gov for call numbers, and for OCLC numbers when given an ISBN.
pub struct LocAdapter {
    ctx: AdapterContext,
    client: Client,
    base_url: String,
}

impl LocAdapter {
    /// Creates the adapter from resolved settings.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] if HTTP client construction fails.
    pub fn new(settings: &SourceSettings, limiter: Arc<RateLimiter>) -> Result<Self, SourceError> {
        let policy = settings.policy_for(LOC_SOURCE_NAME, SourceKind::Api, KindSupport::Both);
        let base_url = settings.base_url(LOC_SOURCE_NAME, DEFAULT_BASE_URL);
        let client = build_source_http_client(&policy.name, policy.timeout)?;
        Ok(Self {
            ctx: AdapterContext::new(policy, limiter),
            client,
            base_url,
        })
    }

    /// Creates the adapter against a custom base URL.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] if HTTP client construction fails.
    pub fn with_base_url(
        base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, SourceError> {
        let mut settings = SourceSettings::default();
        settings
            .base_urls
            .insert(LOC_SOURCE_NAME.to_string(), base_url.into());
        Self::new(&settings, limiter)
    }

    fn search_url(&self, identifier: &Identifier) -> String {
        format!(
            "{}/search/?fo=json&q={}",
            self.base_url,
            urlencoding::encode(identifier.value())
        )
    }
}

impl std::fmt::Debug for LocAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Takes the first result that carries a valid call number, and the first
/// OCLC number across results. OCLC numbers are only read for ISBN input.
fn parse_loc_body(
    source: &str,
    body: &str,
    input_kind: IdentifierKind,
) -> Result<PartialRecord, SourceError> {
    let response: LocSearchResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::malformed(source, &format!("invalid JSON payload: {e}")))?;
    let results: Vec<LocResult> = decode_entries(source, response.results);

    let lccn = results.iter().find_map(|result| {
        let numbers = result.item.as_ref()?.call_number.as_deref()?;
        accept_call_number(source, &first_non_blank(Some(numbers))?)
    });
    let oclc = match input_kind {
        IdentifierKind::Isbn => results
            .iter()
            .find_map(|result| first_non_blank(result.number_oclc.as_deref())),
        IdentifierKind::Oclc => None,
    };

    let mut partial = PartialRecord::new();
    if let Some(lccn) = lccn {
        partial = partial.with_lccn(lccn);
    }
    if let Some(oclc) = oclc {
        partial = partial.with_oclc(oclc);
    }
    Ok(partial)
}

#[async_trait]
impl SourceAdapter for LocAdapter {
    fn policy(&self) -> &SourcePolicy {
        &self.ctx.policy
    }

    #[instrument(skip(self, wanted), fields(source = LOC_SOURCE_NAME, identifier = %identifier))]
    async fn fetch(
        &self,
        identifier: &Identifier,
        wanted: &WantedFields,
    ) -> Result<PartialRecord, SourceError> {
        ensure_supported(self.policy(), identifier)?;

        let Some(body) = get_text(
            &self.client,
            &self.ctx.limiter,
            self.ctx.name(),
            self.policy().timeout,
            &self.search_url(identifier),
        )
        .await?
        else {
            return Ok(PartialRecord::new());
        };

        Ok(parse_loc_body(self.ctx.name(), &body, identifier.kind())?.retain_wanted(wanted))
    }

    async fn probe_status(&self, sample: &Identifier) -> ProbeStatus {
        probe_url(
            &self.client,
            &self.ctx.limiter,
            self.ctx.name(),
            &self.search_url(sample),
        )
        .await
    }
}
