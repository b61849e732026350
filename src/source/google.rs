//! Google Books volumes API adapter.
//!
//! Requires an API key; the adapter reports a precondition failure while the
//! key is missing or still the configuration placeholder.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::identifier::{Identifier, IdentifierKind};
use crate::rate_limiter::RateLimiter;
use crate::record::{PartialRecord, WantedFields};

use super::http_client::{build_source_http_client, get_text, probe_url};
use super::utils::decode_entries;
use super::{
    AdapterContext, KindSupport, ProbeStatus, SourceAdapter, SourceError, SourceKind,
    SourcePolicy, SourceSettings, ensure_supported,
};

/// Source name.
pub const GOOGLE_SOURCE_NAME: &str = "Google";

/// Key value written by default configuration; treated as "no key".
pub const GOOGLE_KEY_PLACEHOLDER: &str = "YOUR_GOOGLE_API_KEY";

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    volume_info: Option<VolumeInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    #[serde(default)]
    industry_identifiers: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
}

/// Reads industry identifiers of the first matching volume.
pub struct GoogleBooksAdapter {
    ctx: AdapterContext,
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GoogleBooksAdapter {
    /// Creates the adapter from resolved settings.
    ///
    /// A missing key is not an error here; it surfaces through
    /// [`SourceAdapter::check_preconditions`].
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] if HTTP client construction fails.
    pub fn new(settings: &SourceSettings, limiter: Arc<RateLimiter>) -> Result<Self, SourceError> {
        let policy = settings.policy_for(GOOGLE_SOURCE_NAME, SourceKind::Api, KindSupport::Both);
        let base_url = settings.base_url(GOOGLE_SOURCE_NAME, DEFAULT_BASE_URL);
        let client = build_source_http_client(&policy.name, policy.timeout)?;
        Ok(Self {
            ctx: AdapterContext::new(policy, limiter),
            client,
            base_url,
            api_key: settings.google_api_key.clone(),
        })
    }

    /// Creates the adapter against a custom base URL with an explicit key.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] if HTTP client construction fails.
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: Option<String>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, SourceError> {
        let mut settings = SourceSettings {
            google_api_key: api_key,
            ..SourceSettings::default()
        };
        settings
            .base_urls
            .insert(GOOGLE_SOURCE_NAME.to_string(), base_url.into());
        Self::new(&settings, limiter)
    }

    fn usable_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != GOOGLE_KEY_PLACEHOLDER)
    }

    fn volumes_url(&self, identifier: &Identifier, key: &str) -> String {
        let prefix = match identifier.kind() {
            IdentifierKind::Isbn => "isbn",
            IdentifierKind::Oclc => "oclc",
        };
        format!(
            "{}/books/v1/volumes?q={prefix}:{}&key={}",
            self.base_url,
            urlencoding::encode(identifier.value()),
            urlencoding::encode(key)
        )
    }
}

impl std::fmt::Debug for GoogleBooksAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleBooksAdapter")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// ISBN-13 is preferred over ISBN-10; an `OTHER` identifier of the form
/// `OCLC:<n>` yields the OCLC number.
fn parse_google_body(source: &str, body: &str) -> Result<PartialRecord, SourceError> {
    let response: VolumesResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::malformed(source, &format!("invalid JSON payload: {e}")))?;

    let Some(volume) = decode_entries::<Volume>(source, response.items)
        .into_iter()
        .next()
    else {
        return Ok(PartialRecord::new());
    };
    let identifiers: Vec<IndustryIdentifier> = decode_entries(
        source,
        volume
            .volume_info
            .map(|info| info.industry_identifiers)
            .unwrap_or_default(),
    );

    let find = |kind: &str| {
        identifiers
            .iter()
            .find(|entry| entry.kind.eq_ignore_ascii_case(kind))
            .map(|entry| entry.identifier.clone())
    };
    let oclc = identifiers
        .iter()
        .filter(|entry| entry.kind.eq_ignore_ascii_case("other"))
        .find_map(|entry| {
            let value = entry.identifier.trim();
            let prefix = value.get(..5)?;
            prefix
                .eq_ignore_ascii_case("OCLC:")
                .then(|| value[5..].trim().to_string())
        });

    let mut partial = PartialRecord::new();
    if let Some(isbn) = find("ISBN_13").or_else(|| find("ISBN_10")) {
        partial = partial.with_isbn(isbn);
    }
    if let Some(oclc) = oclc {
        partial = partial.with_oclc(oclc);
    }
    Ok(partial)
}

#[async_trait]
impl SourceAdapter for GoogleBooksAdapter {
    fn policy(&self) -> &SourcePolicy {
        &self.ctx.policy
    }

    fn check_preconditions(&self) -> Result<(), SourceError> {
        if self.usable_key().is_some() {
            Ok(())
        } else {
            Err(SourceError::precondition(
                self.ctx.name(),
                "no Google Books API key configured",
                "Run `harvester config set-google-key <KEY>`",
            ))
        }
    }

    #[instrument(skip(self, wanted), fields(source = GOOGLE_SOURCE_NAME, identifier = %identifier))]
    async fn fetch(
        &self,
        identifier: &Identifier,
        wanted: &WantedFields,
    ) -> Result<PartialRecord, SourceError> {
        ensure_supported(self.policy(), identifier)?;
        self.check_preconditions()?;
        let key = self.usable_key().unwrap_or_default();

        let Some(body) = get_text(
            &self.client,
            &self.ctx.limiter,
            self.ctx.name(),
            self.policy().timeout,
            &self.volumes_url(identifier, key),
        )
        .await?
        else {
            return Ok(PartialRecord::new());
        };

        Ok(parse_google_body(self.ctx.name(), &body)?.retain_wanted(wanted))
    }

    async fn probe_status(&self, sample: &Identifier) -> ProbeStatus {
        let Some(key) = self.usable_key() else {
            return ProbeStatus::Unreachable;
        };
        probe_url(
            &self.client,
            &self.ctx.limiter,
            self.ctx.name(),
            &self.volumes_url(sample, key),
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::Field;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    fn adapter(key: Option<&str>) -> GoogleBooksAdapter {
        GoogleBooksAdapter::with_base_url(
            "http://127.0.0.1:9",
            key.map(str::to_string),
            Arc::new(RateLimiter::disabled()),
        )
        .unwrap()
    }

    #[test]
    fn test_check_preconditions_requires_real_key() {
        assert!(adapter(None).check_preconditions().unwrap_err().is_precondition());
        assert!(adapter(Some(GOOGLE_KEY_PLACEHOLDER)).check_preconditions().is_err());
        assert!(adapter(Some("  ")).check_preconditions().is_err());
        assert!(adapter(Some("abc123")).check_preconditions().is_ok());
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", adapter(Some("secret-key")));
        assert!(!rendered.contains("secret-key"));
    }

    #[test]
    fn test_parse_prefers_isbn_13_and_reads_oclc() {
        let body = r#"{"items":[{"volumeInfo":{"industryIdentifiers":[
            {"type":"ISBN_10","identifier":"0191513016"},
            "junk",
            {"type":"OTHER","identifier":"OCLC:18395"},
            {"type":"ISBN_13","identifier":"9780191513015"}
        ]}},{"volumeInfo":{"industryIdentifiers":[{"type":"ISBN_13","identifier":"9999999999999"}]}}]}"#;
        let partial = parse_google_body("Google", body).unwrap();
        assert_eq!(partial.isbn.as_deref(), Some("9780191513015"));
        assert_eq!(partial.oclc.as_deref(), Some("18395"));
    }

    #[test]
    fn test_parse_without_items_is_empty() {
        assert!(parse_google_body("Google", r#"{"totalItems":0}"#).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_without_key_fails_before_network() {
        let err = adapter(None)
            .fetch(&Identifier::isbn("9780191513015"), &WantedFields::new([Field::Oclc]))
            .await
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_google_fetch_against_mock_server() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/books/v1/volumes"))
            .and(query_param("q", "oclc:18395"))
            .and(query_param("key", "abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"items":[{"volumeInfo":{"industryIdentifiers":[{"type":"ISBN_10","identifier":"0191513016"}]}}]}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = GoogleBooksAdapter::with_base_url(
            server.uri(),
            Some("abc123".to_string()),
            Arc::new(RateLimiter::disabled()),
        )
        .unwrap();
        let partial = adapter
            .fetch(&Identifier::oclc("18395"), &WantedFields::new([Field::Isbn]))
            .await
            .unwrap();
        assert_eq!(partial, PartialRecord::new().with_isbn("0191513016"));
    }
}
