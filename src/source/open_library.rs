//! Open Library books API adapter.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::identifier::{Identifier, IdentifierKind};
use crate::rate_limiter::RateLimiter;
use crate::record::{PartialRecord, WantedFields};

use super::http_client::{build_source_http_client, get_text, probe_url};
use super::utils::{accept_call_number, first_non_blank};
use super::{
    AdapterContext, KindSupport, ProbeStatus, SourceAdapter, SourceError, SourceKind,
    SourcePolicy, SourceSettings, ensure_supported,
};

/// Source name, also used as the LCCN attribution.
pub const OPEN_LIBRARY_SOURCE_NAME: &str = "OpenLibrary";

const DEFAULT_BASE_URL: &str = "https://openlibrary.org";

#[derive(Debug, Default, Deserialize)]
struct OpenLibraryIdentifiers {
    #[serde(default)]
    oclc: Vec<String>,
    #[serde(default)]
    isbn_13: Vec<String>,
    #[serde(default)]
    isbn_10: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenLibraryClassifications {
    #[serde(default)]
    lc_classifications: Vec<String>,
}

/// Looks up books by ISBN or OCLC bibkey.
pub struct OpenLibraryAdapter {
    ctx: AdapterContext,
    client: Client,
    base_url: String,
}

impl OpenLibraryAdapter {
    /// Creates the adapter from resolved settings.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] if HTTP client construction fails.
    pub fn new(settings: &SourceSettings, limiter: Arc<RateLimiter>) -> Result<Self, SourceError> {
        let policy =
            settings.policy_for(OPEN_LIBRARY_SOURCE_NAME, SourceKind::Api, KindSupport::Both);
        let base_url = settings.base_url(OPEN_LIBRARY_SOURCE_NAME, DEFAULT_BASE_URL);
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
            .insert(OPEN_LIBRARY_SOURCE_NAME.to_string(), base_url.into());
        Self::new(&settings, limiter)
    }

    fn books_url(&self, identifier: &Identifier) -> String {
        format!(
            "{}/api/books?bibkeys={}&format=json&jscmd=data",
            self.base_url,
            urlencoding::encode(&bibkey(identifier))
        )
    }
}

impl std::fmt::Debug for OpenLibraryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenLibraryAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn bibkey(identifier: &Identifier) -> String {
    match identifier.kind() {
        IdentifierKind::Isbn => format!("ISBN:{}", identifier.value()),
        IdentifierKind::Oclc => format!("OCLC:{}", identifier.value()),
    }
}

/// Decodes `identifiers` and `classifications` independently so that a
/// malformed half does not hide the other.
fn parse_open_library_body(
    source: &str,
    body: &str,
    identifier: &Identifier,
) -> Result<PartialRecord, SourceError> {
    let mut books: BTreeMap<String, serde_json::Value> = serde_json::from_str(body)
        .map_err(|e| SourceError::malformed(source, &format!("invalid JSON payload: {e}")))?;

    let Some(book) = books.remove(&bibkey(identifier)) else {
        debug!(source, "no book entry for bibkey");
        return Ok(PartialRecord::new());
    };

    let identifiers: OpenLibraryIdentifiers = book
        .get("identifiers")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();
    let classifications: OpenLibraryClassifications = book
        .get("classifications")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();

    let mut partial = PartialRecord::new();
    if let Some(oclc) = first_non_blank(Some(identifiers.oclc.as_slice())) {
        partial = partial.with_oclc(oclc);
    }
    if let Some(isbn) = first_non_blank(Some(identifiers.isbn_13.as_slice()))
        .or_else(|| first_non_blank(Some(identifiers.isbn_10.as_slice())))
    {
        partial = partial.with_isbn(isbn);
    }
    if let Some(lccn) = classifications
        .lc_classifications
        .iter()
        .find_map(|candidate| accept_call_number(source, candidate))
    {
        partial = partial.with_lccn(lccn);
    }
    Ok(partial)
}

#[async_trait]
impl SourceAdapter for OpenLibraryAdapter {
    fn policy(&self) -> &SourcePolicy {
        &self.ctx.policy
    }

    #[instrument(skip(self, wanted), fields(source = OPEN_LIBRARY_SOURCE_NAME, identifier = %identifier))]
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
            &self.books_url(identifier),
        )
        .await?
        else {
            return Ok(PartialRecord::new());
        };

        Ok(parse_open_library_body(self.ctx.name(), &body, identifier)?.retain_wanted(wanted))
    }

    async fn probe_status(&self, sample: &Identifier) -> ProbeStatus {
        probe_url(
            &self.client,
            &self.ctx.limiter,
            self.ctx.name(),
            &self.books_url(sample),
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

    #[test]
    fn test_parse_isbn_lookup() {
        let body = r#"{"ISBN:9780191513015":{
            "identifiers":{"oclc":["18395"],"isbn_13":["9780191513015"]},
            "classifications":{"lc_classifications":["QA76.73.P98"]}
        }}"#;
        let partial =
            parse_open_library_body("OpenLibrary", body, &Identifier::isbn("9780191513015"))
                .unwrap();
        assert_eq!(partial.oclc.as_deref(), Some("18395"));
        assert_eq!(partial.lccn.as_deref(), Some("QA76.73.P98"));
    }

    #[test]
    fn test_parse_oclc_lookup_falls_back_to_isbn_10() {
        let body = r#"{"OCLC:18395":{
            "identifiers":{"isbn_10":["0191513016"]},
            "classifications":{"lc_classifications":["", "PR6039.O32"]}
        }}"#;
        let partial =
            parse_open_library_body("OpenLibrary", body, &Identifier::oclc("18395")).unwrap();
        assert_eq!(partial.isbn.as_deref(), Some("0191513016"));
        assert_eq!(partial.lccn.as_deref(), Some("PR6039.O32"));
    }

    #[test]
    fn test_parse_tolerates_malformed_identifiers_block() {
        let body = r#"{"ISBN:1":{
            "identifiers":"broken",
            "classifications":{"lc_classifications":["QA1 .B2"]}
        }}"#;
        let partial =
            parse_open_library_body("OpenLibrary", body, &Identifier::isbn("1")).unwrap();
        assert_eq!(partial, PartialRecord::new().with_lccn("QA1 .B2"));
    }

    #[test]
    fn test_parse_empty_object_means_no_record() {
        let partial =
            parse_open_library_body("OpenLibrary", "{}", &Identifier::isbn("9780191513015"))
                .unwrap();
        assert!(partial.is_empty());
    }

    #[tokio::test]
    async fn test_open_library_fetch_against_mock_server() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/api/books"))
            .and(query_param("bibkeys", "OCLC:18395"))
            .and(query_param("jscmd", "data"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"OCLC:18395":{"identifiers":{"isbn_13":["9780191513015"]},"classifications":{"lc_classifications":["QA76.73"]}}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let adapter =
            OpenLibraryAdapter::with_base_url(server.uri(), Arc::new(RateLimiter::disabled()))
                .unwrap();
        let partial = adapter
            .fetch(
                &Identifier::oclc("18395"),
                &WantedFields::new([Field::Isbn, Field::Lccn]),
            )
            .await
            .unwrap();

        assert_eq!(
            partial,
            PartialRecord::new()
                .with_isbn("9780191513015")
                .with_lccn("QA76.73")
        );
    }
}
