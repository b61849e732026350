//! HTML catalog scraping adapter.
//!
//! A scraped catalog is described by a search URL template containing
//! `{number}` and a base URL for record pages. The search page is scanned for
//! record ids, then each linked record page is scanned for MARC 050 call
//! number parts and OCLC numbers. Pages are held in memory only.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::identifier::{Identifier, IdentifierKind};
use crate::rate_limiter::RateLimiter;
use crate::record::{Field, PartialRecord, WantedFields};

use super::http_client::{build_source_http_client, get_text, probe_url};
use super::utils::{accept_call_number, compile_static_regex, strip_leading_zeros};
use super::{
    AdapterContext, KindSupport, ProbeStatus, SourceAdapter, SourceError, SourceKind,
    SourcePolicy, SourceSettings, ensure_supported,
};

/// Placeholder substituted with the identifier in the search URL template.
pub const NUMBER_PLACEHOLDER: &str = "{number}";

/// Maximum record pages followed from one search page.
const MAX_LINKED_PAGES: usize = 10;

static DOCUMENT_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"&amp;document_id=(\d+)&amp;|href="/catalog/([A-Z0-9]+)""#)
});

static SHORT_RECORD_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^[A-Z]+\d+$"));

/// Class part / item part pairs of the MARC 050 field, one pair per page layout.
static CALL_NUMBER_PART_RES: LazyLock<[(Regex, Regex); 2]> = LazyLock::new(|| {
    [
        (
            compile_static_regex(
                r#"<span class="sub_code">a\|</span>\s*([A-Z0-9]+\.[A-Z0-9]+)\s*<"#,
            ),
            compile_static_regex(
                r#"<span class="sub_code">b\|</span>\s*([A-Z0-9]+\s+[0-9]+[a-z]*)\s*<"#,
            ),
        ),
        (
            compile_static_regex(r"<span class='sub_code'>\|a</span>\s*([A-Z0-9]+\.[A-Z0-9]+)\s*"),
            compile_static_regex(r"<span class='sub_code'>\|b</span>\s*([A-Z0-9]+\s+[0-9]+)\s*"),
        ),
    ]
});

static OCLC_RES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        compile_static_regex(r"\(OCoLC\)(?:ocn|ocm)?(\d+)"),
        compile_static_regex(
            r#"<dt class="blacklight-oclc_number">\s*OCLC Number:\s*</dt>\s*(\d+)"#,
        ),
    ]
});

/// URL pair describing one scraped catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapingTemplate {
    /// Search URL containing `{number}`.
    pub seed_url_template: String,
    /// Base URL that record ids are appended to.
    pub record_base_url: String,
}

impl ScrapingTemplate {
    /// Validates and creates a template.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] when the seed template lacks
    /// `{number}` or either URL does not parse.
    pub fn new(
        source: &str,
        seed_url_template: impl Into<String>,
        record_base_url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let template = Self {
            seed_url_template: seed_url_template.into(),
            record_base_url: record_base_url.into().trim_end_matches('/').to_string(),
        };
        template.validate(source)?;
        Ok(template)
    }

    /// Checks the placeholder and URL syntax.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] describing the first problem found.
    pub fn validate(&self, source: &str) -> Result<(), SourceError> {
        let suggestion = "Fix the web_scraping_sources entry in the configuration file";
        if !self.seed_url_template.contains(NUMBER_PLACEHOLDER) {
            return Err(SourceError::precondition(
                source,
                &format!("search URL template has no {NUMBER_PLACEHOLDER} placeholder"),
                suggestion,
            ));
        }
        let sample = self.seed_url_template.replace(NUMBER_PLACEHOLDER, "0");
        for candidate in [sample.as_str(), self.record_base_url.as_str()] {
            if let Err(error) = url::Url::parse(candidate) {
                return Err(SourceError::precondition(
                    source,
                    &format!("invalid URL '{candidate}': {error}"),
                    suggestion,
                ));
            }
        }
        Ok(())
    }

    fn seed_url(&self, identifier: &Identifier) -> String {
        self.seed_url_template.replace(
            NUMBER_PLACEHOLDER,
            &urlencoding::encode(identifier.value()),
        )
    }

    fn record_url(&self, record_id: &str) -> String {
        if SHORT_RECORD_ID_RE.is_match(record_id) {
            format!("{}/{record_id}", self.record_base_url)
        } else {
            format!("{}/{record_id}/librarian_view", self.record_base_url)
        }
    }
}

/// Returns record ids linked from a search page, deduplicated in page order.
#[must_use]
pub fn extract_record_ids(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    DOCUMENT_ID_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Returns call number candidates found on a record page, in page order.
#[must_use]
pub fn extract_call_numbers(html: &str) -> Vec<String> {
    let mut found = Vec::new();
    for (class_re, item_re) in CALL_NUMBER_PART_RES.iter() {
        let classes = class_re.captures_iter(html).filter_map(|c| c.get(1));
        let items = item_re.captures_iter(html).filter_map(|c| c.get(1));
        for (class_part, item_part) in classes.zip(items) {
            found.push(format!("{} {}", class_part.as_str(), item_part.as_str()));
        }
    }
    let mut seen = HashSet::new();
    found.retain(|value| seen.insert(value.clone()));
    found
}

/// Returns OCLC numbers found on a record page with leading zeros removed.
#[must_use]
pub fn extract_oclc_numbers(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    OCLC_RES
        .iter()
        .flat_map(|re| re.captures_iter(html).filter_map(|c| c.get(1)))
        .map(|m| strip_leading_zeros(m.as_str()))
        .filter(|value| !value.is_empty() && seen.insert(value.clone()))
        .collect()
}

/// Whether a wanted field that record pages can supply is still missing.
///
/// Record pages never carry an ISBN, and an OCLC input already is the OCLC.
fn needs_more_pages(partial: &PartialRecord, identifier: &Identifier, wanted: &WantedFields) -> bool {
    let lccn_missing = wanted.contains(Field::Lccn) && partial.lccn.is_none();
    let oclc_missing = wanted.contains(Field::Oclc)
        && identifier.kind() == IdentifierKind::Isbn
        && partial.oclc.is_none();
    lccn_missing || oclc_missing
}

/// Scrapes one configured catalog.
pub struct ScraperAdapter {
    ctx: AdapterContext,
    client: Client,
    template: ScrapingTemplate,
}

impl ScraperAdapter {
    /// Creates the adapter for the catalog `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] for an invalid template or if
    /// HTTP client construction fails.
    pub fn new(
        name: &str,
        template: ScrapingTemplate,
        settings: &SourceSettings,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, SourceError> {
        template.validate(name)?;
        let policy = settings.policy_for(name, SourceKind::Scraping, KindSupport::Both);
        let client = build_source_http_client(&policy.name, policy.timeout)?;
        Ok(Self {
            ctx: AdapterContext::new(policy, limiter),
            client,
            template,
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<Option<String>, SourceError> {
        get_text(
            &self.client,
            &self.ctx.limiter,
            self.ctx.name(),
            self.policy().timeout,
            url,
        )
        .await
    }
}

impl std::fmt::Debug for ScraperAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperAdapter")
            .field("name", &self.ctx.name())
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceAdapter for ScraperAdapter {
    fn policy(&self) -> &SourcePolicy {
        &self.ctx.policy
    }

    #[instrument(skip(self, wanted), fields(source = %self.ctx.name(), identifier = %identifier))]
    async fn fetch(
        &self,
        identifier: &Identifier,
        wanted: &WantedFields,
    ) -> Result<PartialRecord, SourceError> {
        ensure_supported(self.policy(), identifier)?;
        let source = self.ctx.name();

        let Some(search_page) = self.fetch_page(&self.template.seed_url(identifier)).await? else {
            return Ok(PartialRecord::new());
        };
        let record_ids = extract_record_ids(&search_page);
        debug!(source, count = record_ids.len(), "record links found");

        let mut partial = PartialRecord::new();
        for record_id in record_ids.iter().take(MAX_LINKED_PAGES) {
            if !needs_more_pages(&partial, identifier, wanted) {
                break;
            }
            let page = match self.fetch_page(&self.template.record_url(record_id)).await {
                Ok(Some(page)) => page,
                Ok(None) => continue,
                Err(error) => {
                    warn!(source, record_id = %record_id, error = %error, "record page failed");
                    continue;
                }
            };

            if partial.lccn.is_none()
                && let Some(lccn) = extract_call_numbers(&page)
                    .iter()
                    .find_map(|candidate| accept_call_number(source, candidate))
            {
                partial = partial.with_lccn(lccn);
            }
            if partial.oclc.is_none()
                && let Some(oclc) = extract_oclc_numbers(&page).into_iter().next()
            {
                partial = partial.with_oclc(oclc);
            }
        }

        Ok(partial.retain_wanted(wanted))
    }

    async fn probe_status(&self, sample: &Identifier) -> ProbeStatus {
        probe_url(
            &self.client,
            &self.ctx.limiter,
            self.ctx.name(),
            &self.template.seed_url(sample),
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    const RECORD_PAGE: &str = r#"
        <tr><td>050</td><td><span class="sub_code">a|</span> QA76.73 <span class="sub_code">b|</span> P98 2013 </td></tr>
        <tr><td>035</td><td>(OCoLC)ocm00018395</td></tr>
    "#;

    #[test]
    fn test_template_validation() {
        assert!(
            ScrapingTemplate::new("Cat", "https://cat.example/search?q={number}", "https://cat.example/catalog/")
                .is_ok()
        );
        let err = ScrapingTemplate::new("Cat", "https://cat.example/search", "https://cat.example")
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(ScrapingTemplate::new("Cat", "not a url {number}", "https://cat.example").is_err());
    }

    #[test]
    fn test_record_url_shapes() {
        let template =
            ScrapingTemplate::new("Cat", "https://cat.example/?q={number}", "https://cat.example/catalog")
                .unwrap();
        assert_eq!(template.record_url("AB123"), "https://cat.example/catalog/AB123");
        assert_eq!(
            template.record_url("991234"),
            "https://cat.example/catalog/991234/librarian_view"
        );
    }

    #[test]
    fn test_extract_record_ids_dedupes_in_order() {
        let html = r#"<a href="/catalog/B42">x</a> ?a=1&amp;document_id=777&amp;b=2 <a href="/catalog/B42">again</a>"#;
        assert_eq!(extract_record_ids(html), vec!["B42", "777"]);
    }

    #[test]
    fn test_extract_call_numbers_both_layouts() {
        assert_eq!(extract_call_numbers(RECORD_PAGE), vec!["QA76.73 P98 2013"]);

        let alt = "<span class='sub_code'>|a</span> PR6039.O32 <span class='sub_code'>|b</span> H6 1937 LCCN: 37028155";
        assert_eq!(extract_call_numbers(alt), vec!["PR6039.O32 H6 1937"]);
    }

    #[test]
    fn test_extract_oclc_numbers_strips_prefix_and_zeros() {
        assert_eq!(extract_oclc_numbers(RECORD_PAGE), vec!["18395"]);
        let blacklight = r#"<dt class="blacklight-oclc_number">OCLC Number:</dt> 0042"#;
        assert_eq!(extract_oclc_numbers(blacklight), vec!["42"]);
    }

    #[tokio::test]
    async fn test_scraper_follows_record_links() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "9780191513015"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="/catalog/B1">one</a> ?x&amp;document_id=55&amp;y"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/catalog/B1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RECORD_PAGE))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/catalog/55/librarian_view"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>other</p>"))
            .expect(0)
            .mount(&server)
            .await;

        let template = ScrapingTemplate::new(
            "Cat",
            format!("{}/search?q={{number}}", server.uri()),
            format!("{}/catalog", server.uri()),
        )
        .unwrap();
        let adapter = ScraperAdapter::new(
            "Cat",
            template,
            &SourceSettings::default(),
            Arc::new(RateLimiter::disabled()),
        )
        .unwrap();

        let partial = adapter
            .fetch(
                &Identifier::isbn("9780191513015"),
                &WantedFields::new([Field::Oclc, Field::Lccn]),
            )
            .await
            .unwrap();
        assert_eq!(
            partial,
            PartialRecord::new()
                .with_oclc("18395")
                .with_lccn("QA76.73 P98 2013")
        );
    }

    #[test]
    fn test_needs_more_pages_ignores_fields_pages_cannot_supply() {
        let all = WantedFields::from_toggles(true, true, true);
        let isbn = Identifier::isbn("9780191513015");
        let oclc = Identifier::oclc("18395");

        assert!(needs_more_pages(&PartialRecord::new(), &oclc, &all));
        assert!(!needs_more_pages(&PartialRecord::new().with_lccn("QA1 B2"), &oclc, &all));
        assert!(needs_more_pages(&PartialRecord::new().with_lccn("QA1 B2"), &isbn, &all));
        assert!(!needs_more_pages(
            &PartialRecord::new().with_lccn("QA1 B2").with_oclc("7"),
            &isbn,
            &all
        ));
        assert!(!needs_more_pages(
            &PartialRecord::new(),
            &isbn,
            &WantedFields::new([Field::Isbn])
        ));
    }

    #[tokio::test]
    async fn test_oclc_run_stops_following_links_once_call_number_found() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "18395"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="/catalog/B1">1</a><a href="/catalog/B2">2</a><a href="/catalog/B3">3</a>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/catalog/B1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RECORD_PAGE))
            .expect(1)
            .mount(&server)
            .await;
        for later in ["/catalog/B2", "/catalog/B3"] {
            Mock::given(method("GET"))
                .and(path(later))
                .respond_with(ResponseTemplate::new(200).set_body_string(RECORD_PAGE))
                .expect(0)
                .mount(&server)
                .await;
        }

        let template = ScrapingTemplate::new(
            "Cat",
            format!("{}/search?q={{number}}", server.uri()),
            format!("{}/catalog", server.uri()),
        )
        .unwrap();
        let adapter = ScraperAdapter::new(
            "Cat",
            template,
            &SourceSettings::default(),
            Arc::new(RateLimiter::disabled()),
        )
        .unwrap();

        let partial = adapter
            .fetch(
                &Identifier::oclc("18395"),
                &WantedFields::from_toggles(true, true, true),
            )
            .await
            .unwrap();

        assert_eq!(partial.lccn.as_deref(), Some("QA76.73 P98 2013"));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
