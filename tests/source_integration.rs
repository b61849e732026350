//! Integration tests for the built-in HTTP sources, wired through the
//! registry and the engine against mock catalog servers.

use std::collections::BTreeMap;
use std::sync::Arc;

use harvester_core::source::{SourceSettings, build_source_registry};
use harvester_core::{
    Database, Field, Identifier, ProbeOptions, RateLimiter, RecordStore, ResolutionEngine,
    ResolutionOutcome, ResolutionRun, SqliteRecordStore, UnusableReason, WantedFields,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

const ISBN: &str = "9780191513015";

fn settings_for(server: &MockServer, names: &[&str]) -> SourceSettings {
    SourceSettings {
        base_urls: names
            .iter()
            .map(|name| ((*name).to_string(), server.uri()))
            .collect::<BTreeMap<_, _>>(),
        z3950_targets: BTreeMap::new(),
        ..SourceSettings::default()
    }
}

async fn prepared_run(
    settings: &SourceSettings,
    order: &[&str],
    sample: &Identifier,
    wanted: WantedFields,
) -> ResolutionRun {
    let registry = build_source_registry(settings, &Arc::new(RateLimiter::disabled()));
    let names: Vec<String> = order.iter().map(ToString::to_string).collect();
    ResolutionRun::prepare(registry.select(&names), sample, wanted, ProbeOptions::default()).await
}

async fn mount_loc(server: &MockServer, number: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path("/search/"))
        .and(query_param("q", number))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_loc_then_open_library_fill_record_in_order() {
    let server = require_mock_server!();
    // LOC knows the OCLC number, but its only call number is Dewey.
    mount_loc(
        &server,
        ISBN,
        r#"{"results":[{"item":{"call_number":["005.133"]},"number_oclc":["123"]}]}"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .and(query_param("bibkeys", format!("ISBN:{ISBN}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"{{"ISBN:{ISBN}":{{"identifiers":{{"oclc":["999"]}},"classifications":{{"lc_classifications":["QA76.73.P98"]}}}}}}"#
        )))
        .mount(&server)
        .await;

    let settings = settings_for(&server, &["LOC", "OpenLibrary"]);
    let id = Identifier::infer(ISBN);
    let run = prepared_run(
        &settings,
        &["LOC", "OpenLibrary"],
        &id,
        WantedFields::new([Field::Oclc, Field::Lccn]),
    )
    .await;
    assert_eq!(run.usable_sources().count(), 2);

    let store: Arc<dyn RecordStore> =
        Arc::new(SqliteRecordStore::new(Database::new_in_memory().await.unwrap()));
    let engine = ResolutionEngine::new(Some(Arc::clone(&store)), 1).unwrap();
    let resolution = engine.resolve_identifier(&run, &id).await;

    assert_eq!(resolution.outcome, ResolutionOutcome::Complete);
    assert_eq!(resolution.record.oclc.as_deref(), Some("123"));
    assert_eq!(resolution.record.lccn.as_deref(), Some("QA76.73.P98"));
    assert_eq!(resolution.record.lccn_source.as_deref(), Some("OpenLibrary"));
    assert_eq!(store.get(&id).await.unwrap(), Some(resolution.record));
}

#[tokio::test]
async fn test_rate_limited_source_falls_through_to_next() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/search/"))
        .and(query_param("fo", "json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/rest/v3/hollis/mods/isbn/{ISBN}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"record({"mods":{"classification":[{"authority":"ddc","content":"005"},{"authority":"lcc","content":"QA76.73"}]}})"#,
        ))
        .mount(&server)
        .await;

    let settings = settings_for(&server, &["LOC", "Harvard"]);
    let id = Identifier::infer(ISBN);
    let run = prepared_run(
        &settings,
        &["LOC", "Harvard"],
        &id,
        WantedFields::new([Field::Lccn]),
    )
    .await;
    let engine = ResolutionEngine::new(None, 1).unwrap();

    let resolution = engine.resolve_identifier(&run, &id).await;

    assert_eq!(run.stats().source_failures(), 1);
    assert_eq!(resolution.record.lccn.as_deref(), Some("QA76.73"));
    assert_eq!(resolution.record.lccn_source.as_deref(), Some("Harvard"));
}

#[tokio::test]
async fn test_oclc_run_excludes_harvard_and_google_without_key() {
    let server = require_mock_server!();
    mount_loc(
        &server,
        "18395",
        r#"{"results":[{"item":{"call_number":["PR2823 .A2"]}}]}"#,
    )
    .await;

    let settings = settings_for(&server, &["LOC", "Harvard", "Google"]);
    let id = Identifier::infer("18395");
    let run = prepared_run(
        &settings,
        &["Harvard", "Google", "LOC"],
        &id,
        WantedFields::new([Field::Lccn]),
    )
    .await;

    let verdicts: Vec<(&str, bool)> = run
        .sources()
        .iter()
        .map(|source| (source.name(), source.is_usable()))
        .collect();
    assert_eq!(
        verdicts,
        vec![("Harvard", false), ("Google", false), ("LOC", true)]
    );
    assert!(matches!(
        &run.sources()[1].availability,
        harvester_core::Availability::Unusable(UnusableReason::PreconditionFailed(_))
    ));

    let engine = ResolutionEngine::new(None, 1).unwrap();
    let outcome = engine.resolve_batch(&run, &[id], |_, _, _| {}).await;
    assert_eq!(
        outcome.resolutions[0].record.lccn.as_deref(),
        Some("PR2823 .A2")
    );
}

#[tokio::test]
async fn test_probe_marks_server_errors_unreachable() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let settings = settings_for(&server, &["LOC", "OpenLibrary"]);
    let id = Identifier::infer(ISBN);
    let run = prepared_run(
        &settings,
        &["LOC", "OpenLibrary"],
        &id,
        WantedFields::new([Field::Lccn]),
    )
    .await;

    assert_eq!(run.usable_sources().count(), 0);
    let engine = ResolutionEngine::new(None, 1).unwrap();
    let resolution = engine.resolve_identifier(&run, &id).await;
    assert_eq!(resolution.outcome, ResolutionOutcome::SourcesExhausted);
    assert_eq!(run.stats().source_calls(), 0);
}
