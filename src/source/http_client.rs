//! Shared HTTP policy for API and scraping adapters.
//!
//! Centralizes timeout, user-agent and compression defaults, and the single
//! rate-limited GET every HTTP adapter goes through.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, ClientBuilder, Proxy, StatusCode};
use tracing::{debug, warn};

use crate::rate_limiter::{RateLimiter, parse_retry_after};
use crate::user_agent;

use super::{ProbeStatus, SourceError};

/// Builds an HTTP client for one source.
///
/// `timeout` bounds both connection setup and the whole request.
///
/// # Errors
///
/// Returns [`SourceError::Precondition`] when client construction fails.
pub fn build_source_http_client(source: &str, timeout: Duration) -> Result<Client, SourceError> {
    match try_build_client(timeout, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            // Some sandboxes panic when querying system proxy settings
            warn!(source, "HTTP client hit system proxy panic; using env-proxy fallback builder");
            try_build_client(timeout, true).map_err(|failure| failure.into_error(source))
        }
        Err(failure) => Err(failure.into_error(source)),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

impl BuildClientFailure {
    fn into_error(self, source: &str) -> SourceError {
        let reason = match self {
            Self::Panic => "HTTP client construction panicked".to_string(),
            Self::Build(error) => format!("HTTP client construction failed: {error}"),
        };
        SourceError::precondition(source, &reason, "Check proxy environment variables")
    }
}

fn try_build_client(
    timeout: Duration,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(user_agent::default_source_user_agent())
            .gzip(true);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    let https = ["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"];
    let http = ["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"];
    if let Some(proxy) = first_env(&https)
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = first_env(&http)
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn first_env(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Issues one rate-limited GET and returns the body.
///
/// Returns `Ok(None)` for 404, which catalogs use for "no such item".
/// A 429 records the server's Retry-After on the limiter before failing.
pub(crate) async fn get_text(
    client: &Client,
    limiter: &RateLimiter,
    source: &str,
    timeout: Duration,
    url: &str,
) -> Result<Option<String>, SourceError> {
    limiter.acquire(source).await;
    debug!(source, url, "querying source");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|error| SourceError::from_reqwest(source, timeout, &error))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        debug!(source, "source has no record");
        return Ok(None);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        if let Some(delay) = retry_after {
            limiter.record_rate_limit(source, delay).await;
        }
        return Err(SourceError::rate_limited(source, retry_after));
    }
    if !status.is_success() {
        let reason = if status.is_server_error() {
            format!("source unavailable (HTTP {})", status.as_u16())
        } else {
            format!("unexpected HTTP {}", status.as_u16())
        };
        return Err(SourceError::transient(source, &reason));
    }

    response
        .text()
        .await
        .map(Some)
        .map_err(|error| SourceError::from_reqwest(source, timeout, &error))
}

/// Issues one rate-limited status-only GET.
///
/// Any answer other than 5xx, 401 or 403 counts as reachable; transport
/// failures are reported as unreachable, never as errors.
pub(crate) async fn probe_url(
    client: &Client,
    limiter: &RateLimiter,
    source: &str,
    url: &str,
) -> ProbeStatus {
    limiter.acquire(source).await;
    match client.get(url).send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_server_error()
                || status == StatusCode::UNAUTHORIZED
                || status == StatusCode::FORBIDDEN
            {
                debug!(source, status = status.as_u16(), "probe rejected");
                ProbeStatus::Unreachable
            } else {
                ProbeStatus::Reachable
            }
        }
        Err(error) => {
            debug!(source, error = %error, "probe failed");
            ProbeStatus::Unreachable
        }
    }
}
