//! Error types for source adapter calls.
//!
//! Every variant names the source and follows the What/Why/Fix message
//! layout used across the crate. The engine never aborts on these: it logs
//! them and moves on to the next source.

use std::time::Duration;

use thiserror::Error;

/// Errors that a single source call can produce.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Network or transport failure, or an unexpected response status.
    #[error("source '{source_name}' failed: {reason}\n  Suggestion: {suggestion}")]
    Transient {
        /// Source that failed
        source_name: String,
        /// Why the call failed
        reason: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// The call did not finish within the source timeout.
    #[error(
        "source '{source_name}' timed out after {seconds}s\n  Suggestion: Raise the timeout with `harvester config set-timeout <SECS>` or move this source lower in the priority order"
    )]
    Timeout {
        /// Source that timed out
        source_name: String,
        /// Configured timeout in seconds
        seconds: u64,
    },

    /// The source asked the client to slow down.
    #[error(
        "source '{source_name}' is rate limiting requests{}\n  Suggestion: Lower the configured calls per period for this source",
        retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default()
    )]
    RateLimited {
        /// Source that refused the call
        source_name: String,
        /// Server-mandated pause, when the server sent one
        retry_after: Option<Duration>,
    },

    /// The source cannot serve this run at all (kind mismatch, missing credential, missing tool).
    #[error("source '{source_name}' is unusable: {reason}\n  Suggestion: {suggestion}")]
    Precondition {
        /// Source that is unusable
        source_name: String,
        /// Which precondition failed
        reason: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// The response could not be interpreted at all.
    #[error(
        "source '{source_name}' returned a malformed response: {reason}\n  Suggestion: The source may have changed its response format"
    )]
    Malformed {
        /// Source that answered
        source_name: String,
        /// What was wrong with the payload
        reason: String,
    },
}

impl SourceError {
    /// Creates a `Transient` error.
    #[must_use]
    pub fn transient(source: &str, reason: &str) -> Self {
        Self::Transient {
            source_name: source.to_string(),
            reason: reason.to_string(),
            suggestion: "Check network connectivity; the next source will be tried".to_string(),
        }
    }

    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout(source: &str, timeout: Duration) -> Self {
        Self::Timeout {
            source_name: source.to_string(),
            seconds: timeout.as_secs(),
        }
    }

    /// Creates a `RateLimited` error.
    #[must_use]
    pub fn rate_limited(source: &str, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            source_name: source.to_string(),
            retry_after,
        }
    }

    /// Creates a `Precondition` error.
    #[must_use]
    pub fn precondition(source: &str, reason: &str, suggestion: &str) -> Self {
        Self::Precondition {
            source_name: source.to_string(),
            reason: reason.to_string(),
            suggestion: suggestion.to_string(),
        }
    }

    /// Creates a `Malformed` error.
    #[must_use]
    pub fn malformed(source: &str, reason: &str) -> Self {
        Self::Malformed {
            source_name: source.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns the name of the source that produced the error.
    #[must_use]
    pub fn source_name(&self) -> &str {
        match self {
            Self::Transient { source_name, .. }
            | Self::Timeout { source_name, .. }
            | Self::RateLimited { source_name, .. }
            | Self::Precondition { source_name, .. }
            | Self::Malformed { source_name, .. } => source_name,
        }
    }

    /// Returns true for failures that may succeed on a later identifier or run.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }

    /// Returns true when the source cannot serve this run at all.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition { .. })
    }

    /// Maps a `reqwest` failure into the taxonomy.
    pub(crate) fn from_reqwest(source: &str, timeout: Duration, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(source, timeout)
        } else if error.is_decode() {
            Self::malformed(source, &error.to_string())
        } else {
            Self::transient(source, &error.to_string())
        }
    }
}
