//! Shared helpers for source adapters: call-number validation, JSONP
//! unwrapping and tolerant JSON shapes.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// One to three uppercase class letters followed by anything.
static CALL_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^[A-Z]{1,3}.+$"));

/// Returns true if `candidate` looks like a Library of Congress call number.
///
/// # Examples
///
/// ```
/// use harvester_core::source::is_valid_call_number;
///
/// assert!(is_valid_call_number("QA76.73.P98 L88 2013"));
/// assert!(!is_valid_call_number("2013012345"));
/// assert!(!is_valid_call_number("Q"));
/// ```
#[must_use]
pub fn is_valid_call_number(candidate: &str) -> bool {
    CALL_NUMBER_RE.is_match(candidate.trim())
}

/// Returns the trimmed candidate when it passes call-number validation.
#[must_use]
pub fn accept_call_number(source: &str, candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    if is_valid_call_number(candidate) {
        Some(candidate.to_string())
    } else {
        if !candidate.is_empty() {
            debug!(source, candidate, "rejecting value that is not a call number");
        }
        None
    }
}

/// Returns the JSON text between the first `(` and the last `)` of a JSONP body.
#[must_use]
pub fn strip_jsonp(body: &str) -> Option<&str> {
    let start = body.find('(')?;
    let end = body.rfind(')')?;
    (end > start).then(|| &body[start + 1..end])
}

/// Removes leading zeros from a numeric identifier, keeping a lone zero.
#[must_use]
pub fn strip_leading_zeros(value: &str) -> String {
    let trimmed = value.trim().trim_start_matches('0');
    if trimmed.is_empty() && !value.trim().is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A JSON value that sources emit either as a single object or as an array.
///
/// `Many` is tried first so that `OneOrMany<serde_json::Value>` keeps arrays as lists.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A list of entries.
    Many(Vec<T>),
    /// A single entry.
    One(T),
}

impl<T> OneOrMany<T> {
    /// Flattens into a vector.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

/// Decodes each raw entry into `T`, skipping entries that do not fit.
///
/// Malformed sub-records never abort the surrounding parse.
pub fn decode_entries<T: DeserializeOwned>(
    source: &str,
    entries: Vec<serde_json::Value>,
) -> Vec<T> {
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<T>(entry) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                debug!(source, index, error = %error, "skipping malformed entry");
                None
            }
        })
        .collect()
}

/// Returns the first non-blank string of an optional list.
#[must_use]
pub fn first_non_blank(values: Option<&[String]>) -> Option<String> {
    values?
        .iter()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}
