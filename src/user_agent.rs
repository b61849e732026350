//! Shared User-Agent string for source HTTP clients.

/// Default User-Agent for every source (no per-source name in the header).
#[must_use]
pub(crate) fn default_source_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("harvester/{version} (library-metadata-tool)")
}
