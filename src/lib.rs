//! Harvester Core Library
//!
//! Resolves batches of bibliographic identifiers (ISBN or OCLC number) into
//! records holding the ISBN, OCLC number, Library of Congress call number and
//! the name of the source that supplied the call number.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`identifier`] - Identifier kinds and kind inference
//! - [`record`] - Record shape, wanted fields and the first-writer-wins merge
//! - [`rate_limiter`] - Per-source sliding-window rate limiting
//! - [`source`] - Source adapters (HTTP APIs, HTML scraping, Z39.50) and their registry
//! - [`probe`] - Pre-flight availability check of the configured sources
//! - [`db`] / [`store`] - SQLite-backed persistent record store
//! - [`engine`] - Per-identifier state machine and the batch driver
//! - [`batch`] - Input and output batch files

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod db;
pub mod engine;
pub mod identifier;
pub mod probe;
pub mod rate_limiter;
pub mod record;
pub mod source;
pub mod store;
mod user_agent;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use batch::{
    BatchIoError, InputBatch, OUTPUT_HEADER, default_output_path, format_row, parse_input,
    read_input, write_output, write_rows,
};
pub use db::{Database, DatabaseOptions, DbError};
pub use engine::{
    BatchOutcome, DEFAULT_CONCURRENCY, EngineError, MAX_CONCURRENCY, Resolution,
    ResolutionEngine, ResolutionOutcome, ResolutionRun, RunStats,
};
pub use identifier::{Identifier, IdentifierKind};
pub use probe::{Availability, ProbeOptions, ProbedSource, UnusableReason, probe_sources};
pub use rate_limiter::{DEFAULT_RATE_LIMIT, RateLimit, RateLimiter};
pub use record::{Field, MetadataRecord, PartialRecord, WantedFields, is_complete, merge};
pub use source::{
    ProbeStatus, SourceAdapter, SourceError, SourceRegistry, SourceSettings,
    build_source_registry,
};
pub use store::{RecordStore, SqliteRecordStore, StoreError, StoredRecord};
