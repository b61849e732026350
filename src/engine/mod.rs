//! Resolution engine: drives each identifier through cache lookup, the
//! ordered source loop and persistence.
//!
//! # Overview
//!
//! Per identifier the engine:
//! 1. loads the stored record, if any, and copies the wanted fields it holds
//! 2. skips every source when that already completes the record
//! 3. otherwise asks each usable source in priority order, merging first-writer-wins
//!    and stopping as soon as the record is complete
//! 4. writes the record back to the store and emits it
//!
//! A failing source never aborts the identifier, and a failing store write
//! never hides the resolved record.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use harvester_core::{
//!     Database, Identifier, ProbeOptions, RecordStore, ResolutionEngine, ResolutionRun,
//!     SqliteRecordStore, WantedFields,
//! };
//! use harvester_core::rate_limiter::{RateLimiter, DEFAULT_RATE_LIMIT};
//! use harvester_core::source::{SourceSettings, build_source_registry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = Arc::new(RateLimiter::new(DEFAULT_RATE_LIMIT));
//! let registry = build_source_registry(&SourceSettings::default(), &limiter);
//! let adapters = registry.select(&["LOC".to_string(), "OpenLibrary".to_string()]);
//!
//! let identifiers = vec![Identifier::infer("9780191513015")];
//! let wanted = WantedFields::from_toggles(false, true, true);
//! let run = ResolutionRun::prepare(adapters, &identifiers[0], wanted, ProbeOptions::default()).await;
//!
//! let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(Database::new_in_memory().await?));
//! let engine = ResolutionEngine::new(Some(store), 1)?;
//! let outcome = engine.resolve_batch(&run, &identifiers, |_, done, total| {
//!     println!("{done}/{total}");
//! }).await;
//! assert_eq!(outcome.resolutions.len(), 1);
//! # Ok(())
//! # }
//! ```

mod stats;

pub use stats::RunStats;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, info, instrument, warn};

use crate::identifier::{Identifier, IdentifierKind};
use crate::probe::{ProbeOptions, ProbedSource, probe_sources};
use crate::record::{MetadataRecord, WantedFields, is_complete, merge};
use crate::source::SourceAdapter;
use crate::store::RecordStore;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 32;

/// Default number of identifiers resolved at once.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Error type for engine construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// How the resolution of one identifier ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The stored record already held every wanted field; no source was asked.
    CacheHit,
    /// Sources completed the record.
    Complete,
    /// Every usable source was asked and wanted fields are still missing.
    SourcesExhausted,
}

/// The emitted result for one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The input identifier.
    pub identifier: Identifier,
    /// The merged record.
    pub record: MetadataRecord,
    /// How resolution ended.
    pub outcome: ResolutionOutcome,
    /// Whether the record was written to the store.
    pub persisted: bool,
}

impl Resolution {
    /// Returns whether every wanted field was found.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcome != ResolutionOutcome::SourcesExhausted
    }
}

/// Result of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Resolutions in input order. Identifiers skipped after cancellation are absent.
    pub resolutions: Vec<Resolution>,
    /// Whether cancellation stopped the batch early.
    pub interrupted: bool,
}

/// Transient state for one batch execution.
///
/// Holds the probed source list, the wanted fields, the cancellation flag and
/// the running tally. Created at batch start and passed explicitly to the engine.
#[derive(Debug)]
pub struct ResolutionRun {
    sources: Vec<ProbedSource>,
    wanted: WantedFields,
    identifier_kind: IdentifierKind,
    cancel: Arc<AtomicBool>,
    stats: RunStats,
}

impl ResolutionRun {
    /// Creates a run from an already probed source list.
    #[must_use]
    pub fn new(
        sources: Vec<ProbedSource>,
        wanted: WantedFields,
        identifier_kind: IdentifierKind,
    ) -> Self {
        Self {
            sources,
            wanted,
            identifier_kind,
            cancel: Arc::new(AtomicBool::new(false)),
            stats: RunStats::new(),
        }
    }

    /// Probes `adapters` once with `sample` and creates the run.
    pub async fn prepare(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        sample: &Identifier,
        wanted: WantedFields,
        options: ProbeOptions,
    ) -> Self {
        let sources = probe_sources(adapters, sample, options).await;
        Self::new(sources, wanted, sample.kind())
    }

    /// Shares an externally owned cancellation flag (e.g. set by a signal handler).
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Returns the cancellation flag.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Requests cancellation. Identifiers already started finish normally.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Returns the probed sources in priority order.
    #[must_use]
    pub fn sources(&self) -> &[ProbedSource] {
        &self.sources
    }

    /// Returns the sources the engine will query.
    pub fn usable_sources(&self) -> impl Iterator<Item = &ProbedSource> {
        self.sources.iter().filter(|source| source.is_usable())
    }

    /// Returns the wanted fields.
    #[must_use]
    pub fn wanted(&self) -> &WantedFields {
        &self.wanted
    }

    /// Returns the identifier kind the sources were probed for.
    #[must_use]
    pub fn identifier_kind(&self) -> IdentifierKind {
        self.identifier_kind
    }

    /// Returns the running tally.
    #[must_use]
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }
}

/// Orchestrates resolution of identifiers against a probed source list.
pub struct ResolutionEngine {
    store: Option<Arc<dyn RecordStore>>,
    concurrency: usize,
}

impl std::fmt::Debug for ResolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionEngine")
            .field("store", &self.store.is_some())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl ResolutionEngine {
    /// Creates an engine. `store` of `None` disables caching entirely.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `concurrency` is outside
    /// 1..=32.
    pub fn new(
        store: Option<Arc<dyn RecordStore>>,
        concurrency: usize,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }
        debug!(concurrency, cache = store.is_some(), "creating resolution engine");
        Ok(Self { store, concurrency })
    }

    /// Returns the configured concurrency.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Resolves one identifier: cache check, source loop, persistence.
    #[instrument(skip(self, run), fields(identifier = %identifier))]
    pub async fn resolve_identifier(
        &self,
        run: &ResolutionRun,
        identifier: &Identifier,
    ) -> Resolution {
        let wanted = run.wanted();
        let mut record = MetadataRecord::for_identifier(identifier);
        let cache_hit = self.fill_from_store(run, identifier, &mut record).await;

        let outcome = if is_complete(&record, wanted) {
            if cache_hit {
                debug!("record complete from store, no source queried");
                ResolutionOutcome::CacheHit
            } else {
                ResolutionOutcome::Complete
            }
        } else {
            query_sources(run, identifier, &mut record).await
        };

        let persisted = self.persist(run, identifier, &record).await;
        run.stats()
            .record_processed(outcome != ResolutionOutcome::SourcesExhausted);

        Resolution {
            identifier: identifier.clone(),
            record,
            outcome,
            persisted,
        }
    }

    /// Returns whether a stored record existed.
    async fn fill_from_store(
        &self,
        run: &ResolutionRun,
        identifier: &Identifier,
        record: &mut MetadataRecord,
    ) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.get(identifier).await {
            Ok(Some(cached)) => {
                run.stats().record_cache_hit();
                let filled = record.fill_from_cache(&cached, run.wanted());
                debug!(filled = filled.len(), "cache hit");
                true
            }
            Ok(None) => {
                debug!("cache miss");
                false
            }
            Err(error) => {
                run.stats().record_store_failure();
                warn!(identifier = %identifier, error = %error, "store read failed, treating as cache miss");
                false
            }
        }
    }

    async fn persist(
        &self,
        run: &ResolutionRun,
        identifier: &Identifier,
        record: &MetadataRecord,
    ) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.upsert(identifier, record).await {
            Ok(()) => true,
            Err(error) => {
                run.stats().record_store_failure();
                warn!(
                    identifier = %identifier,
                    busy = error.is_busy(),
                    error = %error,
                    "store write failed, record still emitted"
                );
                false
            }
        }
    }

    /// Resolves `identifiers`, up to `concurrency` at a time, emitting in input order.
    ///
    /// `on_progress` is called after each identifier with the resolution and
    /// the `processed / total` counts. Cancellation is checked before each
    /// identifier starts; identifiers already started run to completion.
    #[instrument(skip_all, fields(total = identifiers.len(), concurrency = self.concurrency))]
    pub async fn resolve_batch<F>(
        &self,
        run: &ResolutionRun,
        identifiers: &[Identifier],
        mut on_progress: F,
    ) -> BatchOutcome
    where
        F: FnMut(&Resolution, usize, usize),
    {
        let total = identifiers.len();
        info!(
            total,
            usable_sources = run.usable_sources().count(),
            wanted = %run.wanted(),
            "starting resolution batch"
        );

        let mut results = stream::iter(identifiers)
            .map(move |identifier| async move {
                if run.is_cancelled() {
                    run.stats().record_skipped();
                    return None;
                }
                Some(self.resolve_identifier(run, identifier).await)
            })
            .buffered(self.concurrency);

        let mut resolutions = Vec::with_capacity(total);
        while let Some(result) = results.next().await {
            if let Some(resolution) = result {
                on_progress(&resolution, resolutions.len() + 1, total);
                resolutions.push(resolution);
            }
        }

        let stats = run.stats();
        let interrupted = stats.skipped() > 0;
        info!(
            processed = stats.processed(),
            complete = stats.complete(),
            incomplete = stats.incomplete(),
            cache_hits = stats.cache_hits(),
            source_calls = stats.source_calls(),
            source_failures = stats.source_failures(),
            store_failures = stats.store_failures(),
            skipped = stats.skipped(),
            "resolution batch finished"
        );

        BatchOutcome {
            resolutions,
            interrupted,
        }
    }
}

/// Asks each usable source in order until the record is complete.
async fn query_sources(
    run: &ResolutionRun,
    identifier: &Identifier,
    record: &mut MetadataRecord,
) -> ResolutionOutcome {
    let wanted = run.wanted();
    for source in run.usable_sources() {
        let adapter = &source.adapter;
        if !adapter.supports(identifier.kind()) {
            debug!(source = %adapter.name(), "source does not support this identifier kind");
            continue;
        }

        run.stats().record_source_call();
        match adapter.fetch(identifier, wanted).await {
            Ok(partial) => {
                let filled = merge(record, &partial.retain_wanted(wanted), adapter.name());
                debug!(source = %adapter.name(), filled = ?filled, "merged source result");
            }
            Err(error) => {
                run.stats().record_source_failure();
                warn!(
                    source = %adapter.name(),
                    identifier = %identifier,
                    transient = error.is_transient(),
                    error = %error,
                    "source failed, trying next source"
                );
            }
        }

        if is_complete(record, wanted) {
            return ResolutionOutcome::Complete;
        }
    }
    ResolutionOutcome::SourcesExhausted
}
