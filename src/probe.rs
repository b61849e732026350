//! Pre-flight availability check for the sources of one run.
//!
//! Each source is checked once per run, before any identifier is resolved:
//! the identifier-kind policy and configuration preconditions first, then a
//! single status request. Unusable sources stay in the list, flagged, so the
//! caller can report them; the engine skips them.

use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::identifier::{Identifier, IdentifierKind};
use crate::source::{ProbeStatus, SourceAdapter};

/// Why a source is excluded from a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnusableReason {
    /// The source cannot look up identifiers of the run's kind.
    UnsupportedIdentifierKind(IdentifierKind),
    /// A configuration precondition failed (missing credential, missing tool).
    PreconditionFailed(String),
    /// The status request failed.
    Unreachable,
}

impl fmt::Display for UnusableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedIdentifierKind(kind) => {
                write!(f, "does not support {} lookups", kind.label())
            }
            Self::PreconditionFailed(reason) => write!(f, "precondition failed: {reason}"),
            Self::Unreachable => f.write_str("unreachable"),
        }
    }
}

/// Availability of one source for the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// The source will be queried.
    Usable,
    /// The source is skipped for the whole run.
    Unusable(UnusableReason),
}

/// A source together with its pre-flight verdict.
#[derive(Clone)]
pub struct ProbedSource {
    /// The adapter.
    pub adapter: Arc<dyn SourceAdapter>,
    /// Verdict of the probe.
    pub availability: Availability,
}

impl ProbedSource {
    /// Marks `adapter` usable without probing.
    #[must_use]
    pub fn usable(adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            adapter,
            availability: Availability::Usable,
        }
    }

    /// Returns the source name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    /// Returns whether the engine will query this source.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.availability == Availability::Usable
    }
}

impl fmt::Debug for ProbedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbedSource")
            .field("name", &self.name())
            .field("availability", &self.availability)
            .finish()
    }
}

/// Controls the network half of the probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Skip status requests; only kind and precondition checks run.
    pub skip_network: bool,
}

/// Checks kind support and preconditions without any I/O.
fn static_verdict(adapter: &dyn SourceAdapter, kind: IdentifierKind) -> Option<UnusableReason> {
    if !adapter.supports(kind) {
        return Some(UnusableReason::UnsupportedIdentifierKind(kind));
    }
    if let Err(error) = adapter.check_preconditions() {
        return Some(UnusableReason::PreconditionFailed(error.to_string()));
    }
    None
}

/// Probes every source once, using `sample` to build the status requests.
///
/// Status requests run concurrently; the returned list keeps the input order.
pub async fn probe_sources(
    adapters: Vec<Arc<dyn SourceAdapter>>,
    sample: &Identifier,
    options: ProbeOptions,
) -> Vec<ProbedSource> {
    let kind = sample.kind();
    let probes = adapters.into_iter().map(|adapter| async move {
        let availability = match static_verdict(adapter.as_ref(), kind) {
            Some(reason) => Availability::Unusable(reason),
            None if options.skip_network => Availability::Usable,
            None => match adapter.probe_status(sample).await {
                ProbeStatus::Reachable => Availability::Usable,
                ProbeStatus::Unreachable => Availability::Unusable(UnusableReason::Unreachable),
            },
        };
        match &availability {
            Availability::Usable => debug!(source = %adapter.name(), "source usable"),
            Availability::Unusable(reason) => {
                warn!(source = %adapter.name(), reason = %reason, "source unusable for this run");
            }
        }
        ProbedSource {
            adapter,
            availability,
        }
    });

    let probed = join_all(probes).await;
    let usable = probed.iter().filter(|source| source.is_usable()).count();
    info!(
        usable,
        total = probed.len(),
        identifier_kind = %kind,
        skipped_network = options.skip_network,
        "source probe complete"
    );
    probed
}
