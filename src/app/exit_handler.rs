//! Exit code logic for the harvester process.
//!
//! Single responsibility: map the run tally to the process exit outcome.

use harvester_core::RunStats;

use crate::ProcessExit;

/// Determines the process exit outcome of a harvest run.
pub(crate) fn determine_exit_outcome(stats: &RunStats, interrupted: bool) -> ProcessExit {
    if interrupted {
        ProcessExit::Interrupted
    } else if stats.incomplete() > 0 || stats.store_failures() > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Success
    }
}
