//! Progress UI (bar) for harvest runs.

use std::time::Duration;

use harvester_core::{Resolution, ResolutionOutcome};
use indicatif::{ProgressBar, ProgressStyle};

/// Creates the progress bar when requested; `None` keeps the run silent.
pub(crate) fn create_progress_ui(use_bar: bool, total: usize) -> Option<ProgressBar> {
    if !use_bar {
        return None;
    }
    let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{pos}/{len}] {wide_bar} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    Some(bar)
}

/// Short status text for the last resolved identifier.
pub(crate) fn progress_message(resolution: &Resolution) -> String {
    let status = match resolution.outcome {
        ResolutionOutcome::CacheHit => "cached",
        ResolutionOutcome::Complete => "complete",
        ResolutionOutcome::SourcesExhausted => "incomplete",
    };
    format!("{} {status}", resolution.identifier.value())
}

/// Advances the bar after one resolution.
pub(crate) fn report_progress(bar: Option<&ProgressBar>, resolution: &Resolution, done: usize) {
    let Some(bar) = bar else {
        return;
    };
    bar.set_position(u64::try_from(done).unwrap_or(u64::MAX));
    bar.set_message(progress_message(resolution));
}

pub(crate) fn finish_progress_ui(bar: Option<ProgressBar>) {
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
}
