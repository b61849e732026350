//! Per-source rate limiting for catalog lookups.
//!
//! This module provides the [`RateLimiter`] struct which enforces an
//! "N calls per T seconds" sliding window for each source, so that no source
//! ever sees more than N calls start within any trailing T-second window.
//!
//! # Overview
//!
//! Windows are tracked per source name, meaning calls to different sources
//! proceed independently. Only calls to the *same* source are delayed, and
//! a call is never dropped: [`RateLimiter::acquire`] only waits.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use harvester_core::rate_limiter::{RateLimit, RateLimiter};
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(RateLimit::new(10, Duration::from_secs(10))));
//! limiter.register("LOC", RateLimit::new(2, Duration::from_secs(1)));
//!
//! // First two calls proceed immediately, the third waits for the window
//! limiter.acquire("LOC").await;
//! limiter.acquire("LOC").await;
//! limiter.acquire("LOC").await;
//!
//! // Other sources are unaffected
//! limiter.acquire("Harvard").await;
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Threshold of cumulative delay per source above which an info line is logged.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Default policy applied to sources that were never registered: 10 calls per 10 seconds.
pub const DEFAULT_RATE_LIMIT: RateLimit = RateLimit {
    calls: 10,
    period: Duration::from_secs(10),
};

/// A "calls per period" policy for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum number of calls that may start within one period.
    pub calls: u32,
    /// Length of the trailing window.
    pub period: Duration,
}

impl RateLimit {
    /// Creates a new policy. A zero `calls` value is treated as one call.
    #[must_use]
    pub fn new(calls: u32, period: Duration) -> Self {
        Self {
            calls: calls.max(1),
            period,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        DEFAULT_RATE_LIMIT
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} calls / {}s", self.calls, self.period.as_secs_f64())
    }
}

/// Per-source sliding-window rate limiter.
///
/// Designed to be wrapped in `Arc` and shared by every adapter and every
/// concurrent resolution. `DashMap` holds per-source state. Inside each
/// entry, `turn` queues waiters in arrival order and is held while sleeping;
/// `state` is only locked briefly, so a Retry-After pause recorded while
/// someone waits is seen when that waiter re-checks.
#[derive(Debug)]
pub struct RateLimiter {
    /// Policy for sources that were not registered explicitly.
    default_limit: RateLimit,

    /// Whether rate limiting is disabled. Only tests build disabled limiters.
    disabled: bool,

    /// Per-source state, keyed by lowercase source name.
    /// Values are `Arc` so the map shard lock is released before awaiting.
    sources: DashMap<String, Arc<SourceWindow>>,
}

/// State tracked for each source.
#[derive(Debug)]
struct SourceWindow {
    limit: RateLimit,
    turn: Mutex<()>,
    state: Mutex<WindowState>,
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct WindowState {
    /// Start times of calls still inside the trailing window, oldest first.
    starts: VecDeque<Instant>,
    /// Server-mandated pause recorded from a Retry-After response.
    blocked_until: Option<Instant>,
}

impl WindowState {
    /// Drops call starts that have left the window ending at `now`.
    fn prune(&mut self, now: Instant, period: Duration) {
        while let Some(front) = self.starts.front() {
            if *front + period <= now {
                self.starts.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns how long the caller must wait before a call may start at `now`,
    /// or `None` when a slot is free.
    fn required_wait(&mut self, now: Instant, limit: RateLimit) -> Option<Duration> {
        if let Some(until) = self.blocked_until {
            if until > now {
                return Some(until - now);
            }
            self.blocked_until = None;
        }

        self.prune(now, limit.period);
        if self.starts.len() < limit.calls as usize {
            return None;
        }
        self.starts
            .front()
            .map(|oldest| (*oldest + limit.period).saturating_duration_since(now))
    }
}

impl SourceWindow {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            turn: Mutex::new(()),
            state: Mutex::new(WindowState::default()),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Adds to the cumulative delay and returns the new total.
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

fn source_key(source: &str) -> String {
    source.trim().to_lowercase()
}

impl RateLimiter {
    /// Creates a rate limiter applying `default_limit` to unregistered sources.
    #[must_use]
    #[instrument(skip_all, fields(default = %default_limit))]
    pub fn new(default_limit: RateLimit) -> Self {
        debug!("creating rate limiter");
        Self {
            default_limit,
            disabled: false,
            sources: DashMap::new(),
        }
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            default_limit: DEFAULT_RATE_LIMIT,
            disabled: true,
            sources: DashMap::new(),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the policy used for unregistered sources.
    #[must_use]
    pub fn default_limit(&self) -> RateLimit {
        self.default_limit
    }

    /// Sets the policy for one source, replacing any previous window state.
    pub fn register(&self, source: &str, limit: RateLimit) {
        debug!(source, %limit, "registering source rate limit");
        self.sources
            .insert(source_key(source), Arc::new(SourceWindow::new(limit)));
    }

    /// Returns the effective policy for `source`.
    #[must_use]
    pub fn limit_for(&self, source: &str) -> RateLimit {
        self.sources
            .get(&source_key(source))
            .map_or(self.default_limit, |window| window.limit)
    }

    fn window(&self, source: &str) -> Arc<SourceWindow> {
        self.sources
            .entry(source_key(source))
            .or_insert_with(|| Arc::new(SourceWindow::new(self.default_limit)))
            .clone()
    }

    /// Waits until a call slot is free for `source`, then records the call start.
    ///
    /// Never fails and never drops the call; it only delays.
    #[instrument(skip(self))]
    pub async fn acquire(&self, source: &str) {
        if self.disabled {
            return;
        }

        // Clone the Arc out of the map so no shard lock is held across await
        let window = self.window(source);
        let _turn = window.turn.lock().await;

        loop {
            let wait = {
                let mut state = window.state.lock().await;
                let now = Instant::now();
                match state.required_wait(now, window.limit) {
                    Some(wait) => wait,
                    None => {
                        state.starts.push_back(now);
                        break;
                    }
                }
            };

            let cumulative = window.add_cumulative_delay(wait);
            debug!(
                source,
                delay_ms = wait.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "applying rate limit delay"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                info!(
                    source,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "source is rate limiting this run heavily"
                );
            }

            tokio::time::sleep(wait).await;
        }
    }

    /// Records a server-mandated pause (from a Retry-After header).
    ///
    /// Subsequent [`Self::acquire`] calls for `source` wait until the pause
    /// has elapsed, in addition to the regular window.
    #[instrument(skip(self))]
    pub async fn record_rate_limit(&self, source: &str, delay: Duration) {
        let window = self.window(source);
        let cumulative = window.add_cumulative_delay(delay);
        let until = Instant::now() + delay.min(MAX_RETRY_AFTER);

        let mut state = window.state.lock().await;
        let blocked_until = state
            .blocked_until
            .map_or(until, |current| current.max(until));
        state.blocked_until = Some(blocked_until);

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                source,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - source may be under heavy load"
            );
        } else {
            debug!(source, delay_ms = delay.as_millis(), "recorded server rate limit");
        }
    }

    /// Returns the number of calls that started within the current window for `source`.
    pub async fn calls_in_window(&self, source: &str) -> usize {
        let Some(window) = self
            .sources
            .get(&source_key(source))
            .map(|entry| Arc::clone(entry.value()))
        else {
            return 0;
        };
        let mut state = window.state.lock().await;
        state.prune(Instant::now(), window.limit.period);
        state.starts.len()
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and RFC 7231 HTTP-dates. Returns `None` if the
/// value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use harvester_core::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        };
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => Some(
            datetime
                .duration_since(std::time::SystemTime::now())
                .map_or(Duration::ZERO, |d| d.min(MAX_RETRY_AFTER)),
        ),
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}
