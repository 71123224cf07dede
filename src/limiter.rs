//! Fixed-window admission control
//!
//! A request must pass a process-wide window and then a window keyed by the
//! client's identity. Rejected requests are not counted in either window.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Reset point used when `now + length` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Which window rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    Global,
    Client,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitScope::Global => f.write_str("global"),
            LimitScope::Client => f.write_str("client"),
        }
    }
}

/// Returned when a request does not fit in one of the windows
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{scope} rate limit exceeded, retry after {retry_after_secs}s")]
pub struct RateLimitExceeded {
    pub scope: LimitScope,
    /// Whole seconds until the rejecting window resets (at least 1)
    pub retry_after_secs: u64,
}

/// Maximum request count per window length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub max: u32,
    pub window: Duration,
}

impl WindowLimit {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }
}

/// Counter for one fixed window
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: Instant,
}

impl RateWindow {
    fn open(now: Instant, length: Duration) -> Self {
        Self {
            count: 0,
            reset_at: now
                .checked_add(length)
                .or_else(|| now.checked_add(FAR_FUTURE))
                .unwrap_or(now),
        }
    }

    /// Starts a fresh window once `reset_at` has been reached
    fn roll(&mut self, now: Instant, length: Duration) {
        if now >= self.reset_at {
            *self = Self::open(now, length);
        }
    }

    fn retry_after_secs(&self, now: Instant) -> u64 {
        let remaining = self.reset_at.saturating_duration_since(now);
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        secs.max(1)
    }
}

#[derive(Debug)]
struct LimiterState {
    global: RateWindow,
    clients: HashMap<String, RateWindow>,
}

/// Global plus per-client fixed-window rate limiter
///
/// All bookkeeping sits behind a single lock so a check across both scopes is
/// atomic: either both counters are incremented or neither is.
#[derive(Debug)]
pub struct RateLimiter {
    global_limit: WindowLimit,
    client_limit: WindowLimit,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(global_limit: WindowLimit, client_limit: WindowLimit) -> Self {
        Self {
            global_limit,
            client_limit,
            state: Mutex::new(LimiterState {
                global: RateWindow::open(Instant::now(), global_limit.window),
                clients: HashMap::new(),
            }),
        }
    }

    /// Admits or rejects one request from `client_id`
    ///
    /// The global window is checked first; a request rejected there never
    /// creates or touches the client's window.
    pub fn check_limits(&self, client_id: &str) -> Result<(), RateLimitExceeded> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        state.global.roll(now, self.global_limit.window);
        if state.global.count >= self.global_limit.max {
            return Err(RateLimitExceeded {
                scope: LimitScope::Global,
                retry_after_secs: state.global.retry_after_secs(now),
            });
        }

        let client = state
            .clients
            .entry(client_id.to_owned())
            .or_insert_with(|| RateWindow::open(now, self.client_limit.window));
        client.roll(now, self.client_limit.window);
        if client.count >= self.client_limit.max {
            return Err(RateLimitExceeded {
                scope: LimitScope::Client,
                retry_after_secs: client.retry_after_secs(now),
            });
        }

        client.count += 1;
        state.global.count += 1;
        Ok(())
    }

    /// Drops client windows whose reset time has passed
    ///
    /// Returns the number of windows removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let before = state.clients.len();
        state.clients.retain(|_, window| window.reset_at > now);
        before - state.clients.len()
    }

    /// Number of client identities currently holding a window
    pub fn tracked_clients(&self) -> usize {
        self.state.lock().clients.len()
    }
}
