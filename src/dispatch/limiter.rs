//! Per-tier rolling-window rate limiting.
//!
//! Each paid tier gets a window of call-start timestamps; a call may start
//! only while fewer than `limit` starts fall inside the rolling window.
//! Built on the tokio clock so tests can pause and advance time.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DispatchConfig;
use crate::tier::Tier;

#[derive(Debug)]
struct Window {
    limit: u32,
    span: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl Window {
    fn prune(&self, starts: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&front) = starts.front() {
            if now.duration_since(front) >= self.span {
                starts.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Rolling-window limiter over all tiers. The free tier has no window and
/// always allows.
#[derive(Debug)]
pub struct RateLimiter {
    windows: HashMap<Tier, Window>,
}

impl RateLimiter {
    pub fn new(config: &DispatchConfig) -> Self {
        let mut windows = HashMap::new();
        for tier in Tier::ALL {
            if let Some(limit) = config.rate_limit(tier) {
                windows.insert(
                    tier,
                    Window {
                        limit,
                        span: Duration::from_secs(config.rate_window_secs),
                        starts: Mutex::new(VecDeque::new()),
                    },
                );
            }
        }
        Self { windows }
    }

    /// Whether a call on `tier` could start right now. Pure check, records
    /// nothing.
    pub fn would_allow(&self, tier: Tier) -> bool {
        let Some(window) = self.windows.get(&tier) else {
            return true;
        };
        let mut starts = window.starts.lock().expect("rate window lock");
        window.prune(&mut starts, Instant::now());
        (starts.len() as u32) < window.limit
    }

    /// Records a call start on `tier`. Callers check [`would_allow`] first;
    /// the dispatcher worker is the only writer so the pair is race-free.
    ///
    /// [`would_allow`]: RateLimiter::would_allow
    pub fn record_start(&self, tier: Tier) {
        if let Some(window) = self.windows.get(&tier) {
            let mut starts = window.starts.lock().expect("rate window lock");
            let now = Instant::now();
            window.prune(&mut starts, now);
            starts.push_back(now);
        }
    }

    /// How long until the oldest start on `tier` leaves the window. `None`
    /// when a call could start immediately.
    pub fn next_slot_in(&self, tier: Tier) -> Option<Duration> {
        let window = self.windows.get(&tier)?;
        let mut starts = window.starts.lock().expect("rate window lock");
        let now = Instant::now();
        window.prune(&mut starts, now);
        if (starts.len() as u32) < window.limit {
            return None;
        }
        starts
            .front()
            .map(|&front| window.span.saturating_sub(now.duration_since(front)))
    }
}
