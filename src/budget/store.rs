//! Shared counter store backing the tenant-daily quota scope.
//!
//! The ledger only needs three atomic operations, so the boundary is a small
//! trait. Production deployments can back it with any store that offers
//! compare-and-set with expiry; [`InMemoryCounterStore`] is the in-process
//! implementation used by the CLI and the tests.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Atomic counters with per-key expiry.
pub trait CounterStore: Send + Sync {
    /// Atomically adds `delta` to `key` if the result stays within
    /// `0..=limit`, creating the counter with `ttl` if absent.
    /// Returns the new value, or the current value unmodified on refusal.
    fn try_add(&self, key: &str, delta: i64, limit: i64, ttl: Duration) -> Result<i64, i64>;

    /// Atomically subtracts `delta` from `key` if the counter still exists
    /// (has not expired), flooring at zero. Returns `None` for an expired
    /// or unknown counter.
    fn sub_if_present(&self, key: &str, delta: i64) -> Option<i64>;

    /// Current value, treating expired or unknown counters as zero.
    fn get(&self, key: &str) -> i64;
}

#[derive(Debug)]
struct CounterEntry {
    value: i64,
    expires_at: DateTime<Utc>,
}

/// In-process counter store on a concurrent map. Entry mutation happens
/// under the map's per-key lock, so each operation is atomic.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    entries: DashMap<String, CounterEntry>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn insert_raw(&self, key: &str, value: i64, expires_at: DateTime<Utc>) {
        self.entries
            .insert(key.to_string(), CounterEntry { value, expires_at });
    }
}

impl CounterStore for InMemoryCounterStore {
    fn try_add(&self, key: &str, delta: i64, limit: i64, ttl: Duration) -> Result<i64, i64> {
        let now = Utc::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            CounterEntry {
                value: 0,
                expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24)),
            }
        });

        // An expired counter restarts from zero with a fresh window.
        if entry.expires_at <= now {
            entry.value = 0;
            entry.expires_at =
                now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24));
        }

        let next = entry.value + delta;
        if next < 0 || next > limit {
            return Err(entry.value);
        }
        entry.value = next;
        Ok(next)
    }

    fn sub_if_present(&self, key: &str, delta: i64) -> Option<i64> {
        let now = Utc::now();
        let mut entry = self.entries.get_mut(key)?;
        if entry.expires_at <= now {
            return None;
        }
        entry.value = (entry.value - delta).max(0);
        Some(entry.value)
    }

    fn get(&self, key: &str) -> i64 {
        let now = Utc::now();
        self.entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value)
            .unwrap_or(0)
    }
}
