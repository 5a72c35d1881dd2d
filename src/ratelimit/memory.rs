//! In-process counter store.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::CounterStore;
use super::counter::CounterEntry;
use crate::error::Result;

/// Default minimum spacing between full sweeps of expired entries.
const DEFAULT_SWEEP_INTERVAL: TimeDelta = TimeDelta::seconds(60);

/// Counter store backed by a sharded concurrent map.
///
/// Per-key read-modify-write goes through `DashMap::entry`, which holds the
/// shard lock for the whole update. Expired entries are dropped inline when
/// their key is hit, and the whole map is swept at most once per sweep
/// interval on the request path.
pub struct MemoryStore {
    counters: DashMap<String, CounterEntry>,
    sweep_interval: TimeDelta,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryStore {
    /// Create an empty store with the default sweep interval.
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Create an empty store that sweeps expired entries at most once per `interval`.
    ///
    /// A zero interval sweeps on every increment.
    pub fn with_sweep_interval(interval: TimeDelta) -> Self {
        Self {
            counters: DashMap::new(),
            sweep_interval: interval,
            last_sweep: Mutex::new(None),
        }
    }

    fn sweep_due(&self, now: DateTime<Utc>) -> bool {
        let mut last_sweep = self.last_sweep.lock();
        let due = match *last_sweep {
            Some(last) => now - last >= self.sweep_interval,
            None => true,
        };
        if due {
            *last_sweep = Some(now);
        }
        due
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.counters.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(
        &self,
        key: &str,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<CounterEntry> {
        // Must run before taking the entry lock: retain locks every shard.
        if self.sweep_due(now) {
            let removed = self.sweep(now);
            if removed > 0 {
                debug!(removed, "Swept expired rate limit counters");
            }
        }

        let entry = *self
            .counters
            .entry(key.to_string())
            .and_modify(|entry| entry.hit(now, window))
            .or_insert_with(|| CounterEntry::open(now, window));

        trace!(key = %key, count = entry.count, "Counter incremented");
        Ok(entry)
    }

    async fn decrement(&self, key: &str, reset_time: DateTime<Utc>) -> Result<()> {
        if let Some(mut entry) = self.counters.get_mut(key) {
            if entry.reset_time == reset_time && entry.count > 0 {
                entry.count -= 1;
                trace!(key = %key, count = entry.count, "Counter decremented");
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CounterEntry>> {
        Ok(self.counters.get(key).map(|entry| *entry))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        *self.last_sweep.lock() = Some(now);
        Ok(self.sweep(now))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.counters.len())
    }
}
