//! Counter store trait for abstracting where window counters live.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::counter::CounterEntry;
use crate::error::Result;

/// Trait for counter store implementations.
///
/// The gate only talks to its counters through this trait, so the in-process
/// `MemoryStore` can be swapped for a shared key-value backend when several
/// processes must enforce one quota. Implementations must make `increment`
/// atomic per key: two concurrent hits on the same key may never observe the
/// same post-increment count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record one hit for `key` and return the post-increment entry.
    ///
    /// An entry whose window ended before `now` is replaced by a fresh window
    /// of length `window` holding this single hit.
    async fn increment(&self, key: &str, window: TimeDelta, now: DateTime<Utc>)
        -> Result<CounterEntry>;

    /// Undo one hit for `key`, if the stored window is still the one ending at `reset_time`.
    async fn decrement(&self, key: &str, reset_time: DateTime<Utc>) -> Result<()>;

    /// Look up the current entry for `key` without modifying it.
    async fn get(&self, key: &str) -> Result<Option<CounterEntry>>;

    /// Drop every entry whose window ended before `now`, returning how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Number of tracked keys.
    async fn len(&self) -> Result<usize>;
}
