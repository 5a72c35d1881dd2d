//! Fixed-window counter entries and rate limit decisions.

use chrono::{DateTime, TimeDelta, Utc};

/// Per-key counter state for a single fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Requests recorded in the current window
    pub count: u64,
    /// When the current window ends
    pub reset_time: DateTime<Utc>,
}

impl CounterEntry {
    /// Open a new window at `now` holding a single hit.
    pub fn open(now: DateTime<Utc>, window: TimeDelta) -> Self {
        Self {
            count: 1,
            reset_time: now
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Whether the window has fully elapsed at `now`.
    ///
    /// A window ending exactly at `now` is still current.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.reset_time < now
    }

    /// Record one more hit, opening a fresh window if this one has expired.
    pub fn hit(&mut self, now: DateTime<Utc>, window: TimeDelta) {
        if self.is_expired(now) {
            *self = Self::open(now, window);
        } else {
            self.count += 1;
        }
    }
}

/// The outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Maximum requests per window for the applied policy
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window ends
    pub reset_time: DateTime<Utc>,
    /// Post-increment hit count for the current window
    pub total_hits: u64,
}

impl RateLimitDecision {
    /// Derive a decision from the counter state after a hit.
    pub fn from_entry(entry: &CounterEntry, limit: u64) -> Self {
        Self {
            allowed: entry.count <= limit,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_time: entry.reset_time,
            total_hits: entry.count,
        }
    }

    /// The decision as it stands once this hit has been given back.
    pub fn released(&self) -> Self {
        let total_hits = self.total_hits.saturating_sub(1);
        Self {
            remaining: self.limit.saturating_sub(total_hits),
            total_hits,
            ..*self
        }
    }

    /// Seconds a rejected client should wait, rounded up and never negative.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_time - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            (millis as u64).div_ceil(1000)
        }
    }

    /// Window reset as a unix timestamp in seconds.
    pub fn reset_unix_secs(&self) -> i64 {
        self.reset_time.timestamp()
    }
}
