//! Core rate limiter implementation.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::backend::CounterStore;
use super::clock::{Clock, SystemClock};
use super::counter::RateLimitDecision;
use super::key::{default_key, KeyFn};
use super::memory::MemoryStore;
use super::rules::RateLimitRule;
use crate::error::Result;

/// Callback invoked with the key and decision of every rejected request.
pub type LimitCallback = Arc<dyn Fn(&str, &RateLimitDecision) + Send + Sync>;

/// Default message returned to rejected clients.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Runtime configuration for one rate limit policy.
///
/// Wraps a declarative `RateLimitRule` with the hooks that cannot be
/// expressed in a config file: a custom key function and a callback for
/// rejected requests.
#[derive(Clone)]
pub struct RateLimitConfig {
    rule: RateLimitRule,
    key_fn: Option<KeyFn>,
    on_limit_reached: Option<LimitCallback>,
}

impl RateLimitConfig {
    /// Create a configuration from a rule, using the default key.
    pub fn new(rule: RateLimitRule) -> Self {
        Self {
            rule,
            key_fn: None,
            on_limit_reached: None,
        }
    }

    /// Shorthand for a plain `max_requests` per `window_ms` policy.
    pub fn per_window(window_ms: u64, max_requests: u64) -> Self {
        Self::new(RateLimitRule::new(window_ms, max_requests))
    }

    /// Replace the default key derivation entirely.
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request<Body>) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Register a callback for rejected requests.
    pub fn on_limit_reached<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &RateLimitDecision) + Send + Sync + 'static,
    {
        self.on_limit_reached = Some(Arc::new(callback));
        self
    }

    /// The underlying rule.
    pub fn rule(&self) -> &RateLimitRule {
        &self.rule
    }

    /// Message returned to rejected clients.
    pub fn message(&self) -> &str {
        self.rule.message.as_deref().unwrap_or(DEFAULT_MESSAGE)
    }

    /// Derive the quota key for a request.
    pub fn key_for(&self, request: &Request<Body>) -> String {
        match &self.key_fn {
            Some(key_fn) => key_fn(request),
            None => default_key(request),
        }
    }

    /// Whether a finished request should be given back to the quota.
    ///
    /// `status` is `None` when the handler returned an error instead of a response.
    pub fn should_release(&self, status: Option<u16>) -> bool {
        match status {
            Some(code) if code < 400 => self.rule.skip_successful_requests,
            _ => self.rule.skip_failed_requests,
        }
    }

    fn notify_limit_reached(&self, key: &str, decision: &RateLimitDecision) {
        let Some(callback) = &self.on_limit_reached else {
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| callback(key, decision))).is_err() {
            warn!(key = %key, "Rate limit callback panicked");
        }
    }
}

impl From<RateLimitRule> for RateLimitConfig {
    fn from(rule: RateLimitRule) -> Self {
        Self::new(rule)
    }
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("rule", &self.rule)
            .field("custom_key", &self.key_fn.is_some())
            .field("on_limit_reached", &self.on_limit_reached.is_some())
            .finish()
    }
}

/// The rate limiter that owns the counter store.
///
/// This struct is thread-safe and can be shared across multiple tasks. It is
/// cheap to clone; clones share the same store and clock.
#[derive(Clone)]
pub struct RateLimiter {
    /// Window counters indexed by key
    store: Arc<dyn CounterStore>,
    /// Time source for checks made through the HTTP layer
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter over `store` using the system clock.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create a rate limiter over `store` reading time from `clock`.
    pub fn with_clock(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a rate limiter with a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// The current time according to this limiter's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The counter store.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Record a hit for `key` at `now` and decide whether it is admitted.
    ///
    /// The window does not slide: later hits keep the reset time of the hit
    /// that opened the window. Across a window boundary up to twice the limit
    /// can be admitted in quick succession.
    pub async fn check(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision> {
        let rule = config.rule();
        let entry = self.store.increment(key, rule.window(), now).await?;
        let decision = RateLimitDecision::from_entry(&entry, rule.max_requests);

        trace!(
            key = %key,
            hits = decision.total_hits,
            remaining = decision.remaining,
            "Checked rate limit"
        );

        if !decision.allowed {
            debug!(
                key = %key,
                hits = decision.total_hits,
                limit = decision.limit,
                "Rate limit exceeded"
            );
            config.notify_limit_reached(key, &decision);
        }

        Ok(decision)
    }

    /// Give one hit back to the window `decision` was made in.
    pub async fn release(&self, key: &str, decision: &RateLimitDecision) -> Result<()> {
        self.store.decrement(key, decision.reset_time).await
    }

    /// Drop every counter whose window has ended.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.store.purge_expired(self.now()).await
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::in_memory()
    }
}
