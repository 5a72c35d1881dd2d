//! Rate limiting logic and state management.

mod backend;
mod clock;
mod counter;
mod key;
mod limiter;
mod memory;
pub mod rules;

pub use backend::CounterStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{CounterEntry, RateLimitDecision};
pub use key::{client_ip, default_key, normalize_path, user_agent_digest, KeyFn, UNKNOWN};
pub use limiter::{LimitCallback, RateLimitConfig, RateLimiter, DEFAULT_MESSAGE};
pub use memory::MemoryStore;
pub use rules::{PolicyOverrides, PolicyRegistry, RateLimitRule};
