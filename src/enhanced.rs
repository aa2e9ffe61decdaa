//! Enhanced Features
//!
//! Response caching, global admission control and retry with exponential
//! backoff. Each component publishes its own lifecycle events on the shared
//! [`EventBus`](crate::EventBus).

pub mod cache;
pub mod rate_limit;
pub mod retry;

// Re-exports
pub use cache::{fingerprint, CacheStats, ResponseCache};
pub use rate_limit::{RateLimitInfo, RateLimiter};
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy};
