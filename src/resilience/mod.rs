//! 弹性模式模块：提供限流器和指数退避等可靠性保障机制。
//!
//! # Resilience Primitives Module
//!
//! Rate limiting and retry spacing for traffic sent to the relay.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Token bucket with a rolling-window ceiling and relay header feedback |
//! | [`backoff`] | Pure exponential backoff schedule |
//!
//! ## Rate Limiter
//!
//! ```rust
//! use codap_relay_worker::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//!
//! # async fn demo() -> codap_relay_worker::Result<()> {
//! let config = RateLimiterConfig::new()
//!     .with_requests_per_second(10.0)
//!     .with_burst_size(5);
//! let limiter = RateLimiter::new(config)?;
//!
//! limiter.wait_for_request().await;
//! // send...
//! # Ok(())
//! # }
//! ```
//!
//! ## Backoff
//!
//! ```rust
//! use codap_relay_worker::resilience::backoff::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(8));
//! assert_eq!(policy.delay(2), Duration::from_secs(2));
//! ```

pub mod backoff;
pub mod rate_limiter;

pub use backoff::{exponential_backoff, BackoffPolicy};
pub use rate_limiter::{RateLimitStatus, RateLimiter, RateLimiterConfig};
