//! Resilience Patterns for the PCO SDK
//!
//! - **Rate Limiting**: a fixed counting window that defers to the limits
//!   the server advertises in its response headers
//! - **Retry**: exponential backoff for callers wrapping arbitrary async
//!   operations, honouring server-provided retry hints
//!
//! # Example
//!
//! ```rust,ignore
//! use pco_sdk_resilience::{RateLimiter, RateLimitConfig, RetryConfig, retry};
//!
//! let limiter = RateLimiter::new("people", RateLimitConfig::planning_center());
//! limiter.acquire().await;
//!
//! let value = retry(RetryConfig::for_api(), || fetch_something()).await?;
//! ```

pub mod rate_limit;
pub mod retry;

pub use rate_limit::{
    parse_retry_after, RateLimitConfig, RateLimitHeaders, RateLimitState, RateLimiter,
};

pub use retry::{retry, RetryConfig, RetryError, RetryExecutor, RetryableError};
