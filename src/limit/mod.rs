//! Bandwidth limiting primitives
//!
//! Two leaf primitives used by every scope that needs bandwidth control:
//!
//! - [`TokenBucket`]: lazy-refill byte bucket, the admission decision
//! - [`SpeedMeter`]: smoothed bytes/second estimate for monitoring
//!
//! Both take explicit `Instant` arguments on their `*_at` methods so that
//! tests can drive them with simulated time; the plain methods use the
//! monotonic clock.

mod speed_meter;
mod token_bucket;

pub use speed_meter::SpeedMeter;
pub use token_bucket::TokenBucket;
