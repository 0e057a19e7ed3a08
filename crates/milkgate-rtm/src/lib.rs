//! # Milkgate RTM
//!
//! Rate-limited, signature-authenticated access to the Remember The Milk
//! REST API.
//!
//! RTM's native authentication is a three-legged "frob" exchange: the
//! application requests a frob, sends the user to a signed grant URL, and
//! after consent exchanges the frob for a long-lived auth token. Every
//! request is signed with an MD5 digest over the sorted parameter list.
//!
//! This crate provides:
//!
//! - **[`RateLimiter`]**: a token bucket (capacity 3, refill 1/s) with
//!   503-driven exponential backoff, matching RTM's published quota
//! - **[`RtmClient`]**: the signed REST transport plus the frob operations
//! - **[`UpstreamAuthority`]**: the trait seam the OAuth facade depends on,
//!   so tests can substitute a fake upstream

pub mod client;
pub mod error;
pub mod rate_limit;

pub use client::{RtmClient, UpstreamAuthority};
pub use error::RtmError;
pub use rate_limit::{RateLimiter, RateLimiterMetrics};

/// Result type for upstream operations
pub type RtmResult<T> = Result<T, RtmError>;

/// RTM error code meaning "frob not yet authorized by the user"
pub const ERR_NOT_AUTHORIZED: i64 = 101;
