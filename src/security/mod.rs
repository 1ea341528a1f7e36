//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client token bucket)
//!     → rejected with 429 before any backend is touched
//!     → otherwise handed to backend selection
//! ```
//!
//! # Design Decisions
//! - Admission happens before selection
//! - Client identity is the peer IP
//! - Bounded client table, idle buckets evicted

pub mod rate_limit;

pub use rate_limit::{RateLimiter, TokenBucket};
