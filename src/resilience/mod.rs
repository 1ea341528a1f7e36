//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch outcome for a backend:
//!     → transport error or 5xx: circuit_breaker.rs records a failure
//!     → anything else: circuit_breaker.rs records a success
//! Strategy scan:
//!     → circuit_breaker.rs allow_request() gates selection
//! ```
//!
//! # Design Decisions
//! - No transparent retry onto another backend; the caller sees what the backend returned
//! - Circuit memory is bounded: failure threshold plus cooldown window

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
