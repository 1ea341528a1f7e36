//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Shutdown (shutdown.rs):
//!     Trigger → listeners stop accepting → in-flight requests drain
//!             → health monitor and limiter sweeper exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
