//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each backend concurrently (bounded timeout)
//!     → 200 ⇒ alive, anything else ⇒ dead
//!     → Backend alive flag read by every strategy
//! ```
//!
//! # Design Decisions
//! - The prober is the only writer of the alive flag
//! - Transport failures seen while proxying feed the circuit breaker, not the alive flag
//! - A probe that times out counts as a failure
//! - All probes of one tick finish before the next tick starts

pub mod active;

pub use active::{HealthMonitor, HealthProbe, HttpProbe};
