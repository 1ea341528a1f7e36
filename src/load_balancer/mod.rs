//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request admitted by the rate limiter
//!     → pool.rs (snapshot of backends)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through backends)
//!         - least_conn.rs (pick backend with fewest connections)
//!         - sticky.rs (hash client identity onto a backend)
//!         - adaptive.rs (latency EWMA × load, jittered)
//!     → backend.rs (connection guard for the chosen backend)
//!     → Return backend or None (service unavailable)
//! ```
//!
//! # Design Decisions
//! - Strategies only read the snapshot; backends carry their own state
//! - Strategy is chosen once at startup
//! - Dead or circuit-open backends are excluded from selection

use std::fmt::Debug;
use std::sync::Arc;

pub mod adaptive;
pub mod backend;
pub mod latency;
pub mod least_conn;
pub mod pool;
pub mod round_robin;
pub mod sticky;

use crate::config::Strategy;

pub use adaptive::{Adaptive, JitterSource, NoJitter, RandomJitter, SeededJitter};
pub use backend::{Backend, BackendConnectionGuard};
pub use least_conn::LeastConnections;
pub use pool::BackendPool;
pub use round_robin::RoundRobin;
pub use sticky::StickyHash;

/// Per-request inputs to a selection.
#[derive(Debug, Clone, Copy)]
pub struct SelectContext<'a> {
    /// Client identity (source IP) used by the sticky strategy.
    pub client: &'a str,
}

impl<'a> SelectContext<'a> {
    pub fn new(client: &'a str) -> Self {
        Self { client }
    }
}

/// A backend selection strategy.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick one backend from `backends`, or `None` if none is eligible.
    fn select(&self, backends: &[Arc<Backend>], ctx: &SelectContext<'_>) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}

/// Create the strategy named in configuration.
pub fn build_strategy(strategy: Strategy) -> Arc<dyn LoadBalancer> {
    match strategy {
        Strategy::RoundRobin => Arc::new(RoundRobin::new()),
        Strategy::LeastConn => Arc::new(LeastConnections::new()),
        Strategy::Sticky => Arc::new(StickyHash::new()),
        Strategy::Adaptive => Arc::new(Adaptive::new(RandomJitter)),
    }
}
