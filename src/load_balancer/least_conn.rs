//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer, SelectContext};

/// Least connections selector.
/// Selects the backend with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn select(&self, backends: &[Arc<Backend>], _ctx: &SelectContext<'_>) -> Option<Arc<Backend>> {
        // In case of tie, the first one is selected (stability)
        backends
            .iter()
            .filter(|b| b.is_selectable())
            .min_by_key(|b| b.active_connections())
            .cloned()
    }

    fn name(&self) -> &'static str {
        "least_conn"
    }
}
