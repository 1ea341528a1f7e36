//! Round-robin load balancing strategy.

use std::sync::{Arc, Mutex, PoisonError};

use crate::load_balancer::{backend::Backend, LoadBalancer, SelectContext};

/// Round-robin selector.
/// One shared cursor, advanced under a lock once per candidate examined.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: Mutex<usize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the cursor at `position`; the first call examines `position + 1`.
    pub fn starting_at(position: usize) -> Self {
        Self {
            cursor: Mutex::new(position),
        }
    }
}

impl LoadBalancer for RoundRobin {
    fn select(&self, backends: &[Arc<Backend>], _ctx: &SelectContext<'_>) -> Option<Arc<Backend>> {
        let len = backends.len();
        if len == 0 {
            return None;
        }

        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        for _ in 0..len {
            *cursor = (*cursor + 1) % len;
            let backend = &backends[*cursor];
            if backend.is_selectable() {
                return Some(backend.clone());
            }
        }
        None
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::{backends, ctx};
    use std::collections::HashSet;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let backends = backends(2);

        let s1 = lb.select(&backends, &ctx()).unwrap();
        assert_eq!(s1.label(), backends[1].label());

        let s2 = lb.select(&backends, &ctx()).unwrap();
        assert_eq!(s2.label(), backends[0].label());

        let s3 = lb.select(&backends, &ctx()).unwrap();
        assert_eq!(s3.label(), backends[1].label());
    }

    #[test]
    fn n_calls_cover_every_backend_once() {
        let backends = backends(4);
        for start in 0..7 {
            let lb = RoundRobin::starting_at(start);
            let seen: HashSet<_> = (0..4)
                .map(|_| lb.select(&backends, &ctx()).unwrap().label().to_string())
                .collect();
            assert_eq!(seen.len(), 4, "start {start}");
        }
    }

    #[test]
    fn skips_dead_backend_until_it_recovers() {
        let lb = RoundRobin::new();
        let backends = backends(3);
        backends[1].set_alive(false);

        for _ in 0..9 {
            let picked = lb.select(&backends, &ctx()).unwrap();
            assert_ne!(picked.label(), backends[1].label());
        }

        backends[1].set_alive(true);
        let picked: HashSet<_> = (0..3)
            .map(|_| lb.select(&backends, &ctx()).unwrap().label().to_string())
            .collect();
        assert!(picked.contains(backends[1].label()));
    }

    #[test]
    fn cursor_resumes_after_skipped_candidates() {
        let lb = RoundRobin::new();
        let backends = backends(3);
        backends[1].set_alive(false);

        // examines 1 (dead), then 2
        assert_eq!(lb.select(&backends, &ctx()).unwrap().label(), backends[2].label());
        // resumes at 0, not at 1 again
        assert_eq!(lb.select(&backends, &ctx()).unwrap().label(), backends[0].label());
    }

    #[test]
    fn all_dead_returns_none() {
        let lb = RoundRobin::new();
        let backends = backends(3);
        for b in &backends {
            b.set_alive(false);
        }
        assert!(lb.select(&backends, &ctx()).is_none());
    }

    #[test]
    fn open_circuit_is_skipped() {
        let lb = RoundRobin::new();
        let backends = backends(2);
        for _ in 0..3 {
            backends[1].breaker().record_failure();
        }
        for _ in 0..4 {
            assert_eq!(lb.select(&backends, &ctx()).unwrap().label(), backends[0].label());
        }
        assert!(backends[1].is_alive());
    }
}
