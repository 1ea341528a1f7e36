//! Backend pool management.
//!
//! # Responsibilities
//! - Own the ordered list of backends (insertion order is the round-robin order)
//! - Hand out copy-out snapshots for strategies and the health prober
//! - Never remove a backend; a dead backend stays with `alive = false`

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use crate::config::LbConfig;
use crate::load_balancer::backend::{parse_address, AddressError, Backend};
use crate::resilience::circuit_breaker::CircuitBreaker;

/// Append-only registry of backends.
#[derive(Debug, Default)]
pub struct BackendPool {
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the pool from the configured address list.
    pub fn from_config(config: &LbConfig) -> Result<Self, AddressError> {
        let pool = Self::new();
        for address in &config.backends {
            let url = parse_address(address)?;
            let breaker = CircuitBreaker::from_config(&config.circuit_breaker);
            pool.add(Backend::new(url, breaker));
        }
        Ok(pool)
    }

    /// Append a backend. Duplicated addresses are kept as distinct backends.
    pub fn add(&self, backend: Backend) -> Arc<Backend> {
        let backend = Arc::new(backend);
        tracing::info!(backend = %backend.label(), "Added backend");
        self.backends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(backend.clone());
        backend
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Backend>>> {
        self.backends.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of every backend, in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<Backend>> {
        self.read().clone()
    }

    /// Copy of the backends currently marked alive, in insertion order.
    pub fn alive_subset(&self) -> Vec<Arc<Backend>> {
        self.read().iter().filter(|b| b.is_alive()).cloned().collect()
    }

    pub fn alive_count(&self) -> usize {
        self.read().iter().filter(|b| b.is_alive()).count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order_and_duplicates() {
        let pool = BackendPool::new();
        pool.add(Backend::from_address("127.0.0.1:1").unwrap());
        pool.add(Backend::from_address("127.0.0.1:2").unwrap());
        pool.add(Backend::from_address("127.0.0.1:1").unwrap());

        let labels: Vec<_> = pool.snapshot().iter().map(|b| b.label().to_string()).collect();
        assert_eq!(labels, ["127.0.0.1:1", "127.0.0.1:2", "127.0.0.1:1"]);
    }

    #[test]
    fn snapshot_is_decoupled_from_later_adds() {
        let pool = BackendPool::new();
        pool.add(Backend::from_address("127.0.0.1:1").unwrap());
        let snapshot = pool.snapshot();
        pool.add(Backend::from_address("127.0.0.1:2").unwrap());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn alive_subset_filters_dead() {
        let pool = BackendPool::new();
        let a = pool.add(Backend::from_address("127.0.0.1:1").unwrap());
        pool.add(Backend::from_address("127.0.0.1:2").unwrap());
        a.set_alive(false);

        let alive = pool.alive_subset();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].label(), "127.0.0.1:2");
        assert_eq!(pool.alive_count(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn from_config_applies_breaker_settings() {
        let mut config = LbConfig {
            backends: vec!["127.0.0.1:1".into(), "127.0.0.1:2".into()],
            ..LbConfig::default()
        };
        config.circuit_breaker.failure_threshold = 1;

        let pool = BackendPool::from_config(&config).unwrap();
        let backends = pool.snapshot();
        assert_eq!(backends.len(), 2);
        assert!(backends[0].breaker().record_failure());
    }

    #[test]
    fn from_config_rejects_bad_address() {
        let config = LbConfig {
            backends: vec!["https://127.0.0.1:1".into()],
            ..LbConfig::default()
        };
        assert!(BackendPool::from_config(&config).is_err());
    }
}
