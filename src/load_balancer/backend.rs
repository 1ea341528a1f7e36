//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track active connections (for Least Connections / Adaptive)
//! - Carry the alive flag written by the health prober
//! - Own the backend's circuit breaker and latency tracker

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::load_balancer::latency::LatencyTracker;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};

/// Why a configured backend address was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("{0}")]
    Parse(#[from] url::ParseError),

    #[error("unsupported scheme `{0}` (only http is supported)")]
    UnsupportedScheme(String),

    #[error("missing host")]
    MissingHost,
}

/// Parse a backend address. A bare `host:port` is treated as `http://host:port`.
pub fn parse_address(raw: &str) -> Result<Url, AddressError> {
    let raw = raw.trim();
    let url = if raw.contains("://") {
        Url::parse(raw)?
    } else {
        Url::parse(&format!("http://{raw}"))?
    };

    if url.scheme() != "http" {
        return Err(AddressError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(AddressError::MissingHost);
    }
    Ok(url)
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    url: Url,
    /// `host:port`, used as the log and metric label.
    label: String,
    alive: AtomicBool,
    active_connections: AtomicUsize,
    latency: LatencyTracker,
    breaker: CircuitBreaker,
}

impl Backend {
    /// Create a new backend. Backends start alive until the first probe says otherwise.
    pub fn new(url: Url, breaker: CircuitBreaker) -> Self {
        let label = match (url.host_str(), url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => url.to_string(),
        };
        Self {
            url,
            label,
            alive: AtomicBool::new(true),
            active_connections: AtomicUsize::new(0),
            latency: LatencyTracker::new(),
            breaker,
        }
    }

    /// Parse `address` and build a backend with a default circuit breaker.
    pub fn from_address(address: &str) -> Result<Self, AddressError> {
        Ok(Self::new(parse_address(address)?, CircuitBreaker::default()))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    // --- Health ---

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Set the alive flag, returning the previous value.
    pub fn set_alive(&self, alive: bool) -> bool {
        self.alive.swap(alive, Ordering::AcqRel)
    }

    /// Alive and admitted by the circuit breaker. Dead backends never touch the breaker.
    pub fn is_selectable(&self) -> bool {
        self.is_alive() && self.breaker.allow_request()
    }

    // --- Load signals ---

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement active connection count, never below zero.
    pub fn dec_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
    }

    /// Count a connection for as long as the returned guard lives.
    pub fn acquire(self: &Arc<Self>) -> BackendConnectionGuard {
        self.inc_connections();
        BackendConnectionGuard {
            backend: self.clone(),
        }
    }

    pub fn latency_ewma(&self) -> f64 {
        self.latency.ewma()
    }

    pub fn record_latency(&self, observed: Duration) {
        self.latency.update(observed);
    }

    // --- Fault state ---

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct BackendConnectionGuard {
    backend: Arc<Backend>,
}

impl Deref for BackendConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendConnectionGuard {
    fn drop(&mut self) {
        self.backend.dec_connections();
    }
}
