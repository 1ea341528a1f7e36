//! Adaptive (latency-aware) load balancing strategy.
//!
//! Each eligible backend is scored as `latency_ewma × (active_connections + 1)`
//! plus a small jitter, and the lowest score wins. The jitter breaks exact
//! ties so traffic does not herd onto one momentarily idle backend.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::load_balancer::{backend::Backend, LoadBalancer, SelectContext};

/// Source of the tie-breaking jitter added to each score.
pub trait JitterSource: Send + Sync + Debug {
    fn sample(&self) -> f64;
}

/// Uniform jitter in `[0, 1)` from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// No jitter: scores are compared exactly, ties go to the first backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self) -> f64 {
        0.0
    }
}

/// Reproducible uniform jitter in `[0, 1)`.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self) -> f64 {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen::<f64>()
    }
}

/// Latency-aware selector.
#[derive(Debug)]
pub struct Adaptive {
    jitter: Box<dyn JitterSource>,
}

impl Adaptive {
    pub fn new(jitter: impl JitterSource + 'static) -> Self {
        Self {
            jitter: Box::new(jitter),
        }
    }

    pub fn score(backend: &Backend) -> f64 {
        backend.latency_ewma() * (backend.active_connections() as f64 + 1.0)
    }
}

impl Default for Adaptive {
    fn default() -> Self {
        Self::new(RandomJitter)
    }
}

impl LoadBalancer for Adaptive {
    fn select(&self, backends: &[Arc<Backend>], _ctx: &SelectContext<'_>) -> Option<Arc<Backend>> {
        let mut best: Option<(&Arc<Backend>, f64)> = None;

        for backend in backends.iter().filter(|b| b.is_selectable()) {
            let score = Self::score(backend) + self.jitter.sample();
            if best.map_or(true, |(_, best_score)| score < best_score) {
                best = Some((backend, score));
            }
        }

        best.map(|(backend, _)| backend.clone())
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }
}
