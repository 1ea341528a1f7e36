//! Response latency tracking (EWMA).

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Placeholder latency before any observation, so a fresh backend does not
/// look infinitely fast next to one with real samples.
pub const DEFAULT_LATENCY_MS: f64 = 50.0;

/// Weight of the newest observation.
pub const EWMA_ALPHA: f64 = 0.2;

#[derive(Debug)]
struct Ewma {
    value: f64,
    observed: bool,
}

/// Exponentially weighted moving average of observed response times.
#[derive(Debug)]
pub struct LatencyTracker {
    inner: RwLock<Ewma>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Ewma {
                value: DEFAULT_LATENCY_MS,
                observed: false,
            }),
        }
    }

    /// Fold one observation into the average. The first observation replaces
    /// the placeholder outright.
    pub fn update(&self, observed: Duration) {
        let sample_ms = observed.as_secs_f64() * 1000.0;
        let mut ewma = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if ewma.observed {
            ewma.value = EWMA_ALPHA * sample_ms + (1.0 - EWMA_ALPHA) * ewma.value;
        } else {
            ewma.value = sample_ms;
            ewma.observed = true;
        }
    }

    /// Current average in milliseconds.
    pub fn ewma(&self) -> f64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).value
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}
