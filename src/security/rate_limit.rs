//! Per-client token bucket rate limiting.
//!
//! Each client identity gets its own bucket, created full on first sight.
//! The identity map has its own lock; each bucket has another. Creating a
//! bucket is the only moment distinct clients contend with each other.
//!
//! Idle buckets are evicted after `idle_ttl_secs`, and the map never grows
//! past `max_clients`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::RateLimitConfig;

/// A whole-token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    tokens: u64,
    refill_rate: u64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    pub fn new_at(capacity: u64, refill_rate: u64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: now,
            last_seen: now,
        }
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Refill for the time elapsed since the last refill, then try to take a token.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        self.last_seen = now;
        self.refill(now);

        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        if self.refill_rate == 0 {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = (elapsed.as_secs_f64() * self.refill_rate as f64) as u64;
        if earned == 0 {
            return;
        }

        if self.tokens.saturating_add(earned) >= self.capacity {
            self.tokens = self.capacity;
            self.last_refill = now;
        } else {
            self.tokens += earned;
            // Only the time that paid for whole tokens is consumed; the remainder
            // carries over to the next refill.
            self.last_refill += Duration::from_secs_f64(earned as f64 / self.refill_rate as f64);
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

type SharedBucket = Arc<Mutex<TokenBucket>>;

/// Per-client rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, SharedBucket>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Admit or reject one request from `client`.
    pub fn allow(&self, client: &str) -> bool {
        self.allow_at(client, Instant::now())
    }

    pub fn allow_at(&self, client: &str, now: Instant) -> bool {
        if !self.config.enabled {
            return true;
        }

        let Some(bucket) = self.bucket(client, now) else {
            tracing::warn!(
                client = %client,
                max_clients = self.config.max_clients,
                "Rate limiter client table full; admitting untracked client"
            );
            return true;
        };

        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.allow_at(now)
    }

    fn bucket(&self, client: &str, now: Instant) -> Option<SharedBucket> {
        if let Some(bucket) = self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client)
        {
            return Some(bucket.clone());
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        // another request may have created it between the two locks
        if let Some(bucket) = buckets.get(client) {
            return Some(bucket.clone());
        }

        if buckets.len() >= self.config.max_clients {
            let evicted = retain_active(&mut buckets, now, self.config.idle_ttl());
            tracing::debug!(evicted, "Rate limiter table at capacity, swept idle clients");
            if buckets.len() >= self.config.max_clients {
                return None;
            }
        }

        let bucket = Arc::new(Mutex::new(TokenBucket::new_at(
            self.config.capacity,
            self.config.refill_per_sec,
            now,
        )));
        buckets.insert(client.to_string(), bucket.clone());
        Some(bucket)
    }

    /// Drop buckets idle for longer than the configured TTL. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        retain_active(&mut buckets, now, self.config.idle_ttl())
    }

    /// Number of tracked client identities.
    pub fn client_count(&self) -> usize {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Periodically evict idle buckets until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            return;
        }

        let mut ticker = time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_idle();
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.client_count(), "Evicted idle rate limit buckets");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Rate limit sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

fn retain_active(buckets: &mut HashMap<String, SharedBucket>, now: Instant, ttl: Duration) -> usize {
    let before = buckets.len();
    buckets.retain(|_, bucket| {
        bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .idle_for(now)
            < ttl
    });
    before - buckets.len()
}
