//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend, all probes of a tick in parallel
//! - Mark each backend alive or dead from its probe result
//! - Publish the alive-backend gauge after each tick

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use url::Url;

use crate::config::HealthCheckConfig;
use crate::load_balancer::backend::Backend;
use crate::load_balancer::pool::BackendPool;
use crate::observability::MetricsSink;

/// Out-of-band reachability check for one backend.
pub trait HealthProbe: Send + Sync {
    /// Whether `target` answered `path` with 200.
    fn probe(&self, target: &Url, path: &str) -> impl Future<Output = bool> + Send;
}

/// Build the probe URL by appending `path` to the backend address.
pub fn probe_url(target: &Url, path: &str) -> String {
    format!("{}{}", target.as_str().trim_end_matches('/'), path)
}

/// HTTP GET probe. Only `200 OK` counts as alive.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client<HttpConnector, Body>,
}

impl HttpProbe {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProbe for HttpProbe {
    async fn probe(&self, target: &Url, path: &str) -> bool {
        let uri = probe_url(target, path);
        let request = match Request::builder()
            .method("GET")
            .uri(&uri)
            .header("user-agent", "dispatch-lb-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(uri = %uri, error = %e, "Failed to build health check request");
                return false;
            }
        };

        match self.client.request(request).await {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                tracing::warn!(uri = %uri, status = %response.status(), "Health check failed: non-200 status");
                false
            }
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "Health check failed: connection error");
                false
            }
        }
    }
}

pub struct HealthMonitor<P = HttpProbe> {
    pool: Arc<BackendPool>,
    config: HealthCheckConfig,
    probe: P,
    metrics: Arc<dyn MetricsSink>,
}

impl HealthMonitor<HttpProbe> {
    pub fn new(pool: Arc<BackendPool>, config: HealthCheckConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_probe(pool, config, HttpProbe::new(), metrics)
    }
}

impl<P: HealthProbe> HealthMonitor<P> {
    pub fn with_probe(
        pool: Arc<BackendPool>,
        config: HealthCheckConfig,
        probe: P,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            pool,
            config,
            probe,
            metrics,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every backend once, concurrently, and wait for all of them.
    pub async fn check_all(&self) {
        let backends = self.pool.snapshot();
        join_all(backends.iter().map(|backend| self.check_one(backend))).await;
        self.metrics.alive_backends(self.pool.alive_count());
    }

    async fn check_one(&self, backend: &Backend) {
        let timeout = self.config.timeout();
        let healthy = match time::timeout(timeout, self.probe.probe(backend.url(), &self.config.path)).await {
            Ok(healthy) => healthy,
            Err(_) => {
                tracing::warn!(backend = %backend.label(), timeout = ?timeout, "Health check failed: timeout");
                false
            }
        };

        let was_alive = backend.set_alive(healthy);
        match (was_alive, healthy) {
            (true, false) => tracing::warn!(backend = %backend.label(), "Backend marked dead"),
            (false, true) => tracing::info!(backend = %backend.label(), "Backend marked alive"),
            _ => tracing::trace!(backend = %backend.label(), alive = healthy, "Health check"),
        }
    }
}
