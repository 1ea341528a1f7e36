use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Instant;

use axum::body::{Body, BodyDataStream, Bytes, HttpBody};
use axum::http::{Request, Response, StatusCode};
use futures_util::{Stream, StreamExt};

use super::{DispatchOutcome, Forwarder};
use crate::load_balancer::backend::{Backend, BackendConnectionGuard};
use crate::load_balancer::pool::BackendPool;
use crate::load_balancer::{LoadBalancer, SelectContext};
use crate::observability::MetricsSink;
use crate::security::RateLimiter;

/// Status recorded for a request dropped before its response finished streaming.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Ties the pool, strategy, limiter and forwarder together for one request at a time.
pub struct Dispatcher<F> {
    pool: Arc<BackendPool>,
    strategy: Arc<dyn LoadBalancer>,
    limiter: Arc<RateLimiter>,
    forwarder: F,
    metrics: Arc<dyn MetricsSink>,
}

impl<F: Forwarder> Dispatcher<F> {
    pub fn new(
        pool: Arc<BackendPool>,
        strategy: Arc<dyn LoadBalancer>,
        limiter: Arc<RateLimiter>,
        forwarder: F,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            pool,
            strategy,
            limiter,
            forwarder,
            metrics,
        }
    }

    /// Run one request through admission, selection and forwarding.
    ///
    /// `client` is the caller's identity (its IP address in the server). It keys
    /// both the rate limiter bucket and sticky placement.
    pub async fn dispatch(&self, client: &str, request: Request<Body>) -> DispatchOutcome {
        let start = Instant::now();
        let method = request.method().to_string();

        if !self.limiter.allow(client) {
            tracing::warn!(client = %client, "Rate limit exceeded");
            self.metrics.rate_limited();
            self.metrics
                .record_request(&method, StatusCode::TOO_MANY_REQUESTS.as_u16(), start.elapsed());
            return DispatchOutcome::RateLimited;
        }

        let backends = self.pool.snapshot();
        let Some(backend) = self.strategy.select(&backends, &SelectContext::new(client)) else {
            tracing::warn!(
                client = %client,
                strategy = self.strategy.name(),
                backends = backends.len(),
                "No eligible backend"
            );
            self.metrics
                .record_request(&method, StatusCode::SERVICE_UNAVAILABLE.as_u16(), start.elapsed());
            self.metrics.alive_backends(self.pool.alive_count());
            return DispatchOutcome::NoBackend;
        };

        tracing::debug!(
            client = %client,
            backend = %backend.label(),
            strategy = self.strategy.name(),
            uri = %request.uri(),
            "Dispatching request"
        );

        let in_flight = InFlight {
            connection: Some(backend.acquire()),
            backend: backend.clone(),
            pool: self.pool.clone(),
            metrics: self.metrics.clone(),
            method,
            start,
            outcome: None,
        };

        match self.forwarder.forward(request, backend.url()).await {
            Ok(response) => {
                let response = in_flight.attach(response);
                DispatchOutcome::Forwarded { backend, response }
            }
            Err(error) => {
                tracing::error!(backend = %backend.label(), error = %error, "Upstream request failed");
                in_flight.finish(Completion::Unreachable);
                DispatchOutcome::UpstreamFailed { backend, error }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Completion {
    Responded(StatusCode),
    /// The head arrived but the body failed mid-stream.
    Interrupted(StatusCode),
    Unreachable,
}

/// Outstanding request on one backend.
///
/// Dropping it releases the connection slot, then feeds the breaker, the
/// latency tracker and the metrics sink. A drop without [`InFlight::finish`]
/// means the dispatch future or the response body was dropped early and
/// counts as a failure.
struct InFlight {
    connection: Option<BackendConnectionGuard>,
    backend: Arc<Backend>,
    pool: Arc<BackendPool>,
    metrics: Arc<dyn MetricsSink>,
    method: String,
    start: Instant,
    outcome: Option<Completion>,
}

impl InFlight {
    fn finish(mut self, completion: Completion) {
        self.outcome = Some(completion);
    }

    /// Hand the guard to the response body so it lives until the last byte.
    fn attach(self, response: Response<Body>) -> Response<Body> {
        let status = response.status();
        if response.body().is_end_stream() {
            self.finish(Completion::Responded(status));
            return response;
        }

        let (parts, body) = response.into_parts();
        let body = Body::from_stream(TrackedBody {
            inner: body.into_data_stream(),
            status,
            in_flight: Some(self),
        });
        Response::from_parts(parts, body)
    }
}

/// Backend response body that completes its [`InFlight`] when the stream ends.
struct TrackedBody {
    inner: BodyDataStream,
    status: StatusCode,
    in_flight: Option<InFlight>,
}

impl TrackedBody {
    fn complete(&mut self, completion: Completion) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.finish(completion);
        }
    }
}

impl Stream for TrackedBody {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match ready!(self.inner.poll_next_unpin(cx)) {
            Some(Ok(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Some(Err(error)) => {
                if let Some(in_flight) = &self.in_flight {
                    tracing::warn!(
                        backend = %in_flight.backend.label(),
                        error = %error,
                        "Upstream response body failed"
                    );
                }
                let status = self.status;
                self.complete(Completion::Interrupted(status));
                Poll::Ready(Some(Err(error)))
            }
            None => {
                let status = self.status;
                self.complete(Completion::Responded(status));
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        drop(self.connection.take());
        let elapsed = self.start.elapsed();
        let backend = &self.backend;

        let (status, failed) = match self.outcome {
            Some(Completion::Responded(status)) => (status.as_u16(), status.is_server_error()),
            Some(Completion::Interrupted(status)) => (status.as_u16(), true),
            Some(Completion::Unreachable) => (StatusCode::BAD_GATEWAY.as_u16(), true),
            None => {
                tracing::debug!(backend = %backend.label(), "Dispatch abandoned before completion");
                (CLIENT_CLOSED_REQUEST, true)
            }
        };

        if failed {
            if backend.breaker().record_failure() {
                tracing::warn!(
                    backend = %backend.label(),
                    failures = backend.breaker().consecutive_failures(),
                    "Circuit breaker opened"
                );
            }
        } else if backend.breaker().record_success() {
            tracing::info!(backend = %backend.label(), "Circuit breaker closed");
        }

        backend.record_latency(elapsed);

        self.metrics.record_request(&self.method, status, elapsed);
        self.metrics.backend_latency(backend.label(), backend.latency_ewma());
        self.metrics.circuit_state(backend.label(), backend.circuit_state());
        self.metrics.alive_backends(self.pool.alive_count());
    }
}
