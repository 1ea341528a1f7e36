//! Dispatch pipeline.
//!
//! # Data Flow
//! ```text
//! client identity + request
//!     → rate limiter admission (429 on rejection, no backend touched)
//!     → strategy selection over a pool snapshot (503 when nothing is eligible)
//!     → connection guard acquired on the chosen backend
//!     → Forwarder::forward (the proxy capability)
//!     → response body streamed to the client
//!     → guard released, breaker fed, latency recorded, metrics emitted
//! ```
//!
//! The completion steps run from a drop guard carried by the response body,
//! so the connection counts until the last byte. An aborted request or a body
//! dropped early still releases its connection and reports to the breaker.

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use url::Url;

use crate::load_balancer::backend::Backend;

pub mod pipeline;

pub use pipeline::Dispatcher;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure to get a response out of a backend.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),

    #[error("upstream transport error: {0}")]
    Transport(#[source] BoxError),
}

/// The proxy capability: send `request` to `target` and hand back its response.
pub trait Forwarder: Send + Sync + 'static {
    fn forward(
        &self,
        request: Request<Body>,
        target: &Url,
    ) -> impl Future<Output = Result<Response<Body>, ForwardError>> + Send;
}

/// Result of dispatching one request.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Rejected by the rate limiter.
    RateLimited,
    /// No backend was both alive and admitted by its circuit breaker.
    NoBackend,
    /// The backend answered (with any status). The body is still streaming.
    Forwarded {
        backend: Arc<Backend>,
        response: Response<Body>,
    },
    /// The backend could not be reached.
    UpstreamFailed {
        backend: Arc<Backend>,
        error: ForwardError,
    },
}

impl DispatchOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchOutcome::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            DispatchOutcome::NoBackend => StatusCode::SERVICE_UNAVAILABLE,
            DispatchOutcome::Forwarded { response, .. } => response.status(),
            DispatchOutcome::UpstreamFailed { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Backend the request was sent to, if it got that far.
    pub fn backend(&self) -> Option<&Arc<Backend>> {
        match self {
            DispatchOutcome::Forwarded { backend, .. } | DispatchOutcome::UpstreamFailed { backend, .. } => {
                Some(backend)
            }
            _ => None,
        }
    }
}

impl IntoResponse for DispatchOutcome {
    fn into_response(self) -> axum::response::Response {
        match self {
            DispatchOutcome::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response()
            }
            DispatchOutcome::NoBackend => {
                (StatusCode::SERVICE_UNAVAILABLE, "no healthy backends").into_response()
            }
            DispatchOutcome::Forwarded { response, .. } => response.into_response(),
            DispatchOutcome::UpstreamFailed { .. } => {
                (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
            }
        }
    }
}
