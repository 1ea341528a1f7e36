//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the dispatch engine (pool, strategy, limiter, forwarder) from config
//! - Create the Axum router and wire up middleware (tracing, timeout, request ID)
//! - Start the background tasks (health monitor, limiter sweeper)
//! - Serve plain HTTP, or HTTPS with the plain listener redirecting to it
//! - Drain in-flight requests on shutdown

use std::future::IntoFuture;
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, uri::Authority, HeaderMap, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{LbConfig, TlsConfig};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::health::HealthMonitor;
use crate::http::forward::HyperForwarder;
use crate::http::request::{self, MakeRequestUuidV4, X_REQUEST_ID};
use crate::load_balancer::backend::AddressError;
use crate::load_balancer::build_strategy;
use crate::load_balancer::pool::BackendPool;
use crate::observability::{MetricsSink, PrometheusSink};
use crate::security::RateLimiter;

/// How long the HTTPS listener waits for in-flight requests after shutdown.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid backend: {0}")]
    Backend(#[from] AddressError),

    #[error("invalid listener address `{value}`: {source}")]
    Address {
        value: String,
        #[source]
        source: AddrParseError,
    },

    #[error("failed to load TLS certificate or key: {0}")]
    Tls(#[source] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher<HyperForwarder>>,
}

/// HTTP front end of the load balancer.
pub struct HttpServer {
    config: LbConfig,
    pool: Arc<BackendPool>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<dyn MetricsSink>,
    dispatcher: Arc<Dispatcher<HyperForwarder>>,
}

impl HttpServer {
    /// Create a server that reports to the global Prometheus recorder.
    pub fn new(config: LbConfig) -> Result<Self, ServerError> {
        Self::with_metrics(config, Arc::new(PrometheusSink))
    }

    pub fn with_metrics(config: LbConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self, ServerError> {
        let pool = Arc::new(BackendPool::from_config(&config)?);
        let strategy = build_strategy(config.strategy);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            pool.clone(),
            strategy,
            limiter.clone(),
            HyperForwarder::new(),
            metrics.clone(),
        ));

        tracing::info!(
            strategy = %config.strategy,
            backends = pool.len(),
            rate_limit = config.rate_limit.enabled,
            "Dispatcher initialised"
        );

        Ok(Self {
            config,
            pool,
            limiter,
            metrics,
            dispatcher,
        })
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: self.dispatcher.clone(),
        };
        Router::new()
            .route("/", any(dispatch_handler))
            .route("/{*path}", any(dispatch_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuidV4))
    }

    /// Run until `shutdown` fires, accepting plain HTTP on `listener`.
    ///
    /// With TLS configured the dispatch router moves to the HTTPS listener and
    /// `listener` only answers with redirects.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let monitor = HealthMonitor::new(
            self.pool.clone(),
            self.config.health_check.clone(),
            self.metrics.clone(),
        );
        let health_task = tokio::spawn(monitor.run(shutdown.resubscribe()));
        let sweeper_task = tokio::spawn(self.limiter.clone().run_sweeper(shutdown.resubscribe()));

        let result = match self.config.listener.tls.clone() {
            Some(tls) => self.serve_tls(listener, &tls, shutdown).await,
            None => self.serve_plain(listener, shutdown).await,
        };

        health_task.abort();
        sweeper_task.abort();
        tracing::info!("HTTP server stopped");
        result
    }

    async fn serve_plain(&self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(recv_shutdown(shutdown))
            .await?;
        Ok(())
    }

    async fn serve_tls(
        &self,
        listener: TcpListener,
        tls: &TlsConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let tls_addr: SocketAddr = tls.bind_address.parse().map_err(|source| ServerError::Address {
            value: tls.bind_address.clone(),
            source,
        })?;
        let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(ServerError::Tls)?;

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        let mut tls_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            let _ = tls_shutdown.recv().await;
            drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        });

        let redirect_addr = listener.local_addr()?;
        tracing::info!(address = %redirect_addr, "HTTP redirect listener starting");
        tracing::info!(address = %tls_addr, "HTTPS server starting");

        let redirect = axum::serve(listener, redirect_router(tls_addr.port()).into_make_service())
            .with_graceful_shutdown(recv_shutdown(shutdown))
            .into_future();
        let secure = axum_server::bind_rustls(tls_addr, rustls)
            .handle(handle)
            .serve(self.router().into_make_service_with_connect_info::<SocketAddr>());

        let (redirect, secure) = tokio::join!(redirect, secure);
        redirect?;
        secure?;
        Ok(())
    }
}

async fn recv_shutdown(mut shutdown: broadcast::Receiver<()>) {
    let _ = shutdown.recv().await;
    tracing::info!("Shutdown signal received, draining connections");
}

/// Proxy every request through the dispatcher, keyed on the peer IP.
async fn dispatch_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
) -> DispatchOutcome {
    let client = request::client_identity(&peer);
    tracing::debug!(
        request_id = request::request_id(request.headers()).unwrap_or("-"),
        client = %client,
        method = %request.method(),
        path = %request.uri().path(),
        "Proxying request"
    );

    request::append_forwarded_for(request.headers_mut(), peer.ip());
    state.dispatcher.dispatch(&client, request).await
}

/// Router for the plain listener when HTTPS is enabled.
pub fn redirect_router(tls_port: u16) -> Router {
    Router::new().fallback(move |headers: HeaderMap, uri: Uri| async move {
        redirect_to_https(&headers, &uri, tls_port)
    })
}

fn redirect_to_https(headers: &HeaderMap, uri: &Uri, tls_port: u16) -> Response {
    match https_location(headers, uri, tls_port) {
        Some(location) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response(),
        None => (StatusCode::BAD_REQUEST, "missing or invalid Host header").into_response(),
    }
}

/// Same host and request target on the HTTPS port.
pub fn https_location(headers: &HeaderMap, uri: &Uri, tls_port: u16) -> Option<String> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let authority: Authority = host.parse().ok()?;
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    Some(format!("https://{}:{}{}", authority.host(), tls_port, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopSink;
    use axum::http::HeaderValue;
    use tower::ServiceExt;

    fn headers(host: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_str(host).unwrap());
        headers
    }

    #[test]
    fn location_swaps_port_and_keeps_target() {
        let uri: Uri = "/items?page=2".parse().unwrap();
        assert_eq!(
            https_location(&headers("example.com:8080"), &uri, 8443).as_deref(),
            Some("https://example.com:8443/items?page=2")
        );
        assert_eq!(
            https_location(&headers("example.com"), &"/".parse().unwrap(), 443).as_deref(),
            Some("https://example.com:443/")
        );
    }

    #[test]
    fn location_handles_ipv6_hosts() {
        let uri: Uri = "/x".parse().unwrap();
        assert_eq!(
            https_location(&headers("[::1]:8080"), &uri, 8443).as_deref(),
            Some("https://[::1]:8443/x")
        );
    }

    #[test]
    fn missing_host_is_bad_request() {
        let response = redirect_to_https(&HeaderMap::new(), &"/".parse().unwrap(), 8443);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = redirect_to_https(&headers("example.com"), &"/a".parse().unwrap(), 8443);
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "https://example.com:8443/a");
    }

    #[tokio::test]
    async fn redirect_router_answers_every_path() {
        let request = Request::builder()
            .uri("/deep/path?q=1")
            .header(header::HOST, "lb.local:8080")
            .body(Body::empty())
            .unwrap();
        let response = redirect_router(8443).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "https://lb.local:8443/deep/path?q=1");
    }

    #[test]
    fn rejects_invalid_backends() {
        let config = LbConfig {
            backends: vec!["ftp://10.0.0.1".into()],
            ..LbConfig::default()
        };
        let err = HttpServer::with_metrics(config, Arc::new(NoopSink)).err().unwrap();
        assert!(matches!(err, ServerError::Backend(_)));
    }

    #[tokio::test]
    async fn builds_pool_from_config() {
        let config = LbConfig {
            backends: vec!["127.0.0.1:8081".into(), "http://127.0.0.1:8082".into()],
            ..LbConfig::default()
        };
        let server = HttpServer::with_metrics(config, Arc::new(NoopSink)).unwrap();
        assert_eq!(server.pool().len(), 2);
        let _router = server.router();
    }
}
