//! Upstream forwarding over the hyper client.
//!
//! # Responsibilities
//! - Point the request at the selected backend (scheme, authority, base path)
//! - Rewrite `Host` and strip hop-by-hop headers
//! - Stream the request body up and the response body back

use axum::body::Body;
use axum::http::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    uri::PathAndQuery,
    Request, Response, Uri, Version,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::dispatch::{ForwardError, Forwarder};

/// Connection-scoped headers that must not be passed through a proxy.
static HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Debug, Clone)]
pub struct HyperForwarder {
    client: Client<HttpConnector, Body>,
}

impl HyperForwarder {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HyperForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl Forwarder for HyperForwarder {
    async fn forward(&self, request: Request<Body>, target: &Url) -> Result<Response<Body>, ForwardError> {
        let request = upstream_request(request, target)?;
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ForwardError::Transport(Box::new(e)))?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Join the backend's base URL with the incoming path and query.
pub fn upstream_uri(target: &Url, incoming: &Uri) -> Result<Uri, ForwardError> {
    let base = target.as_str().trim_end_matches('/');
    let path_and_query = incoming.path_and_query().map_or("/", PathAndQuery::as_str);
    format!("{base}{path_and_query}")
        .parse()
        .map_err(|e: axum::http::uri::InvalidUri| ForwardError::InvalidTarget(e.to_string()))
}

/// `host[:port]` as it should appear in the upstream `Host` header.
fn host_header(target: &Url) -> Result<HeaderValue, ForwardError> {
    let host = target
        .host_str()
        .ok_or_else(|| ForwardError::InvalidTarget(format!("{target} has no host")))?;
    let value = match target.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    HeaderValue::from_str(&value).map_err(|e| ForwardError::InvalidTarget(e.to_string()))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop too.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn upstream_request(mut request: Request<Body>, target: &Url) -> Result<Request<Body>, ForwardError> {
    let uri = upstream_uri(target, request.uri())?;
    *request.uri_mut() = uri;
    *request.version_mut() = Version::HTTP_11;

    let host = host_header(target)?;
    let headers = request.headers_mut();
    strip_hop_by_hop(headers);
    headers.insert(header::HOST, host);

    Ok(request)
}
