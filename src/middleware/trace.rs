use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::forwarded::{peer_of, resolve_client, resolve_scheme};

/// Request log line for the application tier; the client address honours
/// forwarding headers from a trusted edge.
pub async fn trace_app_requests(
    State(secret): State<Arc<str>>,
    req: Request,
    next: Next,
) -> Response {
    let client = resolve_client(req.headers(), peer_of(req.extensions()), &secret);
    let scheme = resolve_scheme(req.headers(), &secret);
    log_request(client, scheme, req, next).await
}

/// Request log line for the edge tier; the TCP peer is the client and the
/// scheme is the listener's.
pub async fn trace_edge_requests(
    State(scheme): State<&'static str>,
    req: Request,
    next: Next,
) -> Response {
    let client = peer_of(req.extensions()).map(|p| p.ip());
    log_request(client, scheme, req, next).await
}

async fn log_request(client: Option<IpAddr>, scheme: &str, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();

    let resp = next.run(req).await;

    let status = resp.status();
    let latency_ms = started.elapsed().as_millis() as u64;
    let client = client.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string());
    if status.is_server_error() {
        warn!(%method, %path, status = status.as_u16(), latency_ms, %client, scheme, "request failed");
    } else {
        info!(%method, %path, status = status.as_u16(), latency_ms, %client, scheme, "request");
    }
    resp
}
