use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Uri, header},
    response::Response,
};
use futures::TryStreamExt;
use std::net::IpAddr;
use tracing::{debug, warn};
use url::Url;

use super::EdgeState;
use crate::error::StackError;
use crate::middleware::PeerAddr;
use crate::middleware::forwarded::{
    EDGE_SECRET_HEADER, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO, X_REAL_IP,
};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Fallback handler: forward the request to the next application replica.
pub async fn proxy(
    State(state): State<EdgeState>,
    ConnectInfo(PeerAddr(peer)): ConnectInfo<PeerAddr>,
    req: Request,
) -> Result<Response, StackError> {
    let upstream = state
        .upstreams
        .pick()
        .ok_or_else(|| StackError::Config("no upstreams configured".to_string()))?;
    let target = upstream_url(upstream, req.uri());

    let (parts, body) = req.into_parts();
    let headers = forwarded_headers(&parts.headers, peer.ip(), state.scheme, &state.secret_key);
    debug!(%target, method = %parts.method, "forwarding");

    let upstream_resp = state
        .client
        .request(parts.method, target)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await?;

    Ok(into_response(upstream_resp))
}

/// Join the replica base URL with the inbound path and query.
pub fn upstream_url(base: &Url, uri: &Uri) -> Url {
    let mut url = base.clone();
    let path = format!("{}{}", base.path().trim_end_matches('/'), uri.path());
    url.set_path(&path);
    url.set_query(uri.query());
    url
}

/// Copy end-to-end headers and stamp the forwarding set.
pub fn forwarded_headers(
    inbound: &HeaderMap,
    client: IpAddr,
    scheme: &str,
    secret: &str,
) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);

    let original_host = headers.remove(header::HOST);
    let forwarded_for = match inbound
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        Some(prior) => format!("{prior}, {client}"),
        None => client.to_string(),
    };

    let stamp = [
        (X_FORWARDED_FOR, HeaderValue::from_str(&forwarded_for).ok()),
        (X_REAL_IP, HeaderValue::from_str(&client.to_string()).ok()),
        (X_FORWARDED_PROTO, HeaderValue::from_str(scheme).ok()),
        (EDGE_SECRET_HEADER, HeaderValue::from_str(secret).ok()),
    ];
    for (name, value) in stamp {
        match value {
            Some(v) => headers.insert(name, v),
            None => headers.remove(name),
        };
    }
    match original_host {
        Some(host) => headers.insert(X_FORWARDED_HOST, host),
        None => headers.remove(X_FORWARDED_HOST),
    };
    headers
}

/// Remove hop-by-hop headers, including any the `Connection` header names.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in &named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn into_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let body = upstream
        .bytes_stream()
        .inspect_err(|e| warn!(error = %e, "upstream body aborted mid-stream"));
    let mut resp = Response::new(Body::from_stream(body));
    *resp.status_mut() = status;
    *resp.headers_mut() = headers;
    resp
}
