use axum::extract::ConnectInfo;
use axum::extract::connect_info::Connected;
use axum::http::HeaderMap;
use axum::serve::IncomingStream;
use std::net::{IpAddr, SocketAddr};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;

/// Shared secret the edge proxy attaches so the app can trust its
/// forwarding headers.
pub const EDGE_SECRET_HEADER: &str = "x-edge-secret";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_REAL_IP: &str = "x-real-ip";

/// TCP peer of an accepted connection, recorded for both plain and TLS
/// listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

impl Connected<IncomingStream<'_, TcpListener>> for PeerAddr {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        PeerAddr(*stream.remote_addr())
    }
}

pub fn peer_of(extensions: &axum::http::Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<PeerAddr>>()
        .map(|ConnectInfo(PeerAddr(addr))| *addr)
}

/// True when the request carries the edge secret.
pub fn is_trusted_edge(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(EDGE_SECRET_HEADER)
        .map(|v| bool::from(v.as_bytes().ct_eq(secret.as_bytes())))
        .unwrap_or(false)
}

/// Resolve the originating client address.
///
/// The right-most `X-Forwarded-For` entry is the one the edge appended, so
/// it is the only entry that is taken, and only from a trusted edge.
/// Everything else falls back to the TCP peer.
pub fn resolve_client(headers: &HeaderMap, peer: Option<SocketAddr>, secret: &str) -> Option<IpAddr> {
    if is_trusted_edge(headers, secret)
        && let Some(ip) = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        return Some(ip);
    }
    peer.map(|p| p.ip())
}

/// Scheme the client used, as reported by a trusted edge.
pub fn resolve_scheme(headers: &HeaderMap, secret: &str) -> &'static str {
    let forwarded_https = is_trusted_edge(headers, secret)
        && headers
            .get(X_FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("https"));
    if forwarded_https { "https" } else { "http" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "0123456789abcdef";

    fn peer() -> Option<SocketAddr> {
        Some("10.0.1.10:41000".parse().unwrap())
    }

    #[test]
    fn untrusted_forwarding_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("6.6.6.6"));
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        assert_eq!(resolve_client(&headers, peer(), SECRET), Some("10.0.1.10".parse().unwrap()));
        assert_eq!(resolve_scheme(&headers, SECRET), "http");

        headers.insert(EDGE_SECRET_HEADER, HeaderValue::from_static("wrong"));
        assert_eq!(resolve_client(&headers, peer(), SECRET), Some("10.0.1.10".parse().unwrap()));
    }

    #[test]
    fn trusted_edge_takes_last_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(EDGE_SECRET_HEADER, HeaderValue::from_static(SECRET));
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("6.6.6.6, 198.51.100.23"));
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        assert_eq!(
            resolve_client(&headers, peer(), SECRET),
            Some("198.51.100.23".parse().unwrap())
        );
        assert_eq!(resolve_scheme(&headers, SECRET), "https");
    }

    #[test]
    fn garbage_forwarded_for_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(EDGE_SECRET_HEADER, HeaderValue::from_static(SECRET));
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("not-an-ip"));
        assert_eq!(resolve_client(&headers, peer(), SECRET), Some("10.0.1.10".parse().unwrap()));
        assert_eq!(resolve_client(&headers, None, SECRET), None);
    }
}
