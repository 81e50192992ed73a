//! Edge proxy: public entry point in front of the application replicas.

pub mod acme;
pub mod balancer;
pub mod proxy;
pub mod tls;

use axum::{Router, middleware, routing::get};
use std::path::PathBuf;
use std::sync::Arc;

use crate::middleware::trace::trace_edge_requests;
use acme::{acme_challenge, redirect_to_https};
pub use balancer::UpstreamPool;
use proxy::proxy;
pub use tls::{CertStore, TlsListener};

#[derive(Clone)]
pub struct EdgeState {
    pub client: reqwest::Client,
    pub upstreams: Arc<UpstreamPool>,
    pub secret_key: Arc<str>,
    pub acme_webroot: Option<Arc<PathBuf>>,
    pub tls_enabled: bool,
    pub https_port: u16,
    /// Scheme of the listener this state is attached to.
    pub scheme: &'static str,
}

impl EdgeState {
    pub fn new(
        client: reqwest::Client,
        upstreams: UpstreamPool,
        secret_key: Arc<str>,
        acme_webroot: Option<PathBuf>,
    ) -> Self {
        Self {
            client,
            upstreams: Arc::new(upstreams),
            secret_key,
            acme_webroot: acme_webroot.map(Arc::new),
            tls_enabled: false,
            https_port: 443,
            scheme: "http",
        }
    }

    /// Enable the HTTPS listener on `https_port`; the plain listener then
    /// only answers ACME challenges and redirects.
    pub fn with_tls(mut self, https_port: u16) -> Self {
        self.tls_enabled = true;
        self.https_port = https_port;
        self
    }

    fn for_scheme(mut self, scheme: &'static str) -> Self {
        self.scheme = scheme;
        self
    }
}

/// Router for the plain-HTTP listener.
pub fn edge_http_router(state: EdgeState) -> Router {
    let router = Router::new().route("/.well-known/acme-challenge/{token}", get(acme_challenge));
    let router = if state.tls_enabled {
        router.fallback(redirect_to_https)
    } else {
        router.fallback(proxy)
    };
    router
        .layer(middleware::from_fn_with_state("http", trace_edge_requests))
        .with_state(state.for_scheme("http"))
}

/// Router for the TLS listener.
pub fn edge_https_router(state: EdgeState) -> Router {
    Router::new()
        .fallback(proxy)
        .layer(middleware::from_fn_with_state("https", trace_edge_requests))
        .with_state(state.for_scheme("https"))
}
