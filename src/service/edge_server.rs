use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use super::shutdown_signal;
use crate::config::Config;
use crate::edge::{
    CertStore, EdgeState, TlsListener, UpstreamPool, edge_http_router, edge_https_router,
};
use crate::error::StackError;
use crate::middleware::PeerAddr;

/// Run the edge proxy: a plain listener always, a TLS listener when a
/// certificate is configured.
pub async fn serve_edge(cfg: &Config) -> Result<(), StackError> {
    cfg.validate_edge()?;

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(cfg.edge.upstream_timeout())
        .redirect(reqwest::redirect::Policy::none())
        .pool_idle_timeout(Duration::from_secs(90))
        .build()?;

    let upstreams = UpstreamPool::new(cfg.edge.upstreams.clone());
    info!(
        upstreams = upstreams.len(),
        timeout_secs = cfg.edge.upstream_timeout_secs,
        tls = cfg.edge.tls.is_some(),
        "starting edge proxy"
    );

    let mut state = EdgeState::new(
        client,
        upstreams,
        Arc::from(cfg.basic.secret_key.as_str()),
        cfg.edge.acme_webroot.clone(),
    );
    if cfg.edge.tls.is_some() {
        state = state.with_tls(cfg.edge.https_addr.port());
    }

    let http_listener = TcpListener::bind(cfg.edge.http_addr).await?;
    info!("HTTP listener on {}", cfg.edge.http_addr);
    let http = axum::serve(
        http_listener,
        edge_http_router(state.clone()).into_make_service_with_connect_info::<PeerAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    let Some(tls) = cfg.edge.tls.as_ref() else {
        http.await?;
        return Ok(());
    };

    let certs = CertStore::load(tls)?;
    let reloader = certs.clone().spawn_reloader(tls.reload_interval());
    let https_listener = TlsListener::bind(cfg.edge.https_addr, certs).await?;
    info!("HTTPS listener on {}", cfg.edge.https_addr);
    let https = axum::serve(
        https_listener,
        edge_https_router(state).into_make_service_with_connect_info::<PeerAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    let served = tokio::try_join!(http.into_future(), https.into_future());
    reloader.abort();
    served?;
    info!("edge proxy stopped");
    Ok(())
}
