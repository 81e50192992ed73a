//! Long-running roles and one-shot operator tasks.

pub mod admin;
pub mod app_server;
pub mod edge_server;

use crate::config::Config;
use crate::db::StoreOptions;

pub use admin::{inspect, migrate};
pub use app_server::serve_app;
pub use edge_server::serve_edge;

pub fn store_options(cfg: &Config, connect_retries: usize) -> StoreOptions {
    StoreOptions {
        max_connections: cfg.app.max_db_connections,
        acquire_timeout: cfg.app.db_acquire_timeout(),
        connect_retries,
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
