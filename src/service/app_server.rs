use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use super::{shutdown_signal, store_options};
use crate::config::{Config, redact_database_url};
use crate::db::NoteStore;
use crate::error::StackError;
use crate::middleware::PeerAddr;
use crate::router::{AppState, notes_router};

/// Run the application service until a shutdown signal arrives.
pub async fn serve_app(cfg: &Config) -> Result<(), StackError> {
    cfg.validate()?;

    info!(
        database_url = %redact_database_url(&cfg.basic.database_url),
        listen_addr = %cfg.app.listen_addr,
        max_db_connections = cfg.app.max_db_connections,
        "starting notes service"
    );

    let store = NoteStore::connect(
        &cfg.basic.database_url,
        &store_options(cfg, cfg.app.connect_retries),
    )
    .await?;
    if !store.schema_present().await? {
        return Err(StackError::SchemaMissing);
    }

    let state = AppState::new(store.clone(), Arc::from(cfg.basic.secret_key.as_str()));
    let app = notes_router(state);

    let listener = TcpListener::bind(cfg.app.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.app.listen_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<PeerAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    store.close().await;
    info!("notes service stopped");
    Ok(())
}
