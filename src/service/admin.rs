//! Operator tasks run from the administrative access host, talking to the
//! store directly rather than through the application tier.

use tracing::info;

use super::store_options;
use crate::config::{Config, redact_database_url};
use crate::db::{Dialect, NoteStore};
use crate::error::StackError;

/// Deploy-time schema step. A missing SQLite file is created.
pub async fn migrate(cfg: &Config) -> Result<(), StackError> {
    cfg.validate_database()?;
    let dialect = Dialect::from_url(&cfg.basic.database_url)?;
    let store = NoteStore::connect(
        &dialect.creatable_url(&cfg.basic.database_url),
        &store_options(cfg, cfg.app.connect_retries),
    )
    .await?;
    store.migrate().await?;
    info!(
        database_url = %redact_database_url(&cfg.basic.database_url),
        dialect = ?store.dialect(),
        "schema applied"
    );
    store.close().await;
    Ok(())
}

/// Print the note count and the newest `limit` notes.
pub async fn inspect(cfg: &Config, limit: i64) -> Result<(), StackError> {
    cfg.validate_database()?;
    let store = NoteStore::connect(&cfg.basic.database_url, &store_options(cfg, 0)).await?;
    if !store.schema_present().await? {
        return Err(StackError::SchemaMissing);
    }

    let total = store.count().await?;
    println!(
        "store: {}",
        redact_database_url(&cfg.basic.database_url)
    );
    println!("notes: {total}");
    for note in store.recent(limit).await? {
        let title = note.title.as_deref().unwrap_or("-");
        let preview: String = note.content.chars().take(60).collect();
        println!(
            "{:>6}  {}  {:<24}  {}",
            note.id,
            note.updated_at.format("%Y-%m-%d %H:%M:%S"),
            title,
            preview.replace('\n', " ")
        );
    }
    store.close().await;
    Ok(())
}
