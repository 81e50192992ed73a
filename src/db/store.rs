use crate::db::models::{Note, NoteFields};
use crate::db::schema::Dialect;
use crate::error::StackError;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow, install_default_drivers};
use sqlx::error::DatabaseError;
use sqlx::{AnyPool, Row};
use std::time::Duration;
use tracing::{debug, warn};

const NOTE_COLUMNS: &str = "id, title, content, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Extra attempts while the store is still unreachable at boot.
    pub connect_retries: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            connect_retries: 0,
        }
    }
}

#[derive(Clone)]
pub struct NoteStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl NoteStore {
    pub async fn connect(url: &str, opts: &StoreOptions) -> Result<Self, StackError> {
        install_default_drivers();
        let dialect = Dialect::from_url(url)?;

        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(opts.connect_retries)
            .with_jitter();

        let pool = (|| async {
            AnyPoolOptions::new()
                .max_connections(opts.max_connections.max(1))
                .acquire_timeout(opts.acquire_timeout)
                .connect(url)
                .await
        })
        .retry(retry_policy)
        .when(|e: &sqlx::Error| matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut))
        .notify(|err, dur: Duration| {
            warn!("store unreachable ({}), retrying in {:?}", err, dur);
        })
        .await?;

        Ok(Self { pool, dialect })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Apply the bundled DDL. Idempotent; meant for the deploy-time
    /// `migrate` step, not for the serving path.
    pub async fn migrate(&self) -> Result<(), StackError> {
        // sqlx::query runs one statement at a time
        for stmt in self.dialect.init_sql().split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn schema_present(&self) -> Result<bool, StackError> {
        match sqlx::query("SELECT COUNT(*) FROM notes")
            .fetch_one(&self.pool)
            .await
        {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if is_missing_table(e.as_ref()) => {
                debug!(error = %e, "notes table is missing");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn ping(&self) -> Result<(), StackError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Insert, read back and commit in one transaction, so a failed
    /// create leaves no row behind.
    pub async fn create(&self, fields: NoteFields) -> Result<Note, StackError> {
        let fields = fields.normalized()?;
        let now = timestamp();
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO notes (title, content, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(fields.title)
        .bind(fields.content)
        .bind(now.clone())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // The Any driver only reports insert ids for MySQL; SQLite is asked
        // on the same connection.
        let id = match self.dialect {
            Dialect::Sqlite => {
                let (id,): (i64,) = sqlx::query_as("SELECT last_insert_rowid()")
                    .fetch_one(&mut *tx)
                    .await?;
                id
            }
            Dialect::MySql => result.last_insert_id().ok_or_else(|| {
                sqlx::Error::Protocol("backend did not report the inserted note id".to_string())
            })?,
        };

        let row = sqlx::query(&format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let note = Self::row_to_model(row)?;
        tx.commit().await?;
        Ok(note)
    }

    pub async fn get(&self, id: i64) -> Result<Note, StackError> {
        let row = sqlx::query(&format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StackError::NoteNotFound(id))?;
        Self::row_to_model(row)
    }

    pub async fn list(&self) -> Result<Vec<Note>, StackError> {
        let rows = sqlx::query(&format!("SELECT {NOTE_COLUMNS} FROM notes ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_model).collect()
    }

    /// Newest notes first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<Note>, StackError> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes ORDER BY id DESC LIMIT ?"
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_model).collect()
    }

    pub async fn count(&self) -> Result<i64, StackError> {
        let rec: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notes")
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.0)
    }

    /// Replace title and content of an existing note.
    pub async fn update(&self, id: i64, fields: NoteFields) -> Result<Note, StackError> {
        let fields = fields.normalized()?;
        let result =
            sqlx::query("UPDATE notes SET title = ?, content = ?, updated_at = ? WHERE id = ?")
                .bind(fields.title)
                .bind(fields.content)
                .bind(timestamp())
                .bind(id)
                .execute(&self.pool)
                .await?;

        // MySQL reports changed rows, not matched rows; `get` settles existence.
        if result.rows_affected() == 0 {
            debug!(id, "update touched no rows");
        }
        self.get(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<(), StackError> {
        let result = sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StackError::NoteNotFound(id));
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_model(row: AnyRow) -> Result<Note, StackError> {
        let id: i64 = row.try_get("id")?;
        let title: Option<String> = row.try_get("title")?;
        let content: String = row.try_get("content")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Note {
            id,
            title,
            content,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }
}

/// SQLite says `no such table`; MySQL reports SQLSTATE 42S02 (errno 1146).
fn is_missing_table(e: &dyn DatabaseError) -> bool {
    e.code().as_deref() == Some("42S02") || e.message().contains("no such table")
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StackError> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
        .with_timezone(&Utc);
    Ok(parsed)
}
