//! SQL DDL for the notes table, one flavour per supported backend.
//! Timestamps are stored as RFC 3339 text so rows decode the same way on
//! every backend.

use std::borrow::Cow;

use crate::error::StackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self, StackError> {
        let scheme = url.split_once(':').map(|(s, _)| s).unwrap_or_default();
        match scheme {
            "sqlite" => Ok(Dialect::Sqlite),
            "mysql" => Ok(Dialect::MySql),
            other => Err(StackError::Config(format!(
                "unsupported database scheme `{other}` (expected sqlite or mysql)"
            ))),
        }
    }

    /// `url` with SQLite's create-if-missing mode switched on, for the
    /// migrate step. An explicit `mode=` and in-memory URLs are left alone.
    pub fn creatable_url(self, url: &str) -> Cow<'_, str> {
        if self != Dialect::Sqlite || url.contains("mode=") || url.contains(":memory:") {
            return Cow::Borrowed(url);
        }
        let sep = if url.contains('?') { '&' } else { '?' };
        Cow::Owned(format!("{url}{sep}mode=rwc"))
    }

    pub fn init_sql(self) -> &'static str {
        match self {
            Dialect::Sqlite => SQLITE_INIT,
            Dialect::MySql => MYSQL_INIT,
        }
    }
}

/// SQLite schema:
/// - `id` INTEGER PRIMARY KEY AUTOINCREMENT, never reused after delete
/// - `title` optional, `content` required
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL  -- RFC3339
);
"#;

pub const MYSQL_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS notes (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    title VARCHAR(200) NULL,
    content TEXT NOT NULL,
    created_at VARCHAR(40) NOT NULL,
    updated_at VARCHAR(40) NOT NULL
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_follows_url_scheme() {
        assert_eq!(Dialect::from_url("sqlite://notes.db").unwrap(), Dialect::Sqlite);
        assert_eq!(
            Dialect::from_url("mysql://notes:pw@10.0.3.20:3306/notes").unwrap(),
            Dialect::MySql
        );
        assert!(Dialect::from_url("postgres://localhost/notes").is_err());
    }

    #[test]
    fn only_sqlite_files_get_create_mode() {
        assert_eq!(
            Dialect::Sqlite.creatable_url("sqlite://notes.db"),
            "sqlite://notes.db?mode=rwc"
        );
        assert_eq!(
            Dialect::Sqlite.creatable_url("sqlite://notes.db?busy_timeout=1000"),
            "sqlite://notes.db?busy_timeout=1000&mode=rwc"
        );
        assert_eq!(
            Dialect::Sqlite.creatable_url("sqlite://notes.db?mode=ro"),
            "sqlite://notes.db?mode=ro"
        );
        assert_eq!(Dialect::Sqlite.creatable_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            Dialect::MySql.creatable_url("mysql://notes@10.0.3.20/notes"),
            "mysql://notes@10.0.3.20/notes"
        );
    }
}
