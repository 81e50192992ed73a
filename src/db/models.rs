use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StackError;

const MAX_TITLE_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: i64,
    pub title: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Client-supplied part of a note, used for both create and full update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteFields {
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
}

impl NoteFields {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: content.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Trim the title (an empty one becomes `None`) and reject blank content.
    pub fn normalized(self) -> Result<Self, StackError> {
        if self.content.trim().is_empty() {
            return Err(StackError::InvalidNote("content must not be empty".to_string()));
        }
        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if let Some(t) = &title
            && t.chars().count() > MAX_TITLE_CHARS
        {
            return Err(StackError::InvalidNote(format!(
                "title must be at most {MAX_TITLE_CHARS} characters"
            )));
        }
        Ok(Self {
            title,
            content: self.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_content_is_rejected() {
        assert!(matches!(
            NoteFields::new("   ").normalized(),
            Err(StackError::InvalidNote(_))
        ));
    }

    #[test]
    fn title_is_trimmed_and_bounded() {
        let fields = NoteFields::new("buy milk").with_title("  groceries ").normalized().unwrap();
        assert_eq!(fields.title.as_deref(), Some("groceries"));

        let fields = NoteFields::new("buy milk").with_title("   ").normalized().unwrap();
        assert_eq!(fields.title, None);

        let long = "x".repeat(MAX_TITLE_CHARS + 1);
        assert!(NoteFields::new("buy milk").with_title(long).normalized().is_err());
    }
}
