use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;
use tracing::error;

use crate::topology::TopologyError;

#[derive(Debug, ThisError)]
pub enum StackError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Notes table is missing; run `notes-stack migrate` first")]
    SchemaMissing,

    #[error("Note {0} not found")]
    NoteNotFound(i64),

    #[error("Invalid note: {0}")]
    InvalidNote(String),

    #[error("Upstream request error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl From<figment::Error> for StackError {
    fn from(e: figment::Error) -> Self {
        StackError::Config(e.to_string())
    }
}

impl IntoResponse for StackError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match self {
            StackError::NoteNotFound(id) => (
                StatusCode::NOT_FOUND,
                ApiErrorBody {
                    code: "NOT_FOUND".to_string(),
                    message: format!("note {id} does not exist"),
                },
            ),
            StackError::InvalidNote(reason) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiErrorBody {
                    code: "INVALID_NOTE".to_string(),
                    message: reason,
                },
            ),
            // A connect timeout is a dead replica, not a slow one.
            StackError::Upstream(ref e) if e.is_timeout() && !e.is_connect() => (
                StatusCode::GATEWAY_TIMEOUT,
                ApiErrorBody {
                    code: "GATEWAY_TIMEOUT".to_string(),
                    message: "Upstream service timed out.".to_string(),
                },
            ),
            StackError::Upstream(e) => {
                error!(error = %e, "upstream unreachable");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiErrorBody {
                        code: "BAD_GATEWAY".to_string(),
                        message: "Upstream service is unavailable.".to_string(),
                    },
                )
            }
            StackError::Json(_) | StackError::UrlParse(_) => (
                StatusCode::BAD_REQUEST,
                ApiErrorBody {
                    code: "BAD_REQUEST".to_string(),
                    message: "Malformed request.".to_string(),
                },
            ),
            other => {
                error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorBody {
                        code: "INTERNAL_ERROR".to_string(),
                        message: "An internal server error occurred.".to_string(),
                    },
                )
            }
        };
        (status, Json(ApiErrorResponse { error: error_body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
