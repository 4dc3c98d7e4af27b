use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, LexMatchError>;

#[derive(Debug, Error)]
pub enum LexMatchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("search index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("change feed cannot resume from position {cursor}: retained history starts after {retained_after}")]
    FeedCursorExpired { cursor: u64, retained_after: u64 },

    #[error("matching unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub operation: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LexMatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Config(_) => "INVALID_CONFIG",
            Self::IndexUnavailable(_) => "INDEX_UNAVAILABLE",
            Self::Timeout(_) => "TIMEOUT",
            Self::FeedCursorExpired { .. } => "FEED_CURSOR_EXPIRED",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Sqlite(_) => "SQLITE_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Toml(_) => "TOML_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Downstream failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::IndexUnavailable(_) | Self::Timeout(_) | Self::Http(_) | Self::Io(_) => true,
            Self::Sqlite(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    pub(crate) fn mutex_poisoned(what: &str) -> Self {
        Self::Internal(format!("{what} mutex poisoned"))
    }

    pub fn to_payload(&self, operation: impl Into<String>) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            operation: operation.into(),
            trace_id: Uuid::new_v4().to_string(),
            details: None,
        }
    }
}

/// Maps a transport failure from an HTTP collaborator onto the retry taxonomy.
pub(crate) fn classify_http_error(err: reqwest::Error, target: &str) -> LexMatchError {
    if err.is_timeout() {
        return LexMatchError::Timeout(format!("{target}: {err}"));
    }
    if err.is_connect() {
        return LexMatchError::IndexUnavailable(format!("{target}: {err}"));
    }
    LexMatchError::Http(err)
}
