use std::time::Duration;

use thiserror::Error;

/// Coarse classification used by the sync stages to decide how far a
/// failure is allowed to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failure or timeout for a single entity. Skip it this cycle.
    Transport,
    /// Missing or invalid field in a remote payload. Reject the entity.
    MalformedPayload,
    /// Store write or read failure.
    Persistence,
    /// Fatal for the current cycle.
    Configuration,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Transport(_) | AppError::Timeout(_) | AppError::HttpStatus { .. } => {
                ErrorKind::Transport
            }
            AppError::MalformedPayload(_) | AppError::Json(_) => ErrorKind::MalformedPayload,
            AppError::Database(_) | AppError::Sqlite(_) | AppError::Io(_) => {
                ErrorKind::Persistence
            }
            AppError::Toml(_) | AppError::Config(_) => ErrorKind::Configuration,
            AppError::Other(_) => ErrorKind::Transport,
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        AppError::MalformedPayload(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors_by_recovery_scope() {
        assert_eq!(
            AppError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            AppError::HttpStatus {
                url: "https://example.org/b/threads.json".into(),
                status: 503
            }
            .kind(),
            ErrorKind::Transport
        );
        assert_eq!(AppError::malformed("num").kind(), ErrorKind::MalformedPayload);
        assert_eq!(
            AppError::Io(std::io::Error::other("disk full")).kind(),
            ErrorKind::Persistence
        );
        assert_eq!(
            AppError::Config("no boards".into()).kind(),
            ErrorKind::Configuration
        );
    }
}
