//! DocumentDB Error Types

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocDbError>;

/// Failure of a storage call, tagged by how the caller should react.
#[derive(Debug, Error)]
pub enum DocDbError {
    /// The addressed document does not exist.
    #[error("Document not found: {id}")]
    NotFound { id: String },

    /// Throttling, timeouts and other conditions worth retrying.
    #[error("Transient storage error: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Storage error: {0}")]
    Fatal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DocDbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Delay suggested by the store before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DocDbError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            DocDbError::Transient {
                message: err.to_string(),
                retry_after: None,
            }
        } else {
            DocDbError::Fatal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DocDbError {
    fn from(err: serde_json::Error) -> Self {
        DocDbError::Fatal(format!("Serialization error: {}", err))
    }
}
