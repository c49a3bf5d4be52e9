//! Store error types and retry classification.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Task state error: {0}")]
    TaskState(#[from] reel_models::TaskStateError),
}

impl StoreError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    /// Retry on transport errors, 429, and 5xx. Everything else (auth,
    /// not-found, validation) is not retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport(e) => !e.is_builder() && !e.is_decode(),
            StoreError::Api { status, .. } => *status == 429 || *status >= 500,
            StoreError::RequestFailed(_) => true,
            _ => false,
        }
    }

    /// Retry-After hint from a 429 response, in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            StoreError::Api { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}
