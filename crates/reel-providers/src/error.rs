//! Provider error taxonomy.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} credentials not configured")]
    MissingCredentials(String),

    #[error("{provider} call timed out after {budget_secs}s")]
    Timeout { provider: String, budget_secs: u64 },

    #[error("{provider} transient error: {message}")]
    Transient { provider: String, message: String },

    /// Balance/quota exhaustion. Surfaces immediately: no retry, no
    /// fallback.
    #[error("{provider} quota exhausted: {message}")]
    QuotaExhausted { provider: String, message: String },

    #[error("{provider} refused the request: {message}")]
    PolicyRefusal { provider: String, message: String },

    #[error("{provider} generation failed: {message}")]
    Generation { provider: String, message: String },

    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("all {capability} providers failed, last error: {last_error}")]
    AllProvidersFailed {
        capability: String,
        last_error: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn missing_credentials(provider: impl Into<String>) -> Self {
        Self::MissingCredentials(provider.into())
    }

    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn quota(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QuotaExhausted {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn generation(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether the error class should block provider fallback entirely.
    pub fn halts_fallback(&self) -> bool {
        matches!(
            self,
            ProviderError::QuotaExhausted { .. } | ProviderError::PolicyRefusal { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient { .. } | ProviderError::Timeout { .. } | ProviderError::Http(_)
        )
    }
}
