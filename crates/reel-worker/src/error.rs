//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] reel_models::spec::SpecError),

    #[error("Scene {scene_id} failed: {message}")]
    SceneFailed { scene_id: String, message: String },

    #[error("Composition failed: {0}")]
    ComposeFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// The task was failed out from under this worker (reconciler timeout
    /// or a signal delivered to another run).
    #[error("Task failed due to external factor: {0}")]
    External(String),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Provider error: {0}")]
    Provider(#[from] reel_providers::ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] reel_storage::StorageError),

    #[error("Store error: {0}")]
    Store(#[from] reel_store::StoreError),

    #[error("Task state error: {0}")]
    TaskState(#[from] reel_models::TaskStateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn scene_failed(scene_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SceneFailed {
            scene_id: scene_id.into(),
            message: message.into(),
        }
    }

    pub fn compose_failed(message: impl Into<String>) -> Self {
        Self::ComposeFailed(message.into())
    }

    /// Failures driven by external factors (signals, reconciler) map to
    /// exit code 2; everything else is 1.
    pub fn is_external(&self) -> bool {
        matches!(self, WorkerError::External(_))
    }

    /// Quota exhaustion surfaces immediately with no retry or fallback.
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(
            self,
            WorkerError::Provider(reel_providers::ProviderError::QuotaExhausted { .. })
        )
    }
}

/// Truncate an error description for storage in the task record.
pub fn truncate_error(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    message.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_error() {
        assert_eq!(truncate_error("short", 200), "short");
        let long = "x".repeat(300);
        assert_eq!(truncate_error(&long, 200).chars().count(), 200);
    }

    #[test]
    fn test_external_classification() {
        assert!(WorkerError::External("reconciler timeout".into()).is_external());
        assert!(!WorkerError::TaskNotFound("t".into()).is_external());
    }
}
