//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    /// HTTP 403/404 on an asset fetch. Not retried.
    #[error("asset unavailable ({status}): {url}")]
    AssetUnavailable { status: u16, url: String },

    #[error("download failed: {message}")]
    DownloadFailed { message: String },

    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("invalid media: {0}")]
    InvalidMedia(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    pub fn invalid_media(message: impl Into<String>) -> Self {
        Self::InvalidMedia(message.into())
    }

    /// Asset fetch errors that must not be retried (403/404).
    pub fn is_unavailable(&self) -> bool {
        matches!(self, MediaError::AssetUnavailable { .. })
    }
}
