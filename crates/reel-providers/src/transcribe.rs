//! Word-level transcription for subtitle timing.
//!
//! Uploads the narration audio to a Whisper-style transcription endpoint
//! requesting word-granularity timestamps.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use reel_media::WordTiming;

use crate::error::{ProviderError, ProviderResult};

/// Transcription configuration.
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com".to_string(),
            model: "whisper-1".to_string(),
        }
    }
}

impl TranscriptionConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("TRANSCRIBE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok()),
            api_base: std::env::var("TRANSCRIBE_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            model: "whisper-1".to_string(),
        }
    }
}

/// Transcription client.
pub struct TranscriptionClient {
    config: TranscriptionConfig,
    http: reqwest::Client,
}

impl TranscriptionClient {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Transcribe the audio file into word timings.
    pub async fn transcribe_words(&self, audio_path: &Path) -> ProviderResult<Vec<WordTiming>> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::missing_credentials("transcription"))?;

        let bytes = tokio::fs::read(audio_path).await?;
        let filename = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "narration.mp3".to_string());

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(filename),
            )
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word");

        let response = self
            .http
            .post(format!("{}/v1/audio/transcriptions", self.config.api_base))
            .bearer_auth(api_key)
            .multipart(form)
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::transient(
                "transcription",
                format!("HTTP {}", response.status().as_u16()),
            ));
        }

        #[derive(Deserialize)]
        struct TranscriptionResponse {
            #[serde(default)]
            words: Vec<ApiWord>,
        }
        #[derive(Deserialize)]
        struct ApiWord {
            word: String,
            start: f64,
            end: f64,
        }

        let parsed: TranscriptionResponse = response.json().await?;
        debug!(words = parsed.words.len(), "Transcription complete");

        Ok(parsed
            .words
            .into_iter()
            .map(|w| WordTiming {
                word: w.word,
                start: w.start,
                end: w.end,
            })
            .collect())
    }
}
