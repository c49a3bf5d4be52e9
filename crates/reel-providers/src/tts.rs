//! Narration synthesis.
//!
//! Primary: a cloud speech API taking a voice id and model id, returning
//! MP3. Fallback: a local generative TTS engine, lazily located and
//! serialized by a process-global mutex so concurrent scenes never race a
//! load or tear a narration file. Output files are validated non-empty;
//! half-written files are deleted before the error surfaces.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use reel_cache::{ArtifactCache, CacheValue};
use reel_media::{download, fs_utils};

use crate::error::{ProviderError, ProviderResult};

/// The narration critical section: at most one local generation (and the
/// single engine load) in flight per process.
static LOCAL_TTS_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn local_tts_lock() -> &'static Mutex<()> {
    LOCAL_TTS_LOCK.get_or_init(|| Mutex::new(()))
}

/// TTS configuration.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Cloud TTS API key; absent means local-only
    pub api_key: Option<String>,
    pub voice_id: String,
    pub model_id: String,
    pub api_base: String,
    /// Local engine binary; located with `which` when not set
    pub local_engine_bin: Option<String>,
    /// Request timeout for the cloud API
    pub request_timeout: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: "RaFzMbMIfqBcIurH6XF9".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            api_base: "https://api.elevenlabs.io".to_string(),
            local_engine_bin: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl TtsConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("TTS_API_KEY").ok(),
            voice_id: std::env::var("TTS_VOICE_ID")
                .unwrap_or_else(|_| "RaFzMbMIfqBcIurH6XF9".to_string()),
            model_id: std::env::var("TTS_MODEL_ID")
                .unwrap_or_else(|_| "eleven_multilingual_v2".to_string()),
            api_base: std::env::var("TTS_API_BASE")
                .unwrap_or_else(|_| "https://api.elevenlabs.io".to_string()),
            local_engine_bin: std::env::var("LOCAL_TTS_BIN").ok(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Narration generator with cloud primary and local fallback.
pub struct NarrationGenerator {
    config: TtsConfig,
    http: reqwest::Client,
    temp_dir: PathBuf,
}

impl NarrationGenerator {
    pub fn new(config: TtsConfig, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            temp_dir: temp_dir.into(),
        }
    }

    fn provider_tag(&self) -> &'static str {
        if self.config.api_key.is_some() {
            "speech_api"
        } else {
            "local_tts"
        }
    }

    /// Generate narration audio for `text`, consulting the cache first.
    /// Returns the path to an MP3/WAV file pinned by the cache.
    pub async fn generate(
        &self,
        text: &str,
        audio_prompt_url: Option<&str>,
        cache: &ArtifactCache,
    ) -> ProviderResult<PathBuf> {
        let key = ArtifactCache::key(
            "narration",
            &[text, audio_prompt_url.unwrap_or("none")],
            self.provider_tag(),
        );
        if let Some(CacheValue::Path { path }) = cache.get(&key).await {
            info!(path = %path.display(), "Narration cache hit");
            return Ok(path);
        }

        let path = self.generate_uncached(text, audio_prompt_url).await?;
        if let Err(e) = cache.put(&key, &CacheValue::path(&path)).await {
            warn!(error = %e, "Failed to cache narration");
        }
        Ok(path)
    }

    async fn generate_uncached(
        &self,
        text: &str,
        audio_prompt_url: Option<&str>,
    ) -> ProviderResult<PathBuf> {
        // Primary: cloud speech API. Any soft failure falls through.
        if let Some(path) = self.synthesize_cloud(text).await {
            return Ok(path);
        }

        info!("Falling back to local TTS engine");
        self.synthesize_local(text, audio_prompt_url).await
    }

    /// Cloud synthesis. Returns `None` on the documented failure ladder
    /// (timeout, 401/402/429, other non-200, empty body) so the caller
    /// falls back; only setup errors surface directly.
    async fn synthesize_cloud(&self, text: &str) -> Option<PathBuf> {
        let api_key = self.config.api_key.as_ref()?;

        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.config.api_base, self.config.voice_id
        );
        let body = serde_json::json!({
            "text": text,
            "model_id": self.config.model_id,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75,
                "style": 0.0,
                "use_speaker_boost": true
            }
        });

        let response = match self
            .http
            .post(&url)
            .header("Accept", "audio/mpeg")
            .header("xi-api-key", api_key)
            .json(&body)
            .timeout(self.config.request_timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Speech API request failed, will use fallback");
                return None;
            }
        };

        match response.status().as_u16() {
            200 => {}
            401 => {
                warn!("Speech API: unauthorized, will use fallback");
                return None;
            }
            402 => {
                warn!("Speech API: payment required, will use fallback");
                return None;
            }
            429 => {
                warn!("Speech API: rate limited, will use fallback");
                return None;
            }
            status => {
                warn!(status, "Speech API error, will use fallback");
                return None;
            }
        }

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Speech API body read failed, will use fallback");
                return None;
            }
        };
        if bytes.is_empty() {
            warn!("Speech API returned an empty body, will use fallback");
            return None;
        }

        let path = fs_utils::unique_path(&self.temp_dir, "narration", ".mp3");
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            warn!(error = %e, "Failed to write narration file, will use fallback");
            return None;
        }

        info!(path = %path.display(), bytes = bytes.len(), "Speech API narration written");
        Some(path)
    }

    /// Local engine synthesis. Errors here propagate: there is nothing
    /// left to fall back to.
    async fn synthesize_local(
        &self,
        text: &str,
        audio_prompt_url: Option<&str>,
    ) -> ProviderResult<PathBuf> {
        let binary = match &self.config.local_engine_bin {
            Some(bin) => PathBuf::from(bin),
            None => which::which("piper")
                .map_err(|_| ProviderError::missing_credentials("local TTS engine"))?,
        };

        let output = fs_utils::unique_path(&self.temp_dir, "narration", ".wav");

        // Voice-clone reference, when present, is downloaded beside the
        // output and removed afterwards.
        let mut prompt_path: Option<PathBuf> = None;
        if let Some(url) = audio_prompt_url {
            let options = download::DownloadOptions {
                dest_dir: Some(self.temp_dir.clone()),
                ..Default::default()
            };
            match download::download_asset(url, &options).await {
                Ok(path) => prompt_path = Some(path),
                Err(e) => {
                    return Err(ProviderError::generation(
                        "local_tts",
                        format!("failed to download audio prompt: {e}"),
                    ))
                }
            }
        }

        let result = {
            let _guard = local_tts_lock().lock().await;
            let mut cmd = tokio::process::Command::new(&binary);
            cmd.arg("--text")
                .arg(text)
                .arg("--output")
                .arg(&output);
            if let Some(prompt) = &prompt_path {
                cmd.arg("--voice-ref").arg(prompt);
            }
            cmd.stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped());
            cmd.output().await
        };

        if let Some(prompt) = &prompt_path {
            fs_utils::cleanup_files([prompt]).await;
        }

        let run = result?;
        if !run.status.success() {
            let _ = tokio::fs::remove_file(&output).await;
            let stderr = String::from_utf8_lossy(&run.stderr);
            return Err(ProviderError::generation(
                "local_tts",
                format!(
                    "engine exited with {:?}: {}",
                    run.status.code(),
                    stderr.lines().last().unwrap_or("unknown error")
                ),
            ));
        }

        validate_audio_file(&output).await?;
        info!(path = %output.display(), "Local TTS narration written");
        Ok(output)
    }
}

/// The produced artifact must exist and be non-empty; otherwise delete the
/// half-written file and raise.
async fn validate_audio_file(path: &Path) -> ProviderResult<()> {
    let metadata = tokio::fs::metadata(path).await.map_err(|_| {
        ProviderError::generation("local_tts", format!("narration file missing: {}", path.display()))
    })?;
    if metadata.len() == 0 {
        let _ = tokio::fs::remove_file(path).await;
        return Err(ProviderError::generation(
            "local_tts",
            format!("narration file is empty: {}", path.display()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(server: &MockServer, dir: &Path) -> NarrationGenerator {
        NarrationGenerator::new(
            TtsConfig {
                api_key: Some("key".to_string()),
                api_base: server.uri(),
                ..Default::default()
            },
            dir,
        )
    }

    #[tokio::test]
    async fn test_cloud_synthesis_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/text-to-speech/RaFzMbMIfqBcIurH6XF9"))
            .and(header("xi-api-key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp3-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let generator = generator(&server, dir.path());
        let path = generator.synthesize_cloud("hello world").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"mp3-bytes");
    }

    #[tokio::test]
    async fn test_cloud_failure_ladder_returns_none() {
        for status in [401u16, 402, 429, 500] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let dir = tempfile::TempDir::new().unwrap();
            let generator = generator(&server, dir.path());
            assert!(
                generator.synthesize_cloud("hello").await.is_none(),
                "status {status} must trigger fallback"
            );
        }
    }

    #[tokio::test]
    async fn test_cloud_empty_body_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::new()))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let generator = generator(&server, dir.path());
        assert!(generator.synthesize_cloud("hello").await.is_none());
    }

    #[tokio::test]
    async fn test_validate_rejects_empty_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty.wav");
        tokio::fs::write(&path, b"").await.unwrap();

        assert!(validate_audio_file(&path).await.is_err());
        // The half-written file is removed.
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_narration_caching_by_text_and_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio".to_vec()))
            .expect(1) // second call must come from the cache
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let cache = ArtifactCache::open(dir.path().join("cache")).await.unwrap();
        let generator = generator(&server, dir.path());

        let first = generator.generate("hi there", None, &cache).await.unwrap();
        let second = generator.generate("hi there", None, &cache).await.unwrap();
        assert_eq!(first, second);
    }
}
