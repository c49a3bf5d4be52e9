//! Image generation across openai, freepik, and gemini.
//!
//! The requested provider is attempted first, then the remaining providers
//! in a fixed per-primary order. Quota and policy errors halt the ladder.
//! When product reference images are present, an openai vision pre-pass
//! augments the prompt with extracted product attributes; a pre-pass
//! failure degrades to the raw prompt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use tracing::{debug, info, warn};

use reel_cache::{ArtifactCache, CacheValue};
use reel_media::{clip, download, fs_utils};
use reel_models::ImageProvider;

use crate::error::{ProviderError, ProviderResult};

/// Freepik poll cadence and budget.
const FREEPIK_POLL_INTERVAL: Duration = Duration::from_secs(2);
const FREEPIK_POLL_BUDGET: Duration = Duration::from_secs(60);

/// Image generation configuration.
#[derive(Debug, Clone)]
pub struct ImageGenConfig {
    pub openai_api_key: Option<String>,
    pub freepik_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_base: String,
    pub freepik_base: String,
    pub gemini_base: String,
    /// Output frame size; every generated image is letterboxed to it
    pub reel_w: u32,
    pub reel_h: u32,
}

impl Default for ImageGenConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            freepik_api_key: None,
            gemini_api_key: None,
            openai_base: "https://api.openai.com".to_string(),
            freepik_base: "https://api.freepik.com".to_string(),
            gemini_base: "https://generativelanguage.googleapis.com".to_string(),
            reel_w: 1080,
            reel_h: 1920,
        }
    }
}

impl ImageGenConfig {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            freepik_api_key: std::env::var("FREEPIK_API_KEY").ok(),
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            reel_w: std::env::var("REEL_SIZE_W")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1080),
            reel_h: std::env::var("REEL_SIZE_H")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1920),
            ..Default::default()
        }
    }
}

/// One image generation request.
#[derive(Debug, Clone)]
pub struct ImageRequest<'a> {
    pub prompt: &'a str,
    pub provider: ImageProvider,
    /// Opaque scene-context discriminator mixed into the cache key
    pub scene_context: Option<String>,
    /// Opaque video-context discriminator mixed into the cache key
    pub video_context: Option<String>,
    /// E-commerce reference images for the vision pre-pass
    pub product_images: &'a [String],
}

/// Image generation client.
pub struct ImageGenClient {
    config: ImageGenConfig,
    http: reqwest::Client,
    temp_dir: PathBuf,
}

impl ImageGenClient {
    pub fn new(config: ImageGenConfig, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Generate an image, consulting the cache first. The cache key uses
    /// the requested provider, so a later identical request re-runs the
    /// primary rather than silently reusing a fallback's artifact.
    pub async fn generate(
        &self,
        request: &ImageRequest<'_>,
        cache: &ArtifactCache,
    ) -> ProviderResult<PathBuf> {
        let key = ArtifactCache::key(
            "image_generation",
            &[
                request.prompt,
                request.scene_context.as_deref().unwrap_or(""),
                request.video_context.as_deref().unwrap_or(""),
            ],
            request.provider.as_str(),
        );
        if let Some(CacheValue::Path { path }) = cache.get(&key).await {
            info!(path = %path.display(), "Image generation cache hit");
            return Ok(path);
        }

        let path = self.generate_uncached(request).await?;
        if let Err(e) = cache.put(&key, &CacheValue::path(&path)).await {
            warn!(error = %e, "Failed to cache generated image");
        }
        Ok(path)
    }

    async fn generate_uncached(&self, request: &ImageRequest<'_>) -> ProviderResult<PathBuf> {
        let prompt = if request.product_images.is_empty() {
            request.prompt.to_string()
        } else {
            match self
                .vision_prepass(request.prompt, request.product_images)
                .await
            {
                Ok(augmented) => augmented,
                Err(e) => {
                    warn!(error = %e, "Vision pre-pass failed, using raw prompt");
                    request.prompt.to_string()
                }
            }
        };

        let mut last_error: Option<ProviderError> = None;
        for provider in request.provider.attempt_order() {
            debug!(provider = %provider, "Attempting image generation");
            let result = match provider {
                ImageProvider::Openai => self.generate_openai(&prompt).await,
                ImageProvider::Freepik => self.generate_freepik(&prompt).await,
                ImageProvider::Gemini => self.generate_gemini(&prompt).await,
            };
            match result {
                Ok(path) => {
                    if provider != request.provider {
                        info!(
                            requested = %request.provider,
                            used = %provider,
                            "Image generated by fallback provider"
                        );
                    }
                    return Ok(path);
                }
                Err(e) if e.halts_fallback() => return Err(e),
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Image generation failed, trying next provider");
                    last_error = Some(e);
                }
            }
        }

        Err(ProviderError::AllProvidersFailed {
            capability: "image generation".to_string(),
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no provider configured".to_string()),
        })
    }

    /// Describe the product images with a vision model and fold the
    /// attributes into the prompt.
    async fn vision_prepass(
        &self,
        prompt: &str,
        product_images: &[String],
    ) -> ProviderResult<String> {
        let api_key = self
            .config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ProviderError::missing_credentials("openai"))?;

        let mut content = vec![serde_json::json!({
            "type": "text",
            "text": "Describe the product in these reference images: exact colors, materials, \
                     shape, branding, and distinguishing details. Answer in one short paragraph."
        })];
        for url in product_images {
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": {"url": url}
            }));
        }

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.config.openai_base))
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": content}],
                "max_tokens": 300
            }))
            .timeout(Duration::from_secs(60))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::transient(
                "openai",
                format!("vision pre-pass HTTP {}", status.as_u16()),
            ));
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<ChatChoice>,
        }
        #[derive(Deserialize)]
        struct ChatChoice {
            message: ChatMessage,
        }
        #[derive(Deserialize)]
        struct ChatMessage {
            content: String,
        }

        let parsed: ChatResponse = response.json().await?;
        let description = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::invalid_response("openai", "empty vision response"))?;

        Ok(format!(
            "{prompt}. The product must match this reference exactly: {description}"
        ))
    }

    /// openai: synchronous request returning base64 image data.
    async fn generate_openai(&self, prompt: &str) -> ProviderResult<PathBuf> {
        let api_key = self
            .config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ProviderError::missing_credentials("openai"))?;

        let response = self
            .http
            .post(format!("{}/v1/images/generations", self.config.openai_base))
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "model": "gpt-image-1",
                "prompt": prompt,
                "size": "1024x1536"
            }))
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::quota("openai", body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::generation(
                "openai",
                format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200)),
            ));
        }

        #[derive(Deserialize)]
        struct ImagesResponse {
            data: Vec<ImageDatum>,
        }
        #[derive(Deserialize)]
        struct ImageDatum {
            b64_json: Option<String>,
        }

        let parsed: ImagesResponse = response.json().await?;
        let b64 = parsed
            .data
            .first()
            .and_then(|d| d.b64_json.as_deref())
            .ok_or_else(|| ProviderError::invalid_response("openai", "no image payload"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| ProviderError::invalid_response("openai", e.to_string()))?;

        self.write_and_resize(&bytes, "openai").await
    }

    /// freepik: two-phase submit + poll protocol.
    async fn generate_freepik(&self, prompt: &str) -> ProviderResult<PathBuf> {
        let api_key = self
            .config
            .freepik_api_key
            .as_ref()
            .ok_or_else(|| ProviderError::missing_credentials("freepik"))?;

        let submit = self
            .http
            .post(format!("{}/v1/ai/mystic", self.config.freepik_base))
            .header("x-freepik-api-key", api_key)
            .json(&serde_json::json!({
                "prompt": prompt,
                "aspect_ratio": "social_story_9_16"
            }))
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        if !submit.status().is_success() {
            return Err(ProviderError::generation(
                "freepik",
                format!("submit HTTP {}", submit.status().as_u16()),
            ));
        }

        #[derive(Deserialize)]
        struct SubmitResponse {
            data: SubmitData,
        }
        #[derive(Deserialize)]
        struct SubmitData {
            task_id: String,
        }

        let task_id = submit.json::<SubmitResponse>().await?.data.task_id;
        debug!(task_id = %task_id, "Freepik generation submitted");

        let started = tokio::time::Instant::now();
        loop {
            if started.elapsed() > FREEPIK_POLL_BUDGET {
                return Err(ProviderError::Timeout {
                    provider: "freepik".to_string(),
                    budget_secs: FREEPIK_POLL_BUDGET.as_secs(),
                });
            }

            #[derive(Deserialize)]
            struct StatusResponse {
                data: StatusData,
            }
            #[derive(Deserialize)]
            struct StatusData {
                status: String,
                #[serde(default)]
                generated: Vec<String>,
            }

            let poll = self
                .http
                .get(format!(
                    "{}/v1/ai/mystic/{}",
                    self.config.freepik_base, task_id
                ))
                .header("x-freepik-api-key", api_key)
                .timeout(Duration::from_secs(30))
                .send()
                .await;

            let data = match poll {
                Ok(response) if response.status().is_success() => {
                    response.json::<StatusResponse>().await?.data
                }
                Ok(response) => {
                    warn!(status = response.status().as_u16(), "Freepik status check failed");
                    tokio::time::sleep(FREEPIK_POLL_INTERVAL).await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Freepik status check failed");
                    tokio::time::sleep(FREEPIK_POLL_INTERVAL).await;
                    continue;
                }
            };

            match data.status.as_str() {
                "COMPLETED" => {
                    let url = data.generated.first().ok_or_else(|| {
                        ProviderError::invalid_response("freepik", "completed with no images")
                    })?;
                    let options = download::DownloadOptions {
                        dest_dir: Some(self.temp_dir.clone()),
                        ..Default::default()
                    };
                    let raw = download::download_asset(url, &options).await?;
                    return self.resize_in_place(&raw, "freepik").await;
                }
                "FAILED" => {
                    return Err(ProviderError::generation("freepik", "generation failed"));
                }
                "CREATED" | "PROCESSING" => {
                    tokio::time::sleep(FREEPIK_POLL_INTERVAL).await;
                }
                other => {
                    warn!(status = other, "Unknown Freepik status");
                    tokio::time::sleep(FREEPIK_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// gemini: single request returning inline image bytes.
    async fn generate_gemini(&self, prompt: &str) -> ProviderResult<PathBuf> {
        let api_key = self
            .config
            .gemini_api_key
            .as_ref()
            .ok_or_else(|| ProviderError::missing_credentials("gemini"))?;

        let url = format!(
            "{}/v1beta/models/gemini-2.0-flash-preview-image-generation:generateContent?key={}",
            self.config.gemini_base, api_key
        );
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "contents": [{"parts": [{"text": prompt}]}],
                "generationConfig": {"responseModalities": ["TEXT", "IMAGE"]}
            }))
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::quota("gemini", "rate limited"));
        }
        if !status.is_success() {
            return Err(ProviderError::generation(
                "gemini",
                format!("HTTP {}", status.as_u16()),
            ));
        }

        #[derive(Deserialize)]
        struct GeminiResponse {
            candidates: Vec<Candidate>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            content: Content,
        }
        #[derive(Deserialize)]
        struct Content {
            parts: Vec<Part>,
        }
        #[derive(Deserialize)]
        struct Part {
            #[serde(rename = "inlineData")]
            inline_data: Option<InlineData>,
        }
        #[derive(Deserialize)]
        struct InlineData {
            data: String,
        }

        let parsed: GeminiResponse = response.json().await?;
        let b64 = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.iter().find_map(|p| p.inline_data.as_ref()))
            .map(|d| d.data.as_str())
            .ok_or_else(|| ProviderError::invalid_response("gemini", "no inline image"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| ProviderError::invalid_response("gemini", e.to_string()))?;

        self.write_and_resize(&bytes, "gemini").await
    }

    async fn write_and_resize(&self, bytes: &[u8], provider: &str) -> ProviderResult<PathBuf> {
        let raw = fs_utils::unique_path(&self.temp_dir, &format!("{provider}_raw"), ".png");
        tokio::fs::write(&raw, bytes).await?;
        let result = self.resize_in_place(&raw, provider).await;
        fs_utils::cleanup_files([&raw]).await;
        result
    }

    async fn resize_in_place(&self, raw: &Path, provider: &str) -> ProviderResult<PathBuf> {
        let output = fs_utils::unique_path(&self.temp_dir, &format!("{provider}_generated"), ".png");
        clip::resize_image_file(raw, &output, self.config.reel_w, self.config.reel_h).await?;
        Ok(output)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
