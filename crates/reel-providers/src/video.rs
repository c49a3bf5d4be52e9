//! Video generation via LumaAI (text-to-video) and KlingAI
//! (image+text-to-video).
//!
//! Both providers are submit-then-poll protocols with a 600 s budget and a
//! 5 s poll cadence. KlingAI authenticates with a short-lived HS256 JWT
//! and reports balance exhaustion with code 1102, which surfaces as a
//! quota error and is never retried.

use std::path::PathBuf;
use std::time::Duration;

use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reel_cache::{ArtifactCache, CacheValue};
use reel_media::download;
use reel_models::VideoProvider;

use crate::error::{ProviderError, ProviderResult};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const POLL_BUDGET: Duration = Duration::from_secs(600);

/// Status-poll retries for KlingAI before the job fails.
const STATUS_POLL_RETRIES: u32 = 3;

/// KlingAI balance-exhaustion code.
const KLINGAI_BALANCE_CODE: i64 = 1102;

/// JWT lifetime for KlingAI requests.
const KLINGAI_TOKEN_TTL_SECS: i64 = 1800;

/// Video generation configuration.
#[derive(Debug, Clone)]
pub struct VideoGenConfig {
    pub lumaai_api_key: Option<String>,
    pub lumaai_base: String,
    pub klingai_access_key: Option<String>,
    pub klingai_secret_key: Option<String>,
    pub klingai_base: String,
}

impl Default for VideoGenConfig {
    fn default() -> Self {
        Self {
            lumaai_api_key: None,
            lumaai_base: "https://api.lumalabs.ai/dream-machine/v1".to_string(),
            klingai_access_key: None,
            klingai_secret_key: None,
            klingai_base: "https://api-singapore.klingai.com/v1".to_string(),
        }
    }
}

impl VideoGenConfig {
    pub fn from_env() -> Self {
        Self {
            lumaai_api_key: std::env::var("LUMAAI_API_KEY").ok(),
            lumaai_base: std::env::var("LUMAAI_API_BASE")
                .unwrap_or_else(|_| "https://api.lumalabs.ai/dream-machine/v1".to_string()),
            klingai_access_key: std::env::var("KLINGAI_ACCESS_KEY").ok(),
            klingai_secret_key: std::env::var("KLINGAI_SECRET_KEY").ok(),
            klingai_base: std::env::var("KLINGAI_API_BASE_URL")
                .unwrap_or_else(|_| "https://api-singapore.klingai.com/v1".to_string()),
        }
    }
}

/// One video generation request.
#[derive(Debug, Clone)]
pub struct VideoRequest<'a> {
    pub prompt: &'a str,
    /// Reference image; required for KlingAI image2video
    pub image_url: Option<&'a str>,
    pub duration_secs: u32,
    pub aspect_ratio: &'a str,
    pub resolution: &'a str,
    pub model: &'a str,
    /// Accepted but not yet wired to either provider API
    pub negative_prompt: Option<&'a str>,
    pub provider: VideoProvider,
}

/// KlingAI JWT claims: issuer is the access key, valid from 5 s in the
/// past for 30 minutes.
#[derive(Debug, Serialize, Deserialize)]
struct KlingClaims {
    iss: String,
    exp: i64,
    nbf: i64,
}

fn klingai_token(access_key: &str, secret_key: &str) -> ProviderResult<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = KlingClaims {
        iss: access_key.to_string(),
        exp: now + KLINGAI_TOKEN_TTL_SECS,
        nbf: now - 5,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret_key.as_bytes()),
    )
    .map_err(|e| ProviderError::generation("klingai", format!("JWT signing failed: {e}")))
}

/// Video generation client.
pub struct VideoGenClient {
    config: VideoGenConfig,
    http: reqwest::Client,
    temp_dir: PathBuf,
}

impl VideoGenClient {
    pub fn new(config: VideoGenConfig, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Generate a video clip, consulting the cache first. Returns the
    /// downloaded local MP4 path.
    pub async fn generate(
        &self,
        request: &VideoRequest<'_>,
        cache: &ArtifactCache,
    ) -> ProviderResult<PathBuf> {
        let duration = request.duration_secs.to_string();
        let key = ArtifactCache::key(
            "video_generation",
            &[
                request.prompt,
                request.image_url.unwrap_or(""),
                &duration,
                request.aspect_ratio,
                request.resolution,
                request.model,
            ],
            request.provider.as_str(),
        );
        if let Some(CacheValue::Path { path }) = cache.get(&key).await {
            info!(path = %path.display(), "Video generation cache hit");
            return Ok(path);
        }

        let url = match request.provider {
            VideoProvider::Lumaai => self.generate_lumaai(request).await?,
            VideoProvider::Klingai => self.generate_klingai(request).await?,
        };

        info!(url = %url, "Downloading generated video");
        let options = download::DownloadOptions {
            dest_dir: Some(self.temp_dir.clone()),
            ..Default::default()
        };
        let path = download::download_asset(&url, &options).await?;

        if let Err(e) = cache.put(&key, &CacheValue::path(&path)).await {
            warn!(error = %e, "Failed to cache generated video");
        }
        Ok(path)
    }

    /// LumaAI text-to-video: create, then poll until a terminal state.
    async fn generate_lumaai(&self, request: &VideoRequest<'_>) -> ProviderResult<String> {
        let api_key = self
            .config
            .lumaai_api_key
            .as_ref()
            .ok_or_else(|| ProviderError::missing_credentials("lumaai"))?;

        #[derive(Deserialize)]
        struct Generation {
            id: String,
            state: String,
            #[serde(default)]
            failure_reason: Option<String>,
            #[serde(default)]
            assets: Option<Assets>,
        }
        #[derive(Deserialize)]
        struct Assets {
            video: Option<String>,
        }

        let response = self
            .http
            .post(format!("{}/generations", self.config.lumaai_base))
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "prompt": request.prompt,
                "model": request.model,
                "resolution": request.resolution,
                "duration": format!("{}s", request.duration_secs),
                "aspect_ratio": request.aspect_ratio,
            }))
            .timeout(Duration::from_secs(60))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::generation(
                "lumaai",
                format!("submit HTTP {}", response.status().as_u16()),
            ));
        }
        let generation: Generation = response.json().await?;
        info!(generation_id = %generation.id, "LumaAI generation started");

        let started = tokio::time::Instant::now();
        loop {
            if started.elapsed() > POLL_BUDGET {
                return Err(ProviderError::Timeout {
                    provider: "lumaai".to_string(),
                    budget_secs: POLL_BUDGET.as_secs(),
                });
            }

            let response = self
                .http
                .get(format!(
                    "{}/generations/{}",
                    self.config.lumaai_base, generation.id
                ))
                .bearer_auth(api_key)
                .timeout(Duration::from_secs(30))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(ProviderError::transient(
                    "lumaai",
                    format!("status HTTP {}", response.status().as_u16()),
                ));
            }
            let current: Generation = response.json().await?;

            match current.state.as_str() {
                "completed" => {
                    return current
                        .assets
                        .and_then(|a| a.video)
                        .ok_or_else(|| {
                            ProviderError::invalid_response("lumaai", "completed with no video URL")
                        });
                }
                "failed" => {
                    return Err(ProviderError::generation(
                        "lumaai",
                        current
                            .failure_reason
                            .unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                "pending" | "processing" | "dreaming" => {
                    debug!(state = %current.state, "LumaAI generation in progress");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                other => {
                    warn!(state = other, "Unknown LumaAI generation state");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// KlingAI image2video: JWT-authenticated submit, then poll with
    /// bounded status-check retries.
    async fn generate_klingai(&self, request: &VideoRequest<'_>) -> ProviderResult<String> {
        let access_key = self
            .config
            .klingai_access_key
            .as_ref()
            .ok_or_else(|| ProviderError::missing_credentials("klingai"))?;
        let secret_key = self
            .config
            .klingai_secret_key
            .as_ref()
            .ok_or_else(|| ProviderError::missing_credentials("klingai"))?;

        let token = klingai_token(access_key, secret_key)?;

        #[derive(Deserialize)]
        struct Envelope {
            code: i64,
            #[serde(default)]
            message: String,
            #[serde(default)]
            data: Option<serde_json::Value>,
        }

        // The reference image is omitted when unavailable (the e-commerce
        // upload failed): the submission degrades to text-only.
        let mut payload = serde_json::json!({
            "model_name": request.model,
            "mode": "pro",
            "duration": request.duration_secs.to_string(),
            "prompt": request.prompt,
            "cfg_scale": 0.5,
        });
        if let Some(image_url) = request.image_url {
            payload["image"] = serde_json::Value::String(image_url.to_string());
        }

        let response = self
            .http
            .post(format!("{}/videos/image2video", self.config.klingai_base))
            .bearer_auth(&token)
            .json(&payload)
            .timeout(Duration::from_secs(60))
            .send()
            .await?;

        let http_status = response.status().as_u16();
        let envelope: Envelope = response.json().await.map_err(|e| {
            ProviderError::invalid_response("klingai", format!("submit decode: {e}"))
        })?;

        if envelope.code != 0 {
            if envelope.code == KLINGAI_BALANCE_CODE || http_status == 429 {
                return Err(ProviderError::quota("klingai", envelope.message));
            }
            return Err(ProviderError::generation(
                "klingai",
                format!("code {}: {}", envelope.code, envelope.message),
            ));
        }

        let job_id = envelope
            .data
            .as_ref()
            .and_then(|d| d.get("task_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid_response("klingai", "no task_id in response"))?;
        info!(klingai_task_id = %job_id, "KlingAI generation started");

        let status_url = format!(
            "{}/videos/image2video/{}",
            self.config.klingai_base, job_id
        );
        let started = tokio::time::Instant::now();
        loop {
            if started.elapsed() > POLL_BUDGET {
                return Err(ProviderError::Timeout {
                    provider: "klingai".to_string(),
                    budget_secs: POLL_BUDGET.as_secs(),
                });
            }

            let envelope = self.klingai_poll_with_retry(&status_url, &token).await?;
            if envelope.0 != 0 {
                return Err(ProviderError::generation(
                    "klingai",
                    format!("status code {}: {}", envelope.0, envelope.1),
                ));
            }
            let data = envelope.2;

            let status = data
                .get("task_status")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            match status {
                "succeed" => {
                    return data
                        .get("task_result")
                        .and_then(|r| r.get("videos"))
                        .and_then(|v| v.as_array())
                        .and_then(|v| v.first())
                        .and_then(|v| v.get("url"))
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .ok_or_else(|| {
                            ProviderError::invalid_response("klingai", "succeed with no video URL")
                        });
                }
                "failed" => {
                    let reason = data
                        .get("task_status_msg")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    return Err(ProviderError::generation("klingai", reason));
                }
                "submitted" | "processing" => {
                    debug!(status, "KlingAI generation in progress");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                other => {
                    warn!(status = other, "Unknown KlingAI generation status");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Status polls are retried with `(n+1) * 2` second backoff before the
    /// job is failed.
    async fn klingai_poll_with_retry(
        &self,
        status_url: &str,
        token: &str,
    ) -> ProviderResult<(i64, String, serde_json::Value)> {
        #[derive(Deserialize)]
        struct Envelope {
            code: i64,
            #[serde(default)]
            message: String,
            #[serde(default)]
            data: serde_json::Value,
        }

        let mut last_error: Option<ProviderError> = None;
        for attempt in 0..STATUS_POLL_RETRIES {
            let result = async {
                let response = self
                    .http
                    .get(status_url)
                    .bearer_auth(token)
                    .timeout(Duration::from_secs(30))
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(ProviderError::transient(
                        "klingai",
                        format!("status HTTP {}", response.status().as_u16()),
                    ));
                }
                let envelope: Envelope = response.json().await.map_err(|e| {
                    ProviderError::invalid_response("klingai", format!("status decode: {e}"))
                })?;
                Ok((envelope.code, envelope.message, envelope.data))
            }
            .await;

            match result {
                Ok(parsed) => return Ok(parsed),
                Err(e) if e.is_retryable() && attempt + 1 < STATUS_POLL_RETRIES => {
                    let backoff = Duration::from_secs(((attempt + 1) * 2) as u64);
                    warn!(
                        attempt = attempt + 1,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "KlingAI status check failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::transient("klingai", "status polling failed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, dir: &std::path::Path) -> VideoGenClient {
        VideoGenClient::new(
            VideoGenConfig {
                lumaai_api_key: Some("luma-key".to_string()),
                lumaai_base: server.uri(),
                klingai_access_key: Some("access".to_string()),
                klingai_secret_key: Some("secret".to_string()),
                klingai_base: server.uri(),
            },
            dir,
        )
    }

    fn request(provider: VideoProvider) -> VideoRequest<'static> {
        VideoRequest {
            prompt: "ocean waves at sunset",
            image_url: Some("https://cdn.example.com/ref.png"),
            duration_secs: 5,
            aspect_ratio: "9:16",
            resolution: "720p",
            model: "kling-v1",
            negative_prompt: None,
            provider,
        }
    }

    #[test]
    fn test_jwt_claims_shape() {
        let token = klingai_token("access-key", "secret-key").unwrap();
        // Decode the payload segment without verifying the signature.
        let payload = token.split('.').nth(1).unwrap();
        use base64::Engine;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .unwrap();
        let claims: KlingClaims = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(claims.iss, "access-key");
        let now = chrono::Utc::now().timestamp();
        assert!(claims.nbf <= now - 4);
        assert!((claims.exp - now - KLINGAI_TOKEN_TTL_SECS).abs() <= 2);
    }

    #[tokio::test]
    async fn test_klingai_quota_code_surfaces_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/videos/image2video"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 1102,
                "message": "account balance insufficient",
                "request_id": "r1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let client = client(&server, dir.path());
        let err = client
            .generate_klingai(&request(VideoProvider::Klingai))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::QuotaExhausted { .. }));
        assert!(err.halts_fallback());
    }

    #[tokio::test]
    async fn test_klingai_submit_then_succeed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/videos/image2video"))
            .and(body_partial_json(serde_json::json!({
                "model_name": "kling-v1",
                "mode": "pro",
                "duration": "5",
                "image": "https://cdn.example.com/ref.png"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "message": "ok",
                "data": {"task_id": "k-123"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/videos/image2video/k-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "message": "ok",
                "data": {
                    "task_id": "k-123",
                    "task_status": "succeed",
                    "task_result": {"videos": [{"url": "https://cdn.example.com/out.mp4"}]}
                }
            })))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let client = client(&server, dir.path());
        let url = client
            .generate_klingai(&request(VideoProvider::Klingai))
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/out.mp4");
    }

    #[tokio::test]
    async fn test_klingai_text_only_submission_omits_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/videos/image2video"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0, "message": "ok", "data": {"task_id": "k-77"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/videos/image2video/k-77"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "message": "ok",
                "data": {
                    "task_id": "k-77",
                    "task_status": "succeed",
                    "task_result": {"videos": [{"url": "https://cdn.example.com/t.mp4"}]}
                }
            })))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let client = client(&server, dir.path());

        let mut req = request(VideoProvider::Klingai);
        req.image_url = None;
        let url = client.generate_klingai(&req).await.unwrap();
        assert_eq!(url, "https://cdn.example.com/t.mp4");
    }

    #[tokio::test]
    async fn test_lumaai_submit_poll_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "gen-1", "state": "pending"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/generations/gen-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "gen-1",
                "state": "completed",
                "assets": {"video": "https://cdn.example.com/luma.mp4"}
            })))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let client = client(&server, dir.path());
        let url = client
            .generate_lumaai(&request(VideoProvider::Lumaai))
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/luma.mp4");
    }

    #[tokio::test]
    async fn test_lumaai_failure_reason_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "gen-2", "state": "pending"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/generations/gen-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "gen-2",
                "state": "failed",
                "failure_reason": "content policy"
            })))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let client = client(&server, dir.path());
        let err = client
            .generate_lumaai(&request(VideoProvider::Lumaai))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("content policy"));
    }
}
