//! AI image editing.
//!
//! Sends the source image plus an edit instruction to the gemini image
//! model and writes the edited result, letterboxed to the reel size.
//! Callers treat any failure as non-fatal and keep the unedited source.

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use tracing::info;

use reel_media::{clip, download, fs_utils};

use crate::error::{ProviderError, ProviderResult};
use crate::image::ImageGenConfig;

/// Image edit client; shares the image-generation configuration.
pub struct ImageEditClient {
    config: ImageGenConfig,
    http: reqwest::Client,
    temp_dir: PathBuf,
}

impl ImageEditClient {
    pub fn new(config: ImageGenConfig, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Edit the image at `source_url` following `edit_prompt`. Returns the
    /// path of a new PNG at the reel size.
    pub async fn edit(&self, source_url: &str, edit_prompt: &str) -> ProviderResult<PathBuf> {
        let api_key = self
            .config
            .gemini_api_key
            .as_ref()
            .ok_or_else(|| ProviderError::missing_credentials("gemini"))?;

        let options = download::DownloadOptions {
            dest_dir: Some(self.temp_dir.clone()),
            ..Default::default()
        };
        let source_path = download::download_asset(source_url, &options).await?;
        let source_bytes = tokio::fs::read(&source_path).await?;
        let source_b64 = base64::engine::general_purpose::STANDARD.encode(&source_bytes);
        fs_utils::cleanup_files([&source_path]).await;

        let instruction = format!(
            "Edit this image according to the following instructions: {edit_prompt}. \
             Maintain the same aspect ratio and composition while applying the requested changes."
        );

        let url = format!(
            "{}/v1beta/models/gemini-2.0-flash-preview-image-generation:generateContent?key={}",
            self.config.gemini_base, api_key
        );
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "contents": [{
                    "parts": [
                        {"text": instruction},
                        {"inlineData": {"mimeType": "image/png", "data": source_b64}}
                    ]
                }],
                "generationConfig": {"responseModalities": ["TEXT", "IMAGE"]}
            }))
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::generation(
                "gemini",
                format!("edit HTTP {}", response.status().as_u16()),
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
            .ok_or_else(|| ProviderError::invalid_response("gemini", "no edited image"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| ProviderError::invalid_response("gemini", e.to_string()))?;

        let raw = fs_utils::unique_path(&self.temp_dir, "edited_raw", ".png");
        tokio::fs::write(&raw, &bytes).await?;
        let output = fs_utils::unique_path(&self.temp_dir, "edited_image", ".png");
        clip::resize_image_file(&raw, &output, self.config.reel_w, self.config.reel_h).await?;
        fs_utils::cleanup_files([&raw]).await;

        info!(path = %output.display(), "Image edited");
        Ok(output)
    }
}
