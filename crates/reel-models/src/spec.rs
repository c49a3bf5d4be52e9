//! Video specification payload: scenes and global decorations.
//!
//! The payload shape mirrors what the coordinator accepts from clients.
//! Legacy field names (`image_prompt`, `video_prompt`, `transition_type`,
//! `transition_duration`) are accepted as aliases on deserialization.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::{ImageProvider, VideoProvider};

/// Structured video specification: ordered scenes plus global decorations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSpec {
    /// Ordered scenes; composition order equals this order
    pub scenes: Vec<Scene>,

    /// Global narration; overrides per-scene narration and splits the
    /// measured duration uniformly across scenes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_text: Option<String>,

    /// Fallback voice-cloning reference for synthesized narration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_prompt_url: Option<String>,

    /// Global logo configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<LogoConfig>,

    /// Global subtitle configuration, layered under per-scene configs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_subtitle_config: Option<SubtitleConfig>,

    /// Global transition configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_transition_config: Option<TransitionConfig>,

    /// Basename of the final output file
    pub output_filename: String,

    /// Reference product images; a non-empty list marks e-commerce mode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub product_images: Vec<String>,

    /// Echoed into the task result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_description: Option<String>,
}

impl VideoSpec {
    /// E-commerce mode forces sequential scene processing and
    /// reference-image conditioning.
    pub fn is_ecommerce(&self) -> bool {
        !self.product_images.is_empty()
    }

    /// Whether the payload uses a single global narration track.
    pub fn uses_global_narration(&self) -> bool {
        self.narration_text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }

    /// Validate the payload before rendering.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.scenes.is_empty() {
            return Err(SpecError::NoScenes);
        }
        if self.output_filename.trim().is_empty() {
            return Err(SpecError::MissingOutputFilename);
        }
        for (idx, scene) in self.scenes.iter().enumerate() {
            scene.validate(idx)?;
        }
        Ok(())
    }
}

/// Payload validation errors. These are fatal for the task; no retry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("payload has no scenes")]
    NoScenes,
    #[error("payload has no output_filename")]
    MissingOutputFilename,
    #[error("scene {index}: image scene requires image_url or prompt_image")]
    ImageSourceMissing { index: usize },
    #[error("scene {index}: video scene requires video_url or prompt_video")]
    VideoSourceMissing { index: usize },
}

/// Scene kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneKind {
    Image,
    Video,
}

impl SceneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneKind::Image => "image",
            SceneKind::Video => "video",
        }
    }
}

/// The smallest independently renderable unit; always produces exactly one
/// intermediate MP4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    /// Identifier for tracking; synthesized when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<String>,

    #[serde(rename = "type")]
    pub kind: SceneKind,

    // ---- image sources ----
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, alias = "image_prompt", skip_serializing_if = "Option::is_none")]
    pub prompt_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_edit_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_provider: Option<ImageProvider>,

    // ---- video sources ----
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, alias = "video_prompt", skip_serializing_if = "Option::is_none")]
    pub prompt_video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_provider: Option<VideoProvider>,
    /// Generation resolution, e.g. "720p"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_resolution: Option<String>,
    /// Generation aspect ratio, e.g. "9:16"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_aspect_ratio: Option<String>,
    /// Generation duration, e.g. "5s"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_duration: Option<String>,
    /// Provider-specific model name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_model: Option<String>,

    // ---- narration ----
    /// URL of a pre-recorded narration asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
    /// Text to synthesize into narration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_text: Option<String>,
    /// Per-scene voice-cloning reference; overrides the global one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_prompt_url: Option<String>,

    /// Scene duration in seconds; narration duration takes precedence for
    /// image scenes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,

    // ---- decorations ----
    #[serde(default)]
    pub subtitle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_config: Option<SubtitleConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<LogoConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextOverlay>,

    // ---- animation (image scenes) ----
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_mode: Option<ModeInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_darken_factor: Option<f32>,
    #[serde(default = "default_drift_px")]
    pub animation_drift_px: u32,
    #[serde(default = "default_osc_px")]
    pub animation_osc_px: u32,

    // ---- transition overrides ----
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_type: Option<TransitionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_duration: Option<f64>,
}

fn default_drift_px() -> u32 {
    60
}

fn default_osc_px() -> u32 {
    40
}

/// Animation mode input: a single mode name or a list of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModeInput {
    One(String),
    Many(Vec<String>),
}

impl ModeInput {
    pub fn names(&self) -> Vec<&str> {
        match self {
            ModeInput::One(s) => vec![s.as_str()],
            ModeInput::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

impl Scene {
    /// Validate source selectors for the scene kind.
    pub fn validate(&self, index: usize) -> Result<(), SpecError> {
        match self.kind {
            SceneKind::Image => {
                if self.image_url.is_none() && self.prompt_image.is_none() {
                    return Err(SpecError::ImageSourceMissing { index });
                }
            }
            SceneKind::Video => {
                if self.video_url.is_none() && self.prompt_video.is_none() {
                    return Err(SpecError::VideoSourceMissing { index });
                }
            }
        }
        Ok(())
    }

    /// Whether this scene submits a KlingAI generation job.
    pub fn uses_klingai(&self) -> bool {
        self.prompt_video.is_some() && self.video_provider == Some(VideoProvider::Klingai)
    }

    /// Identifier used in logs and subtitle/asset names. Uses the provided
    /// `scene_id` when present, otherwise `{type}_{index+1}_{slug}`.
    pub fn resolved_id(&self, index: usize) -> String {
        if let Some(id) = &self.scene_id {
            if !id.is_empty() {
                return id.clone();
            }
        }
        let content = self
            .prompt_image
            .as_deref()
            .or(self.prompt_video.as_deref())
            .map(|p| slug_of(&p.chars().take(30).collect::<String>()))
            .or_else(|| {
                self.image_url
                    .as_deref()
                    .or(self.video_url.as_deref())
                    .map(basename_stem)
            })
            .or_else(|| {
                self.narration_text
                    .as_deref()
                    .map(|t| slug_of(&t.chars().take(20).collect::<String>()))
            })
            .unwrap_or_default();

        if content.is_empty() {
            format!("{}_{}", self.kind.as_str(), index + 1)
        } else {
            format!("{}_{}_{}", self.kind.as_str(), index + 1, content)
        }
    }
}

fn slug_of(text: &str) -> String {
    text.to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

fn basename_stem(url: &str) -> String {
    let base = url.rsplit('/').next().unwrap_or(url);
    let stem = base.split('.').next().unwrap_or(base);
    slug_of(stem)
}

/// Logo overlay position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogoPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

/// Logo overlay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoConfig {
    pub url: String,
    #[serde(default)]
    pub position: LogoPosition,
    #[serde(default = "default_logo_opacity")]
    pub opacity: f32,
    /// Explicit size in pixels; auto-scaled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<(u32, u32)>,
    #[serde(default = "default_logo_margin")]
    pub margin: u32,
    #[serde(default = "default_true")]
    pub show_in_all_scenes: bool,
    /// Apply on the final composition pass
    #[serde(default = "default_true")]
    pub cta_screen: bool,
}

fn default_logo_opacity() -> f32 {
    0.6
}

fn default_logo_margin() -> u32 {
    20
}

fn default_true() -> bool {
    true
}

/// Vertical subtitle placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtitlePosition {
    Top,
    #[default]
    Middle,
    Bottom,
}

/// Subtitle rendering configuration.
///
/// Resolution order at render time: per-scene -> global -> these defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    pub font: String,
    pub font_size: u32,
    pub font_color: String,
    pub stroke_color: String,
    pub stroke_width: u32,
    pub highlight_current_word: bool,
    pub word_highlight_color: String,
    pub line_count: u32,
    pub position: SubtitlePosition,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            font: "Bangers-Regular.ttf".to_string(),
            font_size: 110,
            font_color: "white".to_string(),
            stroke_color: "black".to_string(),
            stroke_width: 4,
            highlight_current_word: true,
            word_highlight_color: "yellow".to_string(),
            line_count: 2,
            position: SubtitlePosition::Middle,
        }
    }
}

impl SubtitleConfig {
    /// Layer a per-scene config over a global one.
    pub fn resolve(scene: Option<&SubtitleConfig>, global: Option<&SubtitleConfig>) -> Self {
        scene
            .or(global)
            .cloned()
            .unwrap_or_default()
    }
}

/// Transition kind between scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    #[default]
    Crossfade,
    Fade,
    None,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Crossfade => "crossfade",
            TransitionKind::Fade => "fade",
            TransitionKind::None => "none",
        }
    }
}

/// Global or per-scene transition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionConfig {
    #[serde(rename = "type", alias = "transition_type", default)]
    pub kind: TransitionKind,
    #[serde(
        alias = "transition_duration",
        default = "default_transition_duration"
    )]
    pub duration_seconds: f64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            kind: TransitionKind::Crossfade,
            duration_seconds: default_transition_duration(),
        }
    }
}

fn default_transition_duration() -> f64 {
    1.0
}

/// Text overlay position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TextPosition {
    Top,
    TopLeft,
    TopRight,
    #[default]
    Center,
    Bottom,
    BottomLeft,
    BottomRight,
}

/// Static text overlay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextOverlay {
    pub content: String,
    #[serde(default)]
    pub position: TextPosition,
    #[serde(alias = "fontsize", default = "default_text_font_size")]
    pub font_size: u32,
    #[serde(default = "default_text_color")]
    pub color: String,
    #[serde(default = "default_text_stroke_color")]
    pub stroke_color: String,
    #[serde(default = "default_text_stroke_width")]
    pub stroke_width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    #[serde(default = "default_text_padding")]
    pub padding: u32,
    #[serde(default = "default_text_opacity")]
    pub opacity: f32,
    /// Named preset; overrides the explicit styling fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
}

fn default_text_font_size() -> u32 {
    36
}

fn default_text_color() -> String {
    "white".to_string()
}

fn default_text_stroke_color() -> String {
    "black".to_string()
}

fn default_text_stroke_width() -> u32 {
    2
}

fn default_text_padding() -> u32 {
    20
}

fn default_text_opacity() -> f32 {
    1.0
}

impl TextOverlay {
    /// Resolve a preset name into a concrete style, leaving the content and
    /// position untouched for unknown presets.
    pub fn apply_preset(&mut self) {
        let Some(preset) = self.preset.as_deref() else {
            return;
        };
        match preset {
            "title" => {
                self.position = TextPosition::Top;
                self.font_size = 72;
                self.stroke_width = 3;
            }
            "subtitle" => {
                self.position = TextPosition::Bottom;
                self.font_size = 48;
            }
            "caption" => {
                self.position = TextPosition::Bottom;
                self.font_size = 36;
            }
            "callout" => {
                self.position = TextPosition::Center;
                self.font_size = 56;
                self.stroke_width = 3;
            }
            "watermark" => {
                self.position = TextPosition::BottomRight;
                self.font_size = 28;
                self.opacity = 0.6;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> VideoSpec {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_minimal_payload() {
        let spec = parse(serde_json::json!({
            "scenes": [{"type": "image", "image_url": "https://e.com/x.png", "duration": 5}],
            "output_filename": "reel.mp4"
        }));
        assert!(spec.validate().is_ok());
        assert!(!spec.is_ecommerce());
        assert!(!spec.uses_global_narration());
    }

    #[test]
    fn test_legacy_field_aliases() {
        let spec = parse(serde_json::json!({
            "scenes": [
                {"type": "image", "image_prompt": "a sunset", "duration": 5},
                {"type": "video", "video_prompt": "waves", "video_provider": "lumaai", "duration": 5}
            ],
            "output_filename": "reel.mp4",
            "global_transition_config": {"transition_type": "fade", "transition_duration": 0.5}
        }));
        assert_eq!(spec.scenes[0].prompt_image.as_deref(), Some("a sunset"));
        assert_eq!(spec.scenes[1].prompt_video.as_deref(), Some("waves"));
        let t = spec.global_transition_config.unwrap();
        assert_eq!(t.kind, TransitionKind::Fade);
        assert!((t.duration_seconds - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_image_scene_requires_source() {
        let spec = parse(serde_json::json!({
            "scenes": [{"type": "image", "duration": 5}],
            "output_filename": "reel.mp4"
        }));
        assert_eq!(
            spec.validate(),
            Err(SpecError::ImageSourceMissing { index: 0 })
        );
    }

    #[test]
    fn test_scene_id_synthesis() {
        let spec = parse(serde_json::json!({
            "scenes": [
                {"type": "image", "prompt_image": "A Cozy Cabin in the Woods!", "duration": 4},
                {"type": "video", "video_url": "https://cdn.example.com/clips/ocean-waves.mp4", "duration": 6}
            ],
            "output_filename": "reel.mp4"
        }));
        assert_eq!(spec.scenes[0].resolved_id(0), "image_1_a_cozy_cabin_in_the_woods");
        assert_eq!(spec.scenes[1].resolved_id(1), "video_2_ocean-waves");
    }

    #[test]
    fn test_provided_scene_id_wins() {
        let spec = parse(serde_json::json!({
            "scenes": [{"type": "image", "scene_id": "intro", "image_url": "https://e.com/x.png", "duration": 5}],
            "output_filename": "reel.mp4"
        }));
        assert_eq!(spec.scenes[0].resolved_id(0), "intro");
    }

    #[test]
    fn test_ecommerce_detection() {
        let spec = parse(serde_json::json!({
            "scenes": [{"type": "image", "prompt_image": "product shot", "duration": 5}],
            "output_filename": "reel.mp4",
            "product_images": ["https://e.com/p1.png"]
        }));
        assert!(spec.is_ecommerce());
    }

    #[test]
    fn test_klingai_detection() {
        let spec = parse(serde_json::json!({
            "scenes": [
                {"type": "video", "prompt_video": "a", "video_provider": "klingai", "duration": 5},
                {"type": "video", "video_url": "https://e.com/v.mp4", "video_provider": "klingai", "duration": 5}
            ],
            "output_filename": "reel.mp4"
        }));
        assert!(spec.scenes[0].uses_klingai());
        // A klingai tag without prompt_video never submits a generation.
        assert!(!spec.scenes[1].uses_klingai());
    }

    #[test]
    fn test_subtitle_config_resolution() {
        let global = SubtitleConfig {
            font_size: 80,
            ..Default::default()
        };
        let scene = SubtitleConfig {
            font_size: 60,
            ..Default::default()
        };

        assert_eq!(SubtitleConfig::resolve(Some(&scene), Some(&global)).font_size, 60);
        assert_eq!(SubtitleConfig::resolve(None, Some(&global)).font_size, 80);
        assert_eq!(SubtitleConfig::resolve(None, None).font_size, 110);
    }

    #[test]
    fn test_text_overlay_presets() {
        let mut overlay: TextOverlay = serde_json::from_value(serde_json::json!({
            "content": "Big News", "preset": "title"
        }))
        .unwrap();
        overlay.apply_preset();
        assert_eq!(overlay.position, TextPosition::Top);
        assert_eq!(overlay.font_size, 72);
    }

    #[test]
    fn test_logo_defaults() {
        let logo: LogoConfig =
            serde_json::from_value(serde_json::json!({"url": "https://e.com/logo.png"})).unwrap();
        assert_eq!(logo.position, LogoPosition::BottomRight);
        assert_eq!(logo.margin, 20);
        assert!(logo.show_in_all_scenes);
        assert!(logo.cta_screen);
    }
}
