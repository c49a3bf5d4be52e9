//! Provider tags and fallback orders.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Image generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageProvider {
    Openai,
    Freepik,
    Gemini,
}

impl ImageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageProvider::Openai => "openai",
            ImageProvider::Freepik => "freepik",
            ImageProvider::Gemini => "gemini",
        }
    }

    /// Ordered attempt list: the requested provider first, then the fixed
    /// fallbacks for that primary.
    pub fn attempt_order(&self) -> [ImageProvider; 3] {
        match self {
            ImageProvider::Gemini => [
                ImageProvider::Gemini,
                ImageProvider::Openai,
                ImageProvider::Freepik,
            ],
            ImageProvider::Openai => [
                ImageProvider::Openai,
                ImageProvider::Gemini,
                ImageProvider::Freepik,
            ],
            ImageProvider::Freepik => [
                ImageProvider::Freepik,
                ImageProvider::Openai,
                ImageProvider::Gemini,
            ],
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Some(ImageProvider::Openai),
            "freepik" => Some(ImageProvider::Freepik),
            "gemini" => Some(ImageProvider::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for ImageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoProvider {
    Lumaai,
    Klingai,
}

impl VideoProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoProvider::Lumaai => "lumaai",
            VideoProvider::Klingai => "klingai",
        }
    }

    /// Provider-specific default model.
    pub fn default_model(&self) -> &'static str {
        match self {
            VideoProvider::Lumaai => "ray-2",
            VideoProvider::Klingai => "kling-v1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lumaai" => Some(VideoProvider::Lumaai),
            "klingai" => Some(VideoProvider::Klingai),
            _ => None,
        }
    }
}

impl fmt::Display for VideoProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_order_starts_with_primary() {
        for provider in [
            ImageProvider::Openai,
            ImageProvider::Freepik,
            ImageProvider::Gemini,
        ] {
            let order = provider.attempt_order();
            assert_eq!(order[0], provider);
            // All three providers appear exactly once.
            assert_ne!(order[1], order[0]);
            assert_ne!(order[2], order[0]);
            assert_ne!(order[2], order[1]);
        }
    }

    #[test]
    fn test_serde_lowercase() {
        let p: ImageProvider = serde_json::from_str("\"freepik\"").unwrap();
        assert_eq!(p, ImageProvider::Freepik);
        let v: VideoProvider = serde_json::from_str("\"klingai\"").unwrap();
        assert_eq!(v, VideoProvider::Klingai);
    }

    #[test]
    fn test_default_models() {
        assert_eq!(VideoProvider::Lumaai.default_model(), "ray-2");
        assert_eq!(VideoProvider::Klingai.default_model(), "kling-v1");
    }
}
