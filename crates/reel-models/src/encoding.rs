//! Encoder settings for scene and final renders.

use serde::{Deserialize, Serialize};

/// H.264 encoding profile handed to FFmpeg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingProfile {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
    pub bitrate: String,
    pub threads: usize,
    pub fps: u32,
}

impl EncodingProfile {
    /// Fast profile for per-scene intermediates (24 fps).
    pub fn scene_default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "ultrafast".to_string(),
            crf: 23,
            bitrate: "5000k".to_string(),
            threads: default_threads(),
            fps: 24,
        }
    }

    /// Quality/speed balance for the final render.
    pub fn final_default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 23,
            bitrate: "5000k".to_string(),
            threads: default_threads(),
            fps: 30,
        }
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = bitrate.into();
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        let scene = EncodingProfile::scene_default();
        assert_eq!(scene.fps, 24);
        assert_eq!(scene.preset, "ultrafast");

        let fin = EncodingProfile::final_default();
        assert_eq!(fin.fps, 30);
        assert_eq!(fin.preset, "fast");
    }

    #[test]
    fn test_builder() {
        let p = EncodingProfile::scene_default()
            .with_preset("medium")
            .with_crf(18)
            .with_threads(0);
        assert_eq!(p.preset, "medium");
        assert_eq!(p.crf, 18);
        assert_eq!(p.threads, 1);
    }
}
