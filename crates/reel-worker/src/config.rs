//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use reel_models::{EncodingProfile, ImageProvider, VideoProvider};

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1"))
        .unwrap_or(default)
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base path for temp artifacts
    pub temp_dir: PathBuf,
    /// Base path for final outputs
    pub output_dir: PathBuf,
    /// Output frame dimensions
    pub reel_w: u32,
    pub reel_h: u32,
    /// Scene orchestrator concurrency cap
    pub scene_parallel_limit: usize,
    /// Concurrent KlingAI generations, at most
    pub klingai_parallel_limit: usize,
    /// Maximum fill zoom before the blurred-background branch
    pub max_zoom_factor: f64,
    /// Per-scene encoder settings (24 fps fast path)
    pub scene_encoding: EncodingProfile,
    /// Final render encoder settings
    pub final_encoding: EncodingProfile,
    /// Provider defaults when a scene does not name one
    pub default_image_provider: ImageProvider,
    pub default_video_provider: VideoProvider,
    /// Stock API key forwarded on Pexels asset downloads
    pub stock_api_key: Option<String>,
    /// Post-task cache clearing
    pub enable_cache_clearing: bool,
    pub cache_clearing_async: bool,
    /// Memory monitor tuning
    pub enable_memory_monitoring: bool,
    pub memory_warning_threshold_mb: u64,
    pub memory_critical_threshold_mb: u64,
    pub memory_emergency_threshold_mb: u64,
    pub memory_cleanup_cooldown: Duration,
    pub memory_monitor_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            temp_dir: std::env::temp_dir(),
            output_dir: std::env::temp_dir().join("generated_videos"),
            reel_w: 1080,
            reel_h: 1920,
            scene_parallel_limit: cpus.min(4),
            klingai_parallel_limit: 3,
            max_zoom_factor: 2.5,
            scene_encoding: EncodingProfile::scene_default(),
            final_encoding: EncodingProfile::final_default(),
            default_image_provider: ImageProvider::Gemini,
            default_video_provider: VideoProvider::Lumaai,
            stock_api_key: None,
            enable_cache_clearing: true,
            cache_clearing_async: true,
            enable_memory_monitoring: false,
            memory_warning_threshold_mb: 2048,
            memory_critical_threshold_mb: 3072,
            memory_emergency_threshold_mb: 4096,
            memory_cleanup_cooldown: Duration::from_secs(60),
            memory_monitor_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let temp_dir = std::env::var("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.temp_dir);
        let output_dir = std::env::var("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| temp_dir.join("generated_videos"));

        let ffmpeg_threads = env_parse("FFMPEG_THREADS", defaults.scene_encoding.threads);
        let crf: u8 = env_parse("FFMPEG_CRF", 23);
        let bitrate = std::env::var("FFMPEG_BITRATE").unwrap_or_else(|_| "5000k".to_string());

        let scene_encoding = EncodingProfile::scene_default()
            .with_preset(
                std::env::var("SCENE_RENDERING_PRESET").unwrap_or_else(|_| "ultrafast".to_string()),
            )
            .with_crf(crf)
            .with_bitrate(bitrate.clone())
            .with_threads(ffmpeg_threads);
        let final_encoding = EncodingProfile::final_default()
            .with_preset(
                std::env::var("FINAL_VIDEO_PRESET")
                    .or_else(|_| std::env::var("FFMPEG_PRESET"))
                    .unwrap_or_else(|_| "fast".to_string()),
            )
            .with_crf(crf)
            .with_bitrate(bitrate)
            .with_threads(ffmpeg_threads)
            .with_fps(env_parse("FPS", 30));

        Self {
            temp_dir,
            output_dir,
            reel_w: env_parse("REEL_SIZE_W", 1080),
            reel_h: env_parse("REEL_SIZE_H", 1920),
            scene_parallel_limit: env_parse("SCENE_PARALLEL_LIMIT", defaults.scene_parallel_limit)
                .max(1),
            klingai_parallel_limit: 3,
            max_zoom_factor: env_parse("MAX_ZOOM_FACTOR", 2.5),
            scene_encoding,
            final_encoding,
            default_image_provider: std::env::var("DEFAULT_IMAGE_PROVIDER")
                .ok()
                .and_then(|s| ImageProvider::parse(&s))
                .unwrap_or(ImageProvider::Gemini),
            default_video_provider: std::env::var("DEFAULT_VIDEO_PROVIDER")
                .ok()
                .and_then(|s| VideoProvider::parse(&s))
                .unwrap_or(VideoProvider::Lumaai),
            stock_api_key: std::env::var("PEXELS_API_KEY").ok(),
            enable_cache_clearing: env_flag("ENABLE_CACHE_CLEARING", true),
            cache_clearing_async: env_flag("CACHE_CLEARING_ASYNC", true),
            enable_memory_monitoring: env_flag("ENABLE_MEMORY_MONITORING", false),
            memory_warning_threshold_mb: env_parse("MEMORY_WARNING_THRESHOLD_MB", 2048),
            memory_critical_threshold_mb: env_parse("MEMORY_CRITICAL_THRESHOLD_MB", 3072),
            memory_emergency_threshold_mb: env_parse("MEMORY_EMERGENCY_THRESHOLD_MB", 4096),
            memory_cleanup_cooldown: Duration::from_secs(env_parse("MEMORY_CLEANUP_COOLDOWN", 60)),
            memory_monitor_interval: Duration::from_secs(env_parse("MEMORY_MONITOR_INTERVAL", 30)),
        }
    }

    /// Cache directory under the temp root.
    pub fn cache_dir(&self) -> PathBuf {
        self.temp_dir.join("cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.reel_w, 1080);
        assert_eq!(config.reel_h, 1920);
        assert!(config.scene_parallel_limit <= 4);
        assert_eq!(config.klingai_parallel_limit, 3);
        assert_eq!(config.scene_encoding.fps, 24);
        assert!((config.max_zoom_factor - 2.5).abs() < f64::EPSILON);
    }
}
