//! FFmpeg CLI wrapper and media helpers for the ReelGen worker.
//!
//! This crate provides:
//! - Remote asset fetching with per-content-type timeouts and retry
//! - An FFmpeg command builder/runner and ffprobe wrapper
//! - Pure sizing math (fill/crop vs blurred-background decisions)
//! - Filter-graph builders for animation, overlays, and subtitles
//! - Clip operations and final composition with transitions

pub mod clip;
pub mod command;
pub mod compose;
pub mod download;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod probe;
pub mod sizing;
pub mod subtitles;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use download::{download_asset, DownloadOptions};
pub use error::{MediaError, MediaResult};
pub use probe::{get_audio_duration, get_duration, probe_media, MediaInfo};
pub use sizing::{plan_image_fit, plan_video_fit, ImageFit, VideoFit};
pub use subtitles::WordTiming;
