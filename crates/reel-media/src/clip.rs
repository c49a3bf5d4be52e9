//! High-level clip operations built on the FFmpeg command layer.
//!
//! Each operation spawns one encoder run. Every produced clip carries an
//! audio track (silent when no narration is bound) so downstream
//! concatenation can always map audio streams uniformly.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters;
use crate::fs_utils;
use crate::probe;
use crate::sizing::{self, VideoFit};
use reel_models::{AnimationModes, EncodingProfile, LogoConfig, MotionMode, TextOverlay, ZoomMode};

/// Default encoder wall-clock budget per clip operation.
const CLIP_ENCODE_TIMEOUT_SECS: u64 = 1800;

fn runner() -> FfmpegRunner {
    FfmpegRunner::new().with_timeout(CLIP_ENCODE_TIMEOUT_SECS)
}

/// Pick a random animation: a zoom, optionally paired with a motion.
/// `(None, None)` is never returned.
pub fn random_animation() -> AnimationModes {
    let mut rng = rand::thread_rng();
    let zoom = *[
        Some(ZoomMode::ZoomIn),
        Some(ZoomMode::ZoomOut),
        Some(ZoomMode::Pulse),
        None,
    ]
    .choose(&mut rng)
    .unwrap();
    let motion = *[
        Some(MotionMode::DriftUp),
        Some(MotionMode::DriftDown),
        Some(MotionMode::Oscillate),
        None,
    ]
    .choose(&mut rng)
    .unwrap();

    if zoom.is_none() && motion.is_none() {
        let zoom = *ZoomMode::ALL.choose(&mut rng).unwrap();
        return AnimationModes {
            zoom: Some(zoom),
            motion: None,
        };
    }
    AnimationModes { zoom, motion }
}

/// Render an animated image clip of the given duration at the target size,
/// with a silent audio track.
#[allow(clippy::too_many_arguments)]
pub async fn render_image_clip(
    image: &Path,
    output: &Path,
    duration: f64,
    target_w: u32,
    target_h: u32,
    modes: AnimationModes,
    darken_factor: Option<f32>,
    drift_px: u32,
    osc_px: u32,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    let mut vf = vec![filters::letterbox(target_w, target_h)];
    vf.push(filters::zoompan(
        modes.zoom,
        modes.motion,
        duration,
        profile.fps,
        target_w,
        target_h,
        drift_px,
        osc_px,
    ));
    if let Some(factor) = darken_factor {
        if factor > 0.0 && factor < 1.0 {
            vf.push(filters::darken(factor));
        }
    }

    let cmd = FfmpegCommand::new(output)
        .input_with_args(["-loop", "1"], image.to_string_lossy())
        .lavfi_input("anullsrc=r=44100:cl=stereo")
        .map("0:v")
        .map("1:a")
        .video_filter(vf.join(","))
        .audio_codec("aac")
        .encoding_profile(profile)
        .duration(duration);

    runner().run(&cmd).await
}

/// Fit a video into the target frame, taking the blurred-background branch
/// for extreme upscales. A compositing failure falls back to a plain
/// letterbox resize.
pub async fn fit_video(
    input: &Path,
    output: &Path,
    target_w: u32,
    target_h: u32,
    max_zoom_factor: f64,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    let info = probe::probe_media(input).await?;
    let fit = sizing::plan_video_fit(info.width, info.height, target_w, target_h, max_zoom_factor)?;

    match fit {
        VideoFit::FillCrop { .. } => {
            let cmd = base_video_command(input, output, &info, profile)
                .video_filter(filters::fill_crop(target_w, target_h));
            runner().run(&cmd).await
        }
        VideoFit::BlurredBackground { fg_w, fg_h } => {
            match fit_with_blurred_background(
                input, output, &info, fg_w, fg_h, target_w, target_h, profile,
            )
            .await
            {
                Ok(()) => Ok(()),
                Err(e) => {
                    warn!(error = %e, "Blurred-background compositing failed, falling back to plain resize");
                    let cmd = base_video_command(input, output, &info, profile)
                        .video_filter(filters::letterbox(target_w, target_h));
                    runner().run(&cmd).await
                }
            }
        }
    }
}

/// Base command for a fitted video. Sources without audio get a silent
/// track so every scene clip has a uniform stream layout for concat.
fn base_video_command(
    input: &Path,
    output: &Path,
    info: &probe::MediaInfo,
    profile: &EncodingProfile,
) -> FfmpegCommand {
    let cmd = FfmpegCommand::new(output).input(input);
    if info.has_audio {
        cmd.map("0:v").map("0:a").audio_codec("aac").encoding_profile(profile)
    } else {
        cmd.lavfi_input("anullsrc=r=44100:cl=stereo")
            .map("0:v")
            .map("1:a")
            .output_arg("-shortest")
            .audio_codec("aac")
            .encoding_profile(profile)
    }
}

#[allow(clippy::too_many_arguments)]
async fn fit_with_blurred_background(
    input: &Path,
    output: &Path,
    info: &probe::MediaInfo,
    fg_w: u32,
    fg_h: u32,
    target_w: u32,
    target_h: u32,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    // The background is a blurred still taken from the middle of the clip.
    let frame = fs_utils::unique_path(
        output.parent().unwrap_or_else(|| Path::new(".")),
        "bg_frame",
        ".png",
    );
    extract_frame(input, &frame, info.duration / 2.0).await?;

    let complex = filters::blurred_background_complex(
        fg_w,
        fg_h,
        target_w,
        target_h,
        20,
        0.3,
    );

    let mut cmd = FfmpegCommand::new(output)
        .input(input)
        .input_with_args(["-loop", "1"], frame.to_string_lossy())
        .filter_complex(complex)
        .map("[out]");
    if info.has_audio {
        cmd = cmd.map("0:a").audio_codec("aac");
    } else {
        cmd = cmd
            .lavfi_input("anullsrc=r=44100:cl=stereo")
            .map("2:a")
            .output_arg("-shortest")
            .audio_codec("aac");
    }
    let cmd = cmd.encoding_profile(profile);

    let result = runner().run(&cmd).await;
    fs_utils::cleanup_files([&frame]).await;
    result
}

/// Extract a single frame at the given timestamp.
pub async fn extract_frame(input: &Path, output: &Path, at_secs: f64) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(output)
        .input_with_args(["-ss".to_string(), format!("{:.3}", at_secs.max(0.0))], input.to_string_lossy())
        .single_frame();
    runner().run(&cmd).await
}

/// Loop-extend a video to cover `target_duration`, trimming to the exact
/// length.
pub async fn loop_video_to_duration(
    input: &Path,
    output: &Path,
    target_duration: f64,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    let info = probe::probe_media(input).await?;
    if info.duration <= 0.0 {
        return Err(MediaError::invalid_media("cannot loop a zero-length video"));
    }
    let loops_needed = (target_duration / info.duration).ceil() as u32;
    debug!(loops_needed, target_duration, "Loop-extending video");

    let cmd = FfmpegCommand::new(output)
        .input_with_args(
            ["-stream_loop".to_string(), loops_needed.saturating_sub(1).to_string()],
            input.to_string_lossy(),
        )
        .duration(target_duration)
        .audio_codec("aac")
        .encoding_profile(profile);
    runner().run(&cmd).await
}

/// Trim a video to the given duration (re-encode cut).
pub async fn trim_video(
    input: &Path,
    output: &Path,
    duration: f64,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(output)
        .input(input)
        .duration(duration)
        .audio_codec("aac")
        .encoding_profile(profile);
    runner().run(&cmd).await
}

/// Attach a narration track to a video.
///
/// With `pad_to_video` the narration is silence-padded (or cut) to the
/// video length; otherwise the output ends with the shorter stream, which
/// for image clips sized to the narration gives exact sync.
pub async fn attach_narration(
    video: &Path,
    narration: &Path,
    output: &Path,
    pad_to_video: bool,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(output).input(video).input(narration);
    let cmd = if pad_to_video {
        let video_duration = probe::get_duration(video).await?;
        cmd.map("0:v")
            .map("1:a")
            .audio_filter("apad")
            .duration(video_duration)
            .video_codec("copy")
            .audio_codec("aac")
    } else {
        cmd.map("0:v")
            .map("1:a")
            .output_arg("-shortest")
            .video_codec("copy")
            .audio_codec("aac")
    };
    runner().run(&cmd).await
}

/// Overlay a logo image over a video. The logo is auto-scaled to at most
/// 20% of the smaller video dimension unless an explicit size is given.
pub async fn overlay_logo(
    video: &Path,
    logo_image: &Path,
    output: &Path,
    config: &LogoConfig,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    let info = probe::probe_media(video).await?;
    let (logo_w, logo_h) = match config.size {
        Some((w, h)) => (w, h),
        None => {
            let max_dim = (info.width.min(info.height) as f32 * 0.20) as u32;
            let logo_info = probe::probe_media(logo_image).await;
            match logo_info {
                Ok(li) if li.width > 0 && li.height > 0 => {
                    let scale =
                        (max_dim as f32 / li.width as f32).min(max_dim as f32 / li.height as f32);
                    let scale = scale.min(1.0);
                    (
                        ((li.width as f32 * scale) as u32).max(1),
                        ((li.height as f32 * scale) as u32).max(1),
                    )
                }
                _ => (max_dim, max_dim),
            }
        }
    };

    info!(logo_w, logo_h, position = ?config.position, "Overlaying logo");

    let complex = filters::logo_overlay_complex(
        logo_w,
        logo_h,
        config.position,
        config.margin,
        config.opacity,
    );

    let mut cmd = FfmpegCommand::new(output)
        .input(video)
        .input(logo_image)
        .filter_complex(complex)
        .map("[out]");
    if info.has_audio {
        cmd = cmd.map("0:a").audio_codec("copy");
    }
    let cmd = cmd.encoding_profile(profile);
    runner().run(&cmd).await
}

/// Draw a static text overlay on a video.
pub async fn draw_text_overlay(
    video: &Path,
    output: &Path,
    overlay: &TextOverlay,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    let mut overlay = overlay.clone();
    overlay.apply_preset();

    let filter = filters::drawtext(
        &overlay.content,
        overlay.position,
        overlay.font_size,
        &overlay.color,
        &overlay.stroke_color,
        overlay.stroke_width,
        overlay.font.as_deref(),
        overlay.padding,
        overlay.opacity,
    );

    let info = probe::probe_media(video).await?;
    let mut cmd = FfmpegCommand::new(output).input(video).video_filter(filter);
    if info.has_audio {
        cmd = cmd.audio_codec("copy");
    }
    let cmd = cmd.encoding_profile(profile);
    runner().run(&cmd).await
}

/// Burn an ASS subtitle file into a video.
pub async fn burn_subtitles(
    video: &Path,
    ass_file: &Path,
    output: &Path,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    let info = probe::probe_media(video).await?;
    let mut cmd = FfmpegCommand::new(output)
        .input(video)
        .video_filter(filters::ass_burn(&ass_file.to_string_lossy()));
    if info.has_audio {
        cmd = cmd.audio_codec("copy");
    }
    let cmd = cmd.encoding_profile(profile);
    runner().run(&cmd).await
}

/// Letterbox-resize a still image file to the target size (PNG out).
pub async fn resize_image_file(
    input: &Path,
    output: &Path,
    target_w: u32,
    target_h: u32,
) -> MediaResult<PathBuf> {
    let cmd = FfmpegCommand::new(output)
        .input(input)
        .video_filter(filters::letterbox(target_w, target_h))
        .single_frame();
    runner().run(&cmd).await?;
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_animation_never_empty() {
        for _ in 0..50 {
            let modes = random_animation();
            assert!(modes.zoom.is_some() || modes.motion.is_some());
        }
    }
}
