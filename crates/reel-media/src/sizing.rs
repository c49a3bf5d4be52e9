//! Sizing math for fitting source media into the reel frame.
//!
//! Video fitting has two branches: when the fill scale is within the zoom
//! limit the source is scaled to fill and center-cropped; past the limit it
//! is shrunk and composited over a blurred background so extreme upscales
//! never reach the screen.

use crate::error::{MediaError, MediaResult};

/// Default maximum zoom before switching to the blurred-background branch.
pub const DEFAULT_MAX_ZOOM_FACTOR: f64 = 2.5;

/// Shrink applied to the fit scale in the blurred-background branch.
const BLUR_BRANCH_SHRINK: f64 = 0.7;

/// Minimum foreground dimension in the blurred-background branch.
const MIN_FOREGROUND_DIM: u32 = 200;

/// How to fit a video into the target frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFit {
    /// Scale to fill and center-crop to the exact target size.
    FillCrop { scaled_w: u32, scaled_h: u32 },
    /// Shrink and center over a blurred background.
    BlurredBackground { fg_w: u32, fg_h: u32 },
}

/// How to fit an image into the target frame: scale then pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFit {
    pub scaled_w: u32,
    pub scaled_h: u32,
    pub pad_x: u32,
    pub pad_y: u32,
}

/// Plan the fit of a video source into the target frame.
pub fn plan_video_fit(
    src_w: u32,
    src_h: u32,
    target_w: u32,
    target_h: u32,
    max_zoom_factor: f64,
) -> MediaResult<VideoFit> {
    if src_w == 0 || src_h == 0 {
        return Err(MediaError::invalid_media(format!(
            "invalid video dimensions: {src_w}x{src_h}"
        )));
    }
    if target_w == 0 || target_h == 0 {
        return Err(MediaError::invalid_media(format!(
            "invalid target dimensions: {target_w}x{target_h}"
        )));
    }

    let scale_w = target_w as f64 / src_w as f64;
    let scale_h = target_h as f64 / src_h as f64;
    let fill_scale = scale_w.max(scale_h);

    if fill_scale <= max_zoom_factor {
        let scaled_w = ((src_w as f64 * fill_scale).round() as u32).max(target_w);
        let scaled_h = ((src_h as f64 * fill_scale).round() as u32).max(target_h);
        return Ok(VideoFit::FillCrop { scaled_w, scaled_h });
    }

    let shrink = scale_w.min(scale_h) * BLUR_BRANCH_SHRINK;
    let fg_w = ((src_w as f64 * shrink).round() as u32)
        .clamp(MIN_FOREGROUND_DIM, target_w);
    let fg_h = ((src_h as f64 * shrink).round() as u32)
        .clamp(MIN_FOREGROUND_DIM, target_h);

    Ok(VideoFit::BlurredBackground { fg_w, fg_h })
}

/// Plan the fit of an image into the target frame: fit by height, clamp
/// width, pad the rest.
pub fn plan_image_fit(
    src_w: u32,
    src_h: u32,
    target_w: u32,
    target_h: u32,
) -> MediaResult<ImageFit> {
    if src_w == 0 || src_h == 0 {
        return Err(MediaError::invalid_media(format!(
            "invalid image dimensions: {src_w}x{src_h}"
        )));
    }

    let mut scale = target_h as f64 / src_h as f64;
    let mut scaled_w = (src_w as f64 * scale).round() as u32;
    let mut scaled_h = target_h;

    if scaled_w > target_w {
        scale = target_w as f64 / src_w as f64;
        scaled_w = target_w;
        scaled_h = (src_h as f64 * scale).round() as u32;
    }

    Ok(ImageFit {
        scaled_w,
        scaled_h,
        pad_x: (target_w - scaled_w) / 2,
        pad_y: (target_h - scaled_h) / 2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REEL_W: u32 = 1080;
    const REEL_H: u32 = 1920;

    #[test]
    fn test_landscape_source_fills_and_crops() {
        // 1920x1080 source: fill scale = 1920/1080 ≈ 1.78 <= 2.5
        let fit = plan_video_fit(1920, 1080, REEL_W, REEL_H, DEFAULT_MAX_ZOOM_FACTOR).unwrap();
        match fit {
            VideoFit::FillCrop { scaled_w, scaled_h } => {
                assert!(scaled_w >= REEL_W);
                assert_eq!(scaled_h, REEL_H);
            }
            other => panic!("expected FillCrop, got {other:?}"),
        }
    }

    #[test]
    fn test_tiny_source_takes_blurred_branch() {
        // 320x240 source: fill scale = 1920/240 = 8.0 > 2.5
        let fit = plan_video_fit(320, 240, REEL_W, REEL_H, DEFAULT_MAX_ZOOM_FACTOR).unwrap();
        match fit {
            VideoFit::BlurredBackground { fg_w, fg_h } => {
                assert!(fg_w >= 200 && fg_h >= 200);
                assert!(fg_w <= REEL_W && fg_h <= REEL_H);
            }
            other => panic!("expected BlurredBackground, got {other:?}"),
        }
    }

    #[test]
    fn test_blurred_branch_clamps_minimum() {
        // Extremely small source still yields a visible foreground.
        let fit = plan_video_fit(64, 48, REEL_W, REEL_H, DEFAULT_MAX_ZOOM_FACTOR).unwrap();
        match fit {
            VideoFit::BlurredBackground { fg_w, fg_h } => {
                assert!(fg_w >= 200);
                assert!(fg_h >= 200);
            }
            other => panic!("expected BlurredBackground, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(plan_video_fit(0, 1080, REEL_W, REEL_H, 2.5).is_err());
        assert!(plan_video_fit(1920, 1080, 0, REEL_H, 2.5).is_err());
        assert!(plan_image_fit(0, 0, REEL_W, REEL_H).is_err());
    }

    #[test]
    fn test_portrait_image_fits_by_height() {
        let fit = plan_image_fit(540, 960, REEL_W, REEL_H).unwrap();
        assert_eq!(fit.scaled_h, REEL_H);
        assert_eq!(fit.scaled_w, 1080);
        assert_eq!(fit.pad_x, 0);
    }

    #[test]
    fn test_wide_image_clamps_width() {
        let fit = plan_image_fit(4000, 1000, REEL_W, REEL_H).unwrap();
        assert_eq!(fit.scaled_w, REEL_W);
        assert!(fit.scaled_h < REEL_H);
        assert!(fit.pad_y > 0);
    }
}
