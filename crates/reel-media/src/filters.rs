//! FFmpeg filter-graph builders.
//!
//! Every visual operation of the renderer is expressed as a filter string:
//! letterboxing, fill-crop, blurred backgrounds, zoom/motion animation,
//! darkening, text overlays, subtitle burn-in, logo overlays, and fades.

use reel_models::{LogoPosition, MotionMode, TextPosition, ZoomMode};

/// Scale into the frame preserving aspect, pad the rest with black.
pub fn letterbox(target_w: u32, target_h: u32) -> String {
    format!(
        "scale={tw}:{th}:force_original_aspect_ratio=decrease,pad={tw}:{th}:(ow-iw)/2:(oh-ih)/2:color=black",
        tw = target_w,
        th = target_h
    )
}

/// Scale to fill the frame, then center-crop to the exact target size.
pub fn fill_crop(target_w: u32, target_h: u32) -> String {
    format!(
        "scale={tw}:{th}:force_original_aspect_ratio=increase,crop={tw}:{th}",
        tw = target_w,
        th = target_h
    )
}

/// Filter complex compositing a shrunk foreground video over a blurred
/// still background. Input 0 is the source video, input 1 the mid-frame
/// still (looped by the caller).
pub fn blurred_background_complex(
    fg_w: u32,
    fg_h: u32,
    target_w: u32,
    target_h: u32,
    blur_radius: u32,
    background_opacity: f32,
) -> String {
    format!(
        "[1:v]{fill},gblur=sigma={blur},format=rgba,colorchannelmixer=aa={op:.2}[bgim];\
         color=black:s={tw}x{th}[base];\
         [base][bgim]overlay=shortest=1[canvas];\
         [0:v]scale={fw}:{fh}[fg];\
         [canvas][fg]overlay=(W-w)/2:(H-h)/2:shortest=1[out]",
        fill = fill_crop(target_w, target_h),
        blur = blur_radius,
        op = background_opacity,
        tw = target_w,
        th = target_h,
        fw = fg_w,
        fh = fg_h,
    )
}

/// Zoom expression over `total_frames` for the zoompan filter.
fn zoom_expr(mode: Option<ZoomMode>, total_frames: u32) -> String {
    match mode {
        Some(ZoomMode::ZoomIn) => format!("1.0+0.30*on/{total_frames}"),
        Some(ZoomMode::ZoomOut) => format!("1.20-0.20*on/{total_frames}"),
        Some(ZoomMode::Pulse) => format!("1.10+0.05*sin(2*PI*on/{total_frames})"),
        None => "1.0".to_string(),
    }
}

/// Vertical pan expression for the zoompan filter. Drift is clamped to 15%
/// of the frame height so the subject never leaves the frame.
fn pan_y_expr(mode: Option<MotionMode>, total_frames: u32, frame_h: u32, drift_px: u32, osc_px: u32) -> String {
    let center = "ih/2-(ih/zoom/2)";
    let max_drift = (drift_px as f64).min(frame_h as f64 * 0.15);
    match mode {
        Some(MotionMode::DriftUp) => {
            format!("{center}+{max_drift:.0}*on/{total_frames}")
        }
        Some(MotionMode::DriftDown) => {
            format!("{center}-{max_drift:.0}*on/{total_frames}")
        }
        Some(MotionMode::Oscillate) => {
            format!("{center}+{osc_px}*sin(2*PI*on/{total_frames})")
        }
        None => center.to_string(),
    }
}

/// Animated zoom/pan for an image clip.
pub fn zoompan(
    zoom: Option<ZoomMode>,
    motion: Option<MotionMode>,
    duration_secs: f64,
    fps: u32,
    target_w: u32,
    target_h: u32,
    drift_px: u32,
    osc_px: u32,
) -> String {
    let total_frames = ((duration_secs * fps as f64).ceil() as u32).max(1);
    format!(
        "zoompan=z='{z}':x='iw/2-(iw/zoom/2)':y='{y}':d={d}:s={tw}x{th}:fps={fps}",
        z = zoom_expr(zoom, total_frames),
        y = pan_y_expr(motion, total_frames, target_h, drift_px, osc_px),
        d = total_frames,
        tw = target_w,
        th = target_h,
    )
}

/// Multiplicative darkening (`factor` in (0, 1)).
pub fn darken(factor: f32) -> String {
    format!("colorchannelmixer=rr={factor:.2}:gg={factor:.2}:bb={factor:.2}")
}

/// Escape a value embedded in a drawtext filter.
pub fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace(':', "\\:")
        .replace('%', "\\%")
}

/// Escape a file path embedded in a filter argument.
pub fn escape_filter_path(path: &str) -> String {
    path.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace(':', "\\:")
}

/// drawtext x/y expressions for a text position with padding.
pub fn drawtext_position(position: TextPosition, padding: u32) -> (String, String) {
    let pad = padding.to_string();
    match position {
        TextPosition::Top => ("(w-text_w)/2".into(), pad),
        TextPosition::TopLeft => (pad.clone(), pad),
        TextPosition::TopRight => (format!("w-text_w-{pad}"), pad),
        TextPosition::Center => ("(w-text_w)/2".into(), "(h-text_h)/2".into()),
        TextPosition::Bottom => ("(w-text_w)/2".into(), format!("h-text_h-{pad}")),
        TextPosition::BottomLeft => (pad.clone(), format!("h-text_h-{pad}")),
        TextPosition::BottomRight => (format!("w-text_w-{pad}"), format!("h-text_h-{pad}")),
    }
}

/// Static text overlay via drawtext.
#[allow(clippy::too_many_arguments)]
pub fn drawtext(
    content: &str,
    position: TextPosition,
    font_size: u32,
    color: &str,
    stroke_color: &str,
    stroke_width: u32,
    font_file: Option<&str>,
    padding: u32,
    opacity: f32,
) -> String {
    let (x, y) = drawtext_position(position, padding);
    let mut filter = format!(
        "drawtext=text='{}':x={x}:y={y}:fontsize={font_size}:fontcolor={color}@{opacity:.2}",
        escape_drawtext(content)
    );
    if stroke_width > 0 {
        filter.push_str(&format!(
            ":borderw={stroke_width}:bordercolor={stroke_color}"
        ));
    }
    if let Some(font) = font_file {
        filter.push_str(&format!(":fontfile='{}'", escape_filter_path(font)));
    }
    filter
}

/// Burn an ASS subtitle file into the video.
pub fn ass_burn(ass_path: &str) -> String {
    format!("ass='{}'", escape_filter_path(ass_path))
}

/// Logo overlay x/y expressions for a position with margin.
pub fn logo_overlay_position(position: LogoPosition, margin: u32) -> (String, String) {
    let m = margin.to_string();
    match position {
        LogoPosition::TopLeft => (m.clone(), m),
        LogoPosition::TopRight => (format!("W-w-{m}"), m),
        LogoPosition::BottomLeft => (m.clone(), format!("H-h-{m}")),
        LogoPosition::BottomRight => (format!("W-w-{m}"), format!("H-h-{m}")),
        LogoPosition::Center => ("(W-w)/2".into(), "(H-h)/2".into()),
    }
}

/// Filter complex overlaying a logo (input 1) over the video (input 0).
pub fn logo_overlay_complex(
    logo_w: u32,
    logo_h: u32,
    position: LogoPosition,
    margin: u32,
    opacity: f32,
) -> String {
    let (x, y) = logo_overlay_position(position, margin);
    if opacity < 1.0 {
        format!(
            "[1:v]scale={logo_w}:{logo_h},format=rgba,colorchannelmixer=aa={opacity:.2}[logo];\
             [0:v][logo]overlay={x}:{y}:format=auto[out]"
        )
    } else {
        format!(
            "[1:v]scale={logo_w}:{logo_h}[logo];[0:v][logo]overlay={x}:{y}:format=auto[out]"
        )
    }
}

/// Video fade-in from black.
pub fn fade_in(duration: f64) -> String {
    format!("fade=t=in:st=0:d={duration:.3}")
}

/// Video fade-out to black at the end of a clip of the given length.
pub fn fade_out(clip_duration: f64, fade_duration: f64) -> String {
    format!(
        "fade=t=out:st={:.3}:d={:.3}",
        (clip_duration - fade_duration).max(0.0),
        fade_duration
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_and_fill_crop() {
        let lb = letterbox(1080, 1920);
        assert!(lb.contains("force_original_aspect_ratio=decrease"));
        assert!(lb.contains("pad=1080:1920"));

        let fc = fill_crop(1080, 1920);
        assert!(fc.contains("force_original_aspect_ratio=increase"));
        assert!(fc.contains("crop=1080:1920"));
    }

    #[test]
    fn test_zoompan_curves() {
        let f = zoompan(Some(ZoomMode::ZoomIn), None, 5.0, 24, 1080, 1920, 60, 40);
        assert!(f.contains("1.0+0.30*on/120"));
        assert!(f.contains("s=1080x1920"));

        let f = zoompan(Some(ZoomMode::Pulse), Some(MotionMode::Oscillate), 5.0, 24, 1080, 1920, 60, 40);
        assert!(f.contains("1.10+0.05*sin"));
        assert!(f.contains("40*sin"));
    }

    #[test]
    fn test_drift_clamped_to_frame_fraction() {
        // drift_px 600 exceeds 15% of 1920 (288): the clamp must win.
        let f = zoompan(None, Some(MotionMode::DriftUp), 4.0, 24, 1080, 1920, 600, 40);
        assert!(f.contains("+288*on"));
    }

    #[test]
    fn test_drawtext_escaping_and_position() {
        let f = drawtext(
            "It's 100%: done",
            TextPosition::Bottom,
            36,
            "white",
            "black",
            2,
            None,
            20,
            1.0,
        );
        assert!(f.contains("\\'"));
        assert!(f.contains("\\%"));
        assert!(f.contains("h-text_h-20"));
        assert!(f.contains("borderw=2"));
    }

    #[test]
    fn test_logo_positions() {
        let (x, y) = logo_overlay_position(LogoPosition::BottomRight, 20);
        assert_eq!(x, "W-w-20");
        assert_eq!(y, "H-h-20");

        let (x, y) = logo_overlay_position(LogoPosition::Center, 20);
        assert_eq!(x, "(W-w)/2");
        assert_eq!(y, "(H-h)/2");
    }

    #[test]
    fn test_logo_opacity_path() {
        let with = logo_overlay_complex(200, 100, LogoPosition::TopLeft, 10, 0.6);
        assert!(with.contains("colorchannelmixer=aa=0.60"));

        let without = logo_overlay_complex(200, 100, LogoPosition::TopLeft, 10, 1.0);
        assert!(!without.contains("colorchannelmixer"));
    }

    #[test]
    fn test_blurred_background_complex() {
        let f = blurred_background_complex(756, 1344, 1080, 1920, 20, 0.3);
        assert!(f.contains("gblur=sigma=20"));
        assert!(f.contains("colorchannelmixer=aa=0.30"));
        assert!(f.contains("scale=756:1344"));
        assert!(f.contains("color=black:s=1080x1920"));
    }

    #[test]
    fn test_fades() {
        assert_eq!(fade_in(1.0), "fade=t=in:st=0:d=1.000");
        assert_eq!(fade_out(10.0, 1.0), "fade=t=out:st=9.000:d=1.000");
        // Short clips never get a negative start.
        assert_eq!(fade_out(0.5, 1.0), "fade=t=out:st=0.000:d=1.000");
    }
}
