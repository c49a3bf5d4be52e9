//! Final composition: concatenation, transitions, and duration bounds.

use std::path::Path;

use tracing::{info, warn};

use crate::clip;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters;
use crate::probe;
use reel_models::{EncodingProfile, TransitionKind};

/// Minimum final video duration in seconds.
pub const MIN_FINAL_DURATION: f64 = 3.0;

/// Maximum final video duration in seconds.
pub const MAX_FINAL_DURATION: f64 = 90.0;

const COMPOSE_TIMEOUT_SECS: u64 = 3600;

fn runner() -> FfmpegRunner {
    FfmpegRunner::new().with_timeout(COMPOSE_TIMEOUT_SECS)
}

/// Crossfade offsets for a chain of clips.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    /// `xfade` offset of each interior boundary, in output-stream seconds
    pub offsets: Vec<f64>,
    /// Expected duration of the composed stream
    pub expected_duration: f64,
}

/// Compute the xfade chain offsets for clip durations and a fade length.
/// Offset k is the start of the k-th crossfade in the accumulated stream:
/// `sum(d_0..d_k) - (k+1) * fade`.
pub fn plan_transitions(durations: &[f64], fade: f64) -> TransitionPlan {
    let mut offsets = Vec::new();
    let mut acc = 0.0;
    for (idx, duration) in durations.iter().enumerate() {
        acc += duration;
        if idx + 1 < durations.len() {
            offsets.push(acc - (idx as f64 + 1.0) * fade);
        }
    }
    let overlap = fade * durations.len().saturating_sub(1) as f64;
    TransitionPlan {
        offsets,
        expected_duration: acc - overlap,
    }
}

/// Action required to bring a duration within the final bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClampAction {
    None,
    /// Pad with a black clip of this many seconds
    Pad(f64),
    /// Truncate to this duration
    Trim(f64),
}

/// Decide how to clamp a composed duration into `[min, max]`.
pub fn clamp_duration(duration: f64, min: f64, max: f64) -> ClampAction {
    if duration < min {
        ClampAction::Pad(min - duration)
    } else if duration > max {
        ClampAction::Trim(max)
    } else {
        ClampAction::None
    }
}

/// Straight concatenation of uniform clips (same size, fps, audio layout).
pub async fn concat_clips(
    clips: &[&Path],
    output: &Path,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    if clips.is_empty() {
        return Err(MediaError::invalid_media("no clips to concatenate"));
    }
    if clips.len() == 1 {
        let cmd = FfmpegCommand::new(output)
            .input(clips[0])
            .audio_codec("aac")
            .encoding_profile(profile);
        return runner().run(&cmd).await;
    }

    let mut cmd = FfmpegCommand::new(output);
    for path in clips {
        cmd = cmd.input(path);
    }

    let mut complex = String::new();
    for idx in 0..clips.len() {
        complex.push_str(&format!("[{idx}:v][{idx}:a]"));
    }
    complex.push_str(&format!("concat=n={}:v=1:a=1[v][a]", clips.len()));

    let cmd = cmd
        .filter_complex(complex)
        .map("[v]")
        .map("[a]")
        .audio_codec("aac")
        .encoding_profile(profile);
    runner().run(&cmd).await
}

fn xfade_transition_name(kind: TransitionKind) -> &'static str {
    match kind {
        TransitionKind::Crossfade => "fade",
        TransitionKind::Fade => "fadeblack",
        TransitionKind::None => "fade",
    }
}

/// Concatenate clips applying a fade-in to the first clip, a fade-out to
/// the last, and a crossfade at each interior boundary. Any failure falls
/// back to straight concatenation with a warning.
pub async fn concat_with_transitions(
    clips: &[&Path],
    kind: TransitionKind,
    fade_duration: f64,
    output: &Path,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    if kind == TransitionKind::None || clips.len() < 2 || fade_duration <= 0.0 {
        return concat_clips(clips, output, profile).await;
    }

    match try_concat_with_transitions(clips, kind, fade_duration, output, profile).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(error = %e, "Transition concatenation failed, falling back to straight concat");
            concat_clips(clips, output, profile).await
        }
    }
}

async fn try_concat_with_transitions(
    clips: &[&Path],
    kind: TransitionKind,
    fade_duration: f64,
    output: &Path,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    let mut durations = Vec::with_capacity(clips.len());
    for path in clips {
        durations.push(probe::get_duration(path).await?);
    }
    // A crossfade longer than any participant clip degenerates; bail out to
    // the fallback path.
    if durations.iter().any(|d| *d <= fade_duration) {
        return Err(MediaError::invalid_media(
            "clip shorter than transition duration",
        ));
    }

    let plan = plan_transitions(&durations, fade_duration);
    let transition = xfade_transition_name(kind);
    let last = clips.len() - 1;

    let mut complex = String::new();
    // Edge fades on the first and last clips.
    complex.push_str(&format!(
        "[0:v]{}[v0];",
        filters::fade_in(fade_duration)
    ));
    for idx in 1..last {
        complex.push_str(&format!("[{idx}:v]null[v{idx}];"));
    }
    complex.push_str(&format!(
        "[{last}:v]{}[v{last}];",
        filters::fade_out(durations[last], fade_duration)
    ));

    // Video crossfade chain.
    let mut prev = "v0".to_string();
    for (idx, offset) in plan.offsets.iter().enumerate() {
        let next_input = idx + 1;
        let label = format!("vx{next_input}");
        complex.push_str(&format!(
            "[{prev}][v{next_input}]xfade=transition={transition}:duration={fade_duration:.3}:offset={offset:.3}[{label}];"
        ));
        prev = label;
    }
    let video_out = prev;

    // Audio crossfade chain.
    let mut aprev = "0:a".to_string();
    for idx in 1..clips.len() {
        let label = format!("ax{idx}");
        complex.push_str(&format!(
            "[{aprev}][{idx}:a]acrossfade=d={fade_duration:.3}[{label}];"
        ));
        aprev = label;
    }
    // Trim the trailing semicolon.
    complex.pop();

    let mut cmd = FfmpegCommand::new(output);
    for path in clips {
        cmd = cmd.input(path);
    }
    let cmd = cmd
        .filter_complex(complex)
        .map(format!("[{video_out}]"))
        .map(format!("[{aprev}]"))
        .audio_codec("aac")
        .encoding_profile(profile);

    info!(
        clips = clips.len(),
        transition = transition,
        fade_duration,
        expected_duration = plan.expected_duration,
        "Concatenating with transitions"
    );
    runner().run(&cmd).await
}

/// Append a black clip of `pad_secs` (with silent audio) to the video.
pub async fn pad_with_black(
    input: &Path,
    output: &Path,
    pad_secs: f64,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(output)
        .input(input)
        .video_filter(format!(
            "tpad=stop_mode=add:stop_duration={pad_secs:.3}:color=black"
        ))
        .audio_filter(format!("apad=pad_dur={pad_secs:.3}"))
        .audio_codec("aac")
        .encoding_profile(profile);
    runner().run(&cmd).await
}

/// Truncate the video to `duration` seconds.
pub async fn trim_to(
    input: &Path,
    output: &Path,
    duration: f64,
    profile: &EncodingProfile,
) -> MediaResult<()> {
    clip::trim_video(input, output, duration, profile).await
}
