//! Final composition: transitions, duration bounds, CTA logo, encode.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use reel_media::{clip, compose, download, fs_utils, probe};
use reel_models::{TransitionConfig, TransitionKind, VideoSpec};

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::scene::SceneOutput;

/// The composed final render.
#[derive(Debug)]
pub struct ComposedVideo {
    pub path: PathBuf,
    pub duration: f64,
}

/// Concatenate the ordered scene clips into the final MP4.
///
/// A global narration track, when present, replaces the concatenated audio.
/// The duration is clamped to the reel bounds before the CTA logo pass so
/// the trim never has to cut through a composited overlay.
pub async fn compose_final(
    ctx: &WorkerContext,
    task_id: &str,
    spec: &VideoSpec,
    scenes: &[SceneOutput],
    global_narration: Option<&Path>,
) -> WorkerResult<ComposedVideo> {
    if scenes.is_empty() {
        return Err(WorkerError::compose_failed("no scene clips to compose"));
    }

    fs_utils::ensure_dir(&ctx.config.output_dir).await?;
    let output_filename = format!("{}_{}", task_id, spec.output_filename);
    let final_path = ctx.config.output_dir.join(&output_filename);

    let transition = spec
        .global_transition_config
        .clone()
        .unwrap_or_default();
    let clip_paths: Vec<&Path> = scenes.iter().map(|s| s.path.as_path()).collect();

    // Stage 1: concatenation with transitions.
    let mut current = fs_utils::unique_path(&ctx.config.temp_dir, "composed", ".mp4");
    let mut stage_files: Vec<PathBuf> = Vec::new();
    concat_stage(&clip_paths, &transition, &current, ctx).await?;

    // Stage 2: global narration replaces the audio track.
    if let Some(narration) = global_narration {
        let next = fs_utils::unique_path(&ctx.config.temp_dir, "composed_narrated", ".mp4");
        clip::attach_narration(&current, narration, &next, true)
            .await
            .map_err(|e| WorkerError::compose_failed(e.to_string()))?;
        stage_files.push(std::mem::replace(&mut current, next));
    }

    // Stage 3: duration bounds.
    let duration = probe::get_duration(&current)
        .await
        .map_err(|e| WorkerError::compose_failed(e.to_string()))?;
    match compose::clamp_duration(
        duration,
        compose::MIN_FINAL_DURATION,
        compose::MAX_FINAL_DURATION,
    ) {
        compose::ClampAction::None => {}
        compose::ClampAction::Pad(pad_secs) => {
            warn!(duration, pad_secs, "Final video too short, padding with black");
            let next = fs_utils::unique_path(&ctx.config.temp_dir, "composed_padded", ".mp4");
            compose::pad_with_black(&current, &next, pad_secs, &ctx.config.final_encoding)
                .await
                .map_err(|e| WorkerError::compose_failed(e.to_string()))?;
            stage_files.push(std::mem::replace(&mut current, next));
        }
        compose::ClampAction::Trim(max) => {
            warn!(duration, max, "Final video too long, trimming");
            let next = fs_utils::unique_path(&ctx.config.temp_dir, "composed_trimmed", ".mp4");
            compose::trim_to(&current, &next, max, &ctx.config.final_encoding)
                .await
                .map_err(|e| WorkerError::compose_failed(e.to_string()))?;
            stage_files.push(std::mem::replace(&mut current, next));
        }
    }

    // Stage 4: CTA logo, applied after trimming, never before.
    if let Some(logo) = spec.logo.as_ref().filter(|l| l.cta_screen) {
        match download::download_asset(
            &logo.url,
            &download::DownloadOptions {
                dest_dir: Some(ctx.config.temp_dir.clone()),
                ..Default::default()
            },
        )
        .await
        {
            Ok(logo_image) => {
                let next = fs_utils::unique_path(&ctx.config.temp_dir, "composed_cta", ".mp4");
                match clip::overlay_logo(&current, &logo_image, &next, logo, &ctx.config.final_encoding)
                    .await
                {
                    Ok(()) => {
                        stage_files.push(std::mem::replace(&mut current, next));
                        info!("CTA logo applied to final video");
                    }
                    Err(e) => {
                        warn!(error = %e, "CTA logo overlay failed, continuing without it");
                        fs_utils::cleanup_files([&next]).await;
                    }
                }
                fs_utils::cleanup_files([&logo_image]).await;
            }
            Err(e) => {
                warn!(error = %e, "CTA logo download failed, continuing without it");
            }
        }
    }

    // Stage 5: move into the output directory.
    tokio::fs::rename(&current, &final_path)
        .await
        .map_err(|e| WorkerError::compose_failed(format!("failed to move final render: {e}")))?;
    fs_utils::cleanup_files(&stage_files).await;

    let final_duration = probe::get_duration(&final_path)
        .await
        .map_err(|e| WorkerError::compose_failed(e.to_string()))?;
    info!(
        path = %final_path.display(),
        duration = final_duration,
        "Final video composed"
    );

    Ok(ComposedVideo {
        path: final_path,
        duration: final_duration,
    })
}

async fn concat_stage(
    clip_paths: &[&Path],
    transition: &TransitionConfig,
    output: &Path,
    ctx: &WorkerContext,
) -> WorkerResult<()> {
    if clip_paths.len() > 1 && transition.kind != TransitionKind::None {
        compose::concat_with_transitions(
            clip_paths,
            transition.kind,
            transition.duration_seconds,
            output,
            &ctx.config.final_encoding,
        )
        .await
        .map_err(|e| WorkerError::compose_failed(e.to_string()))
    } else {
        compose::concat_clips(clip_paths, output, &ctx.config.final_encoding)
            .await
            .map_err(|e| WorkerError::compose_failed(e.to_string()))
    }
}
