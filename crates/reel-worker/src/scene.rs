//! Per-scene rendering pipeline.
//!
//! One scene in, one MP4 at the reel size out. Step order: narration,
//! primary media, sizing, animation, audio binding, subtitles, text
//! overlay, logo, encode. Narration/media/sizing failures are fatal for
//! the scene; subtitle, text, and logo failures degrade with a warning.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use reel_media::{clip, download, fs_utils, probe, subtitles};
use reel_models::{
    AnimationModes, ImageProvider, LogoConfig, Scene, SceneKind, SubtitleConfig, VideoProvider,
};
use reel_providers::{ImageRequest, VideoRequest};

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};

/// Task-level inputs shared by every scene job.
#[derive(Debug, Clone)]
pub struct GlobalSceneContext {
    pub task_id: String,
    /// A global narration track overrides per-scene narration entirely
    pub use_global_narration: bool,
    pub audio_prompt_url: Option<String>,
    pub global_subtitle: Option<SubtitleConfig>,
    pub global_logo: Option<LogoConfig>,
    pub product_images: Vec<String>,
    pub total_scenes: usize,
    /// Digest of the whole-payload context, mixed into generation cache
    /// keys to separate identical prompts across different videos
    pub video_context_digest: String,
}

/// One scene plus its position in the composition.
#[derive(Debug, Clone)]
pub struct SceneJob {
    pub index: usize,
    pub scene: Scene,
    pub global: Arc<GlobalSceneContext>,
}

impl SceneJob {
    pub fn scene_id(&self) -> String {
        self.scene.resolved_id(self.index)
    }
}

/// A rendered scene clip plus the ancillary files to clean up later.
#[derive(Debug)]
pub struct SceneOutput {
    pub index: usize,
    pub path: PathBuf,
    pub temp_files: Vec<PathBuf>,
}

/// Tracks the working file through the pipeline stages.
struct StageFiles {
    dir: PathBuf,
    current: PathBuf,
    temp_files: Vec<PathBuf>,
}

impl StageFiles {
    fn start(dir: PathBuf, first: PathBuf) -> Self {
        Self {
            dir,
            current: first,
            temp_files: Vec::new(),
        }
    }

    fn next_path(&self, stage: &str) -> PathBuf {
        fs_utils::unique_path(&self.dir, stage, ".mp4")
    }

    /// Replace the working file; the previous one becomes a temp file.
    fn advance(&mut self, next: PathBuf) {
        let previous = std::mem::replace(&mut self.current, next);
        self.temp_files.push(previous);
    }
}

/// Render a single scene to an MP4 at the reel size.
pub async fn render_scene(ctx: &WorkerContext, job: &SceneJob) -> WorkerResult<SceneOutput> {
    let scene = &job.scene;
    let scene_id = job.scene_id();
    let task_id = &job.global.task_id;
    info!(task_id = %task_id, scene_id = %scene_id, kind = scene.kind.as_str(), "Rendering scene");

    let mut temp_files: Vec<PathBuf> = Vec::new();

    // ---- Step 1: narration -------------------------------------------------
    let narration_path = resolve_narration(ctx, job, &mut temp_files)
        .await
        .map_err(|e| WorkerError::scene_failed(&scene_id, e.to_string()))?;
    let narration_duration = match &narration_path {
        Some(path) => Some(
            probe::get_audio_duration(path)
                .await
                .map_err(|e| WorkerError::scene_failed(&scene_id, e.to_string()))?,
        ),
        None => None,
    };

    // ---- Steps 2-5: media, sizing, animation, audio ------------------------
    let mut stages = match scene.kind {
        SceneKind::Image => {
            render_image_scene(ctx, job, &scene_id, narration_path.as_deref(), narration_duration)
                .await?
        }
        SceneKind::Video => {
            render_video_scene(ctx, job, &scene_id, narration_path.as_deref(), narration_duration)
                .await?
        }
    };
    temp_files.append(&mut stages.temp_files);

    // ---- Step 6: subtitles (degrades) --------------------------------------
    if scene.subtitle {
        if let Some(narration) = &narration_path {
            apply_subtitles(ctx, job, &scene_id, narration, &mut stages).await;
        }
        // subtitle=true with no narration is a no-op
    }

    // ---- Step 7: text overlay (degrades) -----------------------------------
    if let Some(text) = &scene.text {
        let next = stages.next_path("scene_text");
        match clip::draw_text_overlay(&stages.current, &next, text, &ctx.config.scene_encoding)
            .await
        {
            Ok(()) => stages.advance(next),
            Err(e) => {
                warn!(scene_id = %scene_id, error = %e, "Text overlay failed, continuing without it");
                fs_utils::cleanup_files([&next]).await;
            }
        }
    }

    // ---- Step 8: logo (degrades) -------------------------------------------
    let effective_logo = scene.logo.clone().or_else(|| {
        job.global
            .global_logo
            .clone()
            .filter(|logo| logo.show_in_all_scenes)
    });
    if let Some(logo) = effective_logo {
        apply_logo(ctx, &scene_id, &logo, &mut stages).await;
    }

    // ---- Step 9: finalize ---------------------------------------------------
    let output = fs_utils::unique_path(&ctx.config.temp_dir, "scene", ".mp4");
    tokio::fs::rename(&stages.current, &output)
        .await
        .map_err(|e| WorkerError::scene_failed(&scene_id, format!("finalize failed: {e}")))?;
    temp_files.append(&mut stages.temp_files);

    info!(task_id = %task_id, scene_id = %scene_id, path = %output.display(), "Scene rendered");
    Ok(SceneOutput {
        index: job.index,
        path: output,
        temp_files,
    })
}

/// Narration priority: scene asset > synthesized text > none. Global
/// narration mode disables per-scene narration entirely.
async fn resolve_narration(
    ctx: &WorkerContext,
    job: &SceneJob,
    temp_files: &mut Vec<PathBuf>,
) -> WorkerResult<Option<PathBuf>> {
    if job.global.use_global_narration {
        return Ok(None);
    }
    let scene = &job.scene;

    if let Some(url) = &scene.narration {
        let path = download::download_asset(url, &download_options(ctx)).await?;
        temp_files.push(path.clone());
        return Ok(Some(path));
    }

    if let Some(text) = &scene.narration_text {
        let audio_prompt = scene
            .audio_prompt_url
            .as_deref()
            .or(job.global.audio_prompt_url.as_deref());
        // Cache-pinned artifact; not added to temp files.
        let path = ctx.narration.generate(text, audio_prompt, &ctx.cache).await?;
        return Ok(Some(path));
    }

    Ok(None)
}

fn download_options(ctx: &WorkerContext) -> download::DownloadOptions {
    download::DownloadOptions {
        dest_dir: Some(ctx.config.temp_dir.clone()),
        stock_api_key: ctx.config.stock_api_key.clone(),
        max_attempts: None,
    }
}

/// Steps 2-5 for an image scene.
async fn render_image_scene(
    ctx: &WorkerContext,
    job: &SceneJob,
    scene_id: &str,
    narration: Option<&std::path::Path>,
    narration_duration: Option<f64>,
) -> WorkerResult<StageFiles> {
    let scene = &job.scene;
    let mut temp_files: Vec<PathBuf> = Vec::new();

    // Step 2: primary media.
    let mut image_path = if let Some(url) = &scene.image_url {
        let path = download::download_asset(url, &download_options(ctx))
            .await
            .map_err(|e| WorkerError::scene_failed(scene_id, e.to_string()))?;
        temp_files.push(path.clone());
        path
    } else if let Some(prompt) = &scene.prompt_image {
        generate_scene_image(ctx, job, prompt).await?
    } else {
        return Err(WorkerError::scene_failed(
            scene_id,
            "image scene requires image_url or prompt_image",
        ));
    };

    // AI edit of an existing image is best-effort.
    if let (Some(edit_prompt), Some(source_url)) = (&scene.prompt_edit_image, &scene.image_url) {
        match ctx.image_edit.edit(source_url, edit_prompt).await {
            Ok(edited) => {
                temp_files.push(edited.clone());
                image_path = edited;
            }
            Err(e) => {
                warn!(scene_id = %scene_id, error = %e, "Image editing failed, using original image");
            }
        }
    }

    // Narration duration replaces the scene duration for exact sync.
    let duration = narration_duration
        .or(scene.duration.map(f64::from))
        .unwrap_or(10.0);

    // Step 4: animation selection; invalid requests fall back to random.
    let modes = match AnimationModes::from_scene(scene) {
        Some(modes) => modes,
        None => {
            if scene.animation_mode.is_some() || scene.animation_preset.is_some() {
                warn!(scene_id = %scene_id, "Invalid animation mode, using random animation");
            }
            clip::random_animation()
        }
    };

    let base = fs_utils::unique_path(&ctx.config.temp_dir, "scene_image", ".mp4");
    clip::render_image_clip(
        &image_path,
        &base,
        duration,
        ctx.config.reel_w,
        ctx.config.reel_h,
        modes,
        scene.animation_darken_factor,
        scene.animation_drift_px,
        scene.animation_osc_px,
        &ctx.config.scene_encoding,
    )
    .await
    .map_err(|e| WorkerError::scene_failed(scene_id, e.to_string()))?;

    let mut stages = StageFiles::start(ctx.config.temp_dir.clone(), base);
    stages.temp_files.append(&mut temp_files);

    // Step 5: the image clip's duration already equals the narration's, so
    // binding is an exact mux.
    if let Some(narration) = narration {
        let next = stages.next_path("scene_audio");
        clip::attach_narration(&stages.current, narration, &next, false)
            .await
            .map_err(|e| WorkerError::scene_failed(scene_id, e.to_string()))?;
        stages.advance(next);
    }

    Ok(stages)
}

/// Steps 2-5 for a video scene.
async fn render_video_scene(
    ctx: &WorkerContext,
    job: &SceneJob,
    scene_id: &str,
    narration: Option<&std::path::Path>,
    narration_duration: Option<f64>,
) -> WorkerResult<StageFiles> {
    let scene = &job.scene;
    let mut temp_files: Vec<PathBuf> = Vec::new();

    // Step 2: primary media.
    let video_path = if let Some(prompt) = &scene.prompt_video {
        generate_scene_video(ctx, job, scene_id, prompt).await?
    } else if let Some(url) = &scene.video_url {
        let path = download::download_asset(url, &download_options(ctx))
            .await
            .map_err(|e| WorkerError::scene_failed(scene_id, e.to_string()))?;
        temp_files.push(path.clone());
        path
    } else {
        return Err(WorkerError::scene_failed(
            scene_id,
            "video scene requires video_url or prompt_video",
        ));
    };

    // Step 3: sizing into the reel frame.
    let fitted = fs_utils::unique_path(&ctx.config.temp_dir, "scene_fitted", ".mp4");
    clip::fit_video(
        &video_path,
        &fitted,
        ctx.config.reel_w,
        ctx.config.reel_h,
        ctx.config.max_zoom_factor,
        &ctx.config.scene_encoding,
    )
    .await
    .map_err(|e| WorkerError::scene_failed(scene_id, e.to_string()))?;

    let mut stages = StageFiles::start(ctx.config.temp_dir.clone(), fitted);
    stages.temp_files.append(&mut temp_files);

    // Narration duration drives loop-extension or trimming of the video;
    // without narration the scene duration is authoritative.
    let base_duration = probe::get_duration(&stages.current)
        .await
        .map_err(|e| WorkerError::scene_failed(scene_id, e.to_string()))?;
    let target_duration = narration_duration.or(scene.duration.map(f64::from));

    if let Some(target) = target_duration {
        if target > base_duration + 0.05 {
            info!(
                scene_id = %scene_id,
                target,
                base_duration,
                "Target longer than video, loop-extending"
            );
            let next = stages.next_path("scene_looped");
            clip::loop_video_to_duration(&stages.current, &next, target, &ctx.config.scene_encoding)
                .await
                .map_err(|e| WorkerError::scene_failed(scene_id, e.to_string()))?;
            stages.advance(next);
        } else if target < base_duration - 0.05 {
            info!(
                scene_id = %scene_id,
                target,
                base_duration,
                "Target shorter than video, trimming"
            );
            let next = stages.next_path("scene_trimmed");
            clip::trim_video(&stages.current, &next, target, &ctx.config.scene_encoding)
                .await
                .map_err(|e| WorkerError::scene_failed(scene_id, e.to_string()))?;
            stages.advance(next);
        }
    }

    // Step 5: bind narration, silence-padded to the video length to absorb
    // trim rounding.
    if let Some(narration) = narration {
        let next = stages.next_path("scene_audio");
        clip::attach_narration(&stages.current, narration, &next, true)
            .await
            .map_err(|e| WorkerError::scene_failed(scene_id, e.to_string()))?;
        stages.advance(next);
    }

    Ok(stages)
}

/// Generate the primary image for an image scene. E-commerce payloads force
/// the provider capable of reference-image conditioning.
async fn generate_scene_image(
    ctx: &WorkerContext,
    job: &SceneJob,
    prompt: &str,
) -> WorkerResult<PathBuf> {
    let scene = &job.scene;
    let is_ecommerce = !job.global.product_images.is_empty();

    let mut provider = scene
        .image_provider
        .unwrap_or(ctx.config.default_image_provider);
    if is_ecommerce && provider != ImageProvider::Openai {
        warn!(
            requested = %provider,
            "Reference-image conditioning requires openai, overriding provider"
        );
        provider = ImageProvider::Openai;
    }

    let request = ImageRequest {
        prompt,
        provider,
        scene_context: Some(format!(
            "scene_{}_{}",
            job.index, job.global.total_scenes
        )),
        video_context: Some(job.global.video_context_digest.clone()),
        product_images: &job.global.product_images,
    };
    let path = ctx.image_gen.generate(&request, &ctx.cache).await?;
    Ok(path)
}

/// Generate the primary video for a video scene, including the e-commerce
/// reference-image flow for KlingAI.
async fn generate_scene_video(
    ctx: &WorkerContext,
    job: &SceneJob,
    scene_id: &str,
    prompt: &str,
) -> WorkerResult<PathBuf> {
    let scene = &job.scene;
    let provider = scene
        .video_provider
        .unwrap_or(ctx.config.default_video_provider);

    // KlingAI conditions on an image. When the scene also carries an image
    // prompt, synthesize the reference first and upload it so the provider
    // can fetch it by URL; an upload failure degrades to text-only.
    let mut reference_url: Option<String> = None;
    if provider == VideoProvider::Klingai {
        if let Some(image_prompt) = &scene.prompt_image {
            let reference = generate_scene_image(ctx, job, image_prompt).await?;
            match ctx
                .storage
                .upload_reference_image(&reference, &job.global.task_id)
                .await
            {
                Ok(url) => {
                    info!(scene_id = %scene_id, url = %url, "Reference image uploaded");
                    reference_url = Some(url);
                }
                Err(e) => {
                    warn!(
                        scene_id = %scene_id,
                        error = %e,
                        "Reference image upload failed, proceeding text-only"
                    );
                }
            }
        }
    }

    let duration_secs = scene
        .video_duration
        .as_deref()
        .and_then(parse_duration_secs)
        .unwrap_or(5);
    let request = VideoRequest {
        prompt,
        image_url: reference_url.as_deref(),
        duration_secs,
        aspect_ratio: scene.video_aspect_ratio.as_deref().unwrap_or("9:16"),
        resolution: scene.video_resolution.as_deref().unwrap_or("720p"),
        model: scene
            .video_model
            .as_deref()
            .unwrap_or_else(|| provider.default_model()),
        negative_prompt: None,
        provider,
    };

    let path = ctx.video_gen.generate(&request, &ctx.cache).await?;
    Ok(path)
}

/// Parse "5s" / "10" style durations.
fn parse_duration_secs(value: &str) -> Option<u32> {
    value.trim().trim_end_matches('s').parse().ok()
}

/// Step 6: transcribe the narration and burn timed captions. Failures
/// leave the scene without subtitles.
async fn apply_subtitles(
    ctx: &WorkerContext,
    job: &SceneJob,
    scene_id: &str,
    narration: &std::path::Path,
    stages: &mut StageFiles,
) {
    let words = match ctx.transcription.transcribe_words(narration).await {
        Ok(words) if !words.is_empty() => words,
        Ok(_) => {
            warn!(scene_id = %scene_id, "Transcription returned no words, skipping subtitles");
            return;
        }
        Err(e) => {
            warn!(scene_id = %scene_id, error = %e, "Transcription failed, skipping subtitles");
            return;
        }
    };

    let config = SubtitleConfig::resolve(
        job.scene.subtitle_config.as_ref(),
        job.global.global_subtitle.as_ref(),
    );

    let ass_path = fs_utils::unique_path(&ctx.config.temp_dir, "subtitles", ".ass");
    if let Err(e) = subtitles::write_ass_file(
        &ass_path,
        &words,
        &config,
        ctx.config.reel_w,
        ctx.config.reel_h,
    )
    .await
    {
        warn!(scene_id = %scene_id, error = %e, "Subtitle file synthesis failed");
        return;
    }

    let next = stages.next_path("scene_subtitled");
    match clip::burn_subtitles(&stages.current, &ass_path, &next, &ctx.config.scene_encoding).await
    {
        Ok(()) => {
            stages.advance(next);
            stages.temp_files.push(ass_path);
            info!(scene_id = %scene_id, "Subtitles burned");
        }
        Err(e) => {
            warn!(scene_id = %scene_id, error = %e, "Subtitle burn failed, continuing without subtitles");
            fs_utils::cleanup_files([&next, &ass_path]).await;
        }
    }
}

/// Step 8: fetch and overlay the logo. Failures leave the scene without it.
async fn apply_logo(
    ctx: &WorkerContext,
    scene_id: &str,
    logo: &LogoConfig,
    stages: &mut StageFiles,
) {
    let logo_image = match download::download_asset(&logo.url, &download_options(ctx)).await {
        Ok(path) => path,
        Err(e) => {
            warn!(scene_id = %scene_id, error = %e, "Logo download failed, continuing without logo");
            return;
        }
    };

    let next = stages.next_path("scene_logo");
    match clip::overlay_logo(
        &stages.current,
        &logo_image,
        &next,
        logo,
        &ctx.config.scene_encoding,
    )
    .await
    {
        Ok(()) => {
            stages.advance(next);
            stages.temp_files.push(logo_image);
        }
        Err(e) => {
            warn!(scene_id = %scene_id, error = %e, "Logo overlay failed, continuing without logo");
            fs_utils::cleanup_files([&next, &logo_image]).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_secs() {
        assert_eq!(parse_duration_secs("5s"), Some(5));
        assert_eq!(parse_duration_secs("10"), Some(10));
        assert_eq!(parse_duration_secs("abc"), None);
    }
}
