//! Task lifecycle controller.
//!
//! Drives one task through `queued -> in_progress -> finished | failed`,
//! guaranteeing exactly one terminal status write and one attempted credit
//! reconciliation on every exit path: success, error, or signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use reel_cache::ArtifactCache;
use reel_media::fs_utils;
use reel_models::{Task, TaskId, TaskResult, TaskState};
use reel_store::{StatusUpdate, StoreClient};

use crate::composer;
use crate::context::WorkerContext;
use crate::credits;
use crate::error::{truncate_error, WorkerError, WorkerResult};
use crate::memory;
use crate::orchestrator::{run_scenes, OrchestratorLimits};
use crate::scene::{self, GlobalSceneContext, SceneJob};
use crate::signals;

/// Stored task errors are truncated to keep the record readable.
const MAX_STORED_ERROR_CHARS: usize = 500;

/// How a controller run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Task rendered, published, and debited
    Completed,
    /// Task was already finished; nothing was re-run
    AlreadyFinished,
}

/// One-task lifecycle controller.
pub struct TaskController {
    ctx: Arc<WorkerContext>,
}

impl TaskController {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    /// Process the task end to end.
    pub async fn run(&self, task_id: &TaskId) -> WorkerResult<TaskOutcome> {
        let task = self
            .ctx
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| WorkerError::TaskNotFound(task_id.to_string()))?;

        // Re-invoking a finished task is a no-op: no second upload, no
        // second debit.
        if task.status == TaskState::Finished {
            info!(task_id = %task_id, "Task already finished");
            return Ok(TaskOutcome::AlreadyFinished);
        }

        self.ctx
            .store
            .update_task_status(task_id, &StatusUpdate::to(TaskState::InProgress))
            .await?;
        info!(task_id = %task_id, "Task moved to in_progress");

        // The terminal guard makes the status write exclusive between the
        // main path and the signal watcher.
        let terminal_written = Arc::new(AtomicBool::new(false));
        let signal_watcher = spawn_signal_watcher(
            self.ctx.clone(),
            task.clone(),
            terminal_written.clone(),
        );
        let memory_monitor = memory::spawn(self.ctx.config.clone(), self.ctx.cache.clone());

        let result = self.execute(&task).await;

        signal_watcher.abort();
        if let Some(handle) = memory_monitor {
            handle.abort();
        }

        match result {
            Ok(task_result) => {
                // The reconciler may have timed the task out while we were
                // rendering; a terminal state in the store wins over us.
                if let Ok(Some(current)) = self.ctx.store.get_task(task_id).await {
                    if current.status == TaskState::Failed {
                        warn!(task_id = %task_id, "Task was failed externally while rendering");
                        self.clear_cache_on_completion().await;
                        return Err(WorkerError::External(
                            current
                                .error
                                .unwrap_or_else(|| "task failed externally".to_string()),
                        ));
                    }
                }

                if claim_terminal(&terminal_written) {
                    self.ctx
                        .store
                        .update_task_status(
                            task_id,
                            &StatusUpdate::to(TaskState::Finished).with_result(task_result),
                        )
                        .await?;
                    info!(task_id = %task_id, "Task finished");

                    // Debit only after the successful terminal write.
                    credits::settle_debit(&self.ctx.store, &task).await;
                    self.clear_cache_on_completion().await;
                }
                Ok(TaskOutcome::Completed)
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Task processing failed");
                if claim_terminal(&terminal_written) {
                    let update = StatusUpdate::to(TaskState::Failed)
                        .with_error(truncate_error(&e.to_string(), MAX_STORED_ERROR_CHARS));
                    if let Err(write_error) =
                        self.ctx.store.update_task_status(task_id, &update).await
                    {
                        error!(
                            task_id = %task_id,
                            error = %write_error,
                            "Failed to mark task as failed; the reconciler will pick it up"
                        );
                    }
                    credits::settle_refund(&self.ctx.store, &task).await;
                    self.clear_cache_on_completion().await;
                }
                Err(e)
            }
        }
    }

    /// Render, compose, and publish. Returns the task result on success.
    async fn execute(&self, task: &Task) -> WorkerResult<TaskResult> {
        let spec = &task.request;
        spec.validate()?;

        // Global narration: synthesized once, its measured duration split
        // uniformly across scenes.
        let mut per_scene_duration: Option<u32> = None;
        let mut global_narration = None;
        if spec.uses_global_narration() {
            let text = spec.narration_text.as_deref().unwrap_or_default();
            let narration = self
                .ctx
                .narration
                .generate(text, spec.audio_prompt_url.as_deref(), &self.ctx.cache)
                .await?;
            let duration = reel_media::get_audio_duration(&narration).await?;
            per_scene_duration =
                Some(((duration / spec.scenes.len() as f64).round() as u32).max(1));
            info!(
                narration_duration = duration,
                per_scene_duration = per_scene_duration.unwrap(),
                "Global narration generated, splitting duration across scenes"
            );
            global_narration = Some(narration);
        }

        let global = Arc::new(GlobalSceneContext {
            task_id: task.id.to_string(),
            use_global_narration: spec.uses_global_narration(),
            audio_prompt_url: spec.audio_prompt_url.clone(),
            global_subtitle: spec.global_subtitle_config.clone(),
            global_logo: spec.logo.clone(),
            product_images: spec.product_images.clone(),
            total_scenes: spec.scenes.len(),
            video_context_digest: video_context_digest(spec),
        });

        let jobs: Vec<SceneJob> = spec
            .scenes
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, mut scene)| {
                if let Some(duration) = per_scene_duration {
                    scene.duration = Some(duration);
                }
                SceneJob {
                    index,
                    scene,
                    global: global.clone(),
                }
            })
            .collect();

        let limits = OrchestratorLimits::new(
            self.ctx.config.scene_parallel_limit,
            self.ctx.config.klingai_parallel_limit,
            spec.is_ecommerce(),
        );
        if spec.is_ecommerce() {
            info!(
                product_images = spec.product_images.len(),
                "E-commerce payload, scenes render sequentially"
            );
        }

        let render_ctx = self.ctx.clone();
        let outputs = run_scenes(jobs, limits, move |job| {
            let ctx = render_ctx.clone();
            async move { scene::render_scene(&ctx, &job).await }
        })
        .await?;

        let composed = composer::compose_final(
            &self.ctx,
            task.id.as_str(),
            spec,
            &outputs,
            global_narration.as_deref(),
        )
        .await?;

        let output_url = self
            .ctx
            .storage
            .upload_final_video(&composed.path, task.id.as_str())
            .await
            .map_err(|e| WorkerError::UploadFailed(e.to_string()))?;
        info!(url = %output_url, "Final video published");

        // Scene clips and their intermediates are no longer needed.
        for output in &outputs {
            fs_utils::cleanup_files(&output.temp_files).await;
            fs_utils::cleanup_files([&output.path]).await;
        }

        Ok(TaskResult {
            output_url,
            local_path: composed.path.to_string_lossy().to_string(),
            duration: composed.duration,
            post_description: spec.post_description.clone(),
        })
    }

    /// Post-task cache policy: optionally clear, optionally in the
    /// background. Errors are logged inside the cache, never fatal.
    async fn clear_cache_on_completion(&self) {
        if !self.ctx.config.enable_cache_clearing {
            info!("Cache clearing disabled");
            return;
        }
        if self.ctx.config.cache_clearing_async {
            let cache = self.ctx.cache.clone();
            tokio::spawn(async move {
                cache.clear().await;
            });
            info!("Cache clearing started in background");
        } else {
            self.ctx.cache.clear().await;
            info!("Cache cleared");
        }
    }
}

/// Atomically claim the right to write the terminal status.
fn claim_terminal(flag: &AtomicBool) -> bool {
    flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// On SIGTERM/SIGINT: mark the task failed with a signal-specific reason,
/// refund, clear the cache, and exit with code 1. The previously running
/// pipeline dies with the process.
fn spawn_signal_watcher(
    ctx: Arc<WorkerContext>,
    task: Task,
    terminal_written: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let signal_name = signals::wait_for_termination().await;
        error!(
            task_id = %task.id,
            signal = signal_name,
            "Received termination signal, failing current task"
        );

        if claim_terminal(&terminal_written) {
            let reason = format!("process terminated by signal: {signal_name}");
            mark_failed_on_signal(&ctx.store, &task, &reason).await;
            credits::settle_refund(&ctx.store, &task).await;
            if ctx.config.enable_cache_clearing {
                clear_cache_sync(&ctx.cache).await;
            }
        } else {
            warn!(task_id = %task.id, "Terminal status already written, exiting");
        }

        std::process::exit(1);
    })
}

async fn mark_failed_on_signal(store: &StoreClient, task: &Task, reason: &str) {
    let update = StatusUpdate::to(TaskState::Failed).with_error(reason);
    if let Err(e) = store.update_task_status(&task.id, &update).await {
        error!(task_id = %task.id, error = %e, "Failed to mark task failed on signal");
    }
}

async fn clear_cache_sync(cache: &Arc<ArtifactCache>) {
    cache.clear().await;
}

/// Cache-key digest of the payload-level context: identical prompts in
/// different videos must not collide.
fn video_context_digest(spec: &reel_models::VideoSpec) -> String {
    let product_images = spec.product_images.join(",");
    ArtifactCache::key(
        "video_context",
        &[
            spec.narration_text.as_deref().unwrap_or(""),
            &product_images,
            &spec.output_filename,
        ],
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_terminal_is_exclusive() {
        let flag = AtomicBool::new(false);
        assert!(claim_terminal(&flag));
        assert!(!claim_terminal(&flag));
    }

    #[test]
    fn test_video_context_digest_differs_by_payload() {
        let a: reel_models::VideoSpec = serde_json::from_value(serde_json::json!({
            "scenes": [{"type": "image", "image_url": "https://e.com/x.png", "duration": 5}],
            "output_filename": "a.mp4"
        }))
        .unwrap();
        let b: reel_models::VideoSpec = serde_json::from_value(serde_json::json!({
            "scenes": [{"type": "image", "image_url": "https://e.com/x.png", "duration": 5}],
            "output_filename": "b.mp4"
        }))
        .unwrap();
        assert_ne!(video_context_digest(&a), video_context_digest(&b));
    }
}
