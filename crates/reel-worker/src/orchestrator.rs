//! Scene fan-out with bounded concurrency and provider caps.
//!
//! Ordering invariant: the returned outputs are sorted by scene index, so
//! composition order always equals payload order no matter which worker
//! finishes first. KlingAI generations run under their own 3-permit
//! semaphore, concurrently with the general pool. E-commerce payloads run
//! strictly sequentially.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::scene::{SceneJob, SceneOutput};

/// Concurrency limits for one task.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorLimits {
    /// General scene worker slots
    pub worker_slots: usize,
    /// Concurrent KlingAI generations, at most
    pub klingai_slots: usize,
    /// Force sequential processing (e-commerce mode)
    pub sequential: bool,
}

impl OrchestratorLimits {
    pub fn new(worker_slots: usize, klingai_slots: usize, sequential: bool) -> Self {
        Self {
            worker_slots: worker_slots.max(1),
            klingai_slots: klingai_slots.max(1),
            sequential,
        }
    }
}

/// Run every scene job through `render`, preserving input order in the
/// result. The first fatal error stops dispatching further scenes;
/// in-flight workers run to completion.
pub async fn run_scenes<F, Fut>(
    jobs: Vec<SceneJob>,
    limits: OrchestratorLimits,
    render: F,
) -> WorkerResult<Vec<SceneOutput>>
where
    F: Fn(SceneJob) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = WorkerResult<SceneOutput>> + Send + 'static,
{
    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    if limits.sequential || jobs.len() == 1 {
        info!(scenes = jobs.len(), "Processing scenes sequentially");
        let mut outputs = Vec::with_capacity(jobs.len());
        for job in jobs {
            let scene_id = job.scene_id();
            match render(job).await {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    error!(scene_id = %scene_id, error = %e, "Scene processing failed");
                    return Err(e);
                }
            }
        }
        return Ok(outputs);
    }

    info!(
        scenes = jobs.len(),
        workers = limits.worker_slots,
        "Processing scenes in parallel, order will be preserved"
    );

    let worker_sem = Arc::new(Semaphore::new(limits.worker_slots));
    let klingai_sem = Arc::new(Semaphore::new(limits.klingai_slots));
    let cancelled = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let render = render.clone();
        let cancelled = cancelled.clone();
        // KlingAI scenes are gated by the provider cap; everything else by
        // the general pool. The two groups proceed concurrently.
        let semaphore = if job.scene.uses_klingai() {
            klingai_sem.clone()
        } else {
            worker_sem.clone()
        };

        handles.push(tokio::spawn(async move {
            let index = job.index;
            let scene_id = job.scene_id();
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("scene semaphore closed");

            if cancelled.load(Ordering::SeqCst) {
                warn!(scene_id = %scene_id, "Skipping scene, a previous scene failed");
                return (index, None);
            }

            let result = render(job).await;
            if result.is_err() {
                cancelled.store(true, Ordering::SeqCst);
            }
            (index, Some(result))
        }));
    }

    let joined = join_all(handles).await;

    let mut outputs: Vec<SceneOutput> = Vec::new();
    let mut first_error: Option<(usize, WorkerError)> = None;
    for joined_result in joined {
        let (index, result) = joined_result
            .map_err(|e| WorkerError::compose_failed(format!("scene worker panicked: {e}")))?;
        match result {
            Some(Ok(output)) => outputs.push(output),
            Some(Err(e)) => {
                error!(scene_index = index, error = %e, "Scene processing failed");
                if first_error.as_ref().map(|(i, _)| index < *i).unwrap_or(true) {
                    first_error = Some((index, e));
                }
            }
            // Skipped after cancellation.
            None => {}
        }
    }

    if let Some((_, e)) = first_error {
        return Err(e);
    }

    // Completion order is arbitrary; composition order is the input order.
    outputs.sort_by_key(|o| o.index);
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::GlobalSceneContext;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn global() -> Arc<GlobalSceneContext> {
        Arc::new(GlobalSceneContext {
            task_id: "task-1".to_string(),
            use_global_narration: false,
            audio_prompt_url: None,
            global_subtitle: None,
            global_logo: None,
            product_images: Vec::new(),
            total_scenes: 0,
            video_context_digest: String::new(),
        })
    }

    fn image_job(index: usize) -> SceneJob {
        SceneJob {
            index,
            scene: serde_json::from_value(serde_json::json!({
                "type": "image", "image_url": "https://e.com/x.png", "duration": 5
            }))
            .unwrap(),
            global: global(),
        }
    }

    fn klingai_job(index: usize) -> SceneJob {
        SceneJob {
            index,
            scene: serde_json::from_value(serde_json::json!({
                "type": "video",
                "prompt_video": "waves",
                "video_provider": "klingai",
                "duration": 5
            }))
            .unwrap(),
            global: global(),
        }
    }

    fn output(index: usize) -> SceneOutput {
        SceneOutput {
            index,
            path: std::path::PathBuf::from(format!("/tmp/scene_{index}.mp4")),
            temp_files: Vec::new(),
        }
    }

    /// Concurrency probe: tracks the current and peak number of running
    /// render calls.
    #[derive(Default)]
    struct Probe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Probe {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_output_order_matches_input_order() {
        // Later scenes finish first: the join must restore payload order.
        let jobs: Vec<SceneJob> = (0..4).map(image_job).collect();
        let outputs = run_scenes(
            jobs,
            OrchestratorLimits::new(4, 3, false),
            |job: SceneJob| async move {
                tokio::time::sleep(Duration::from_millis(40 - 10 * job.index as u64)).await;
                Ok(output(job.index))
            },
        )
        .await
        .unwrap();

        let order: Vec<usize> = outputs.iter().map(|o| o.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_klingai_cap_is_three() {
        let probe = Arc::new(Probe::default());
        let jobs: Vec<SceneJob> = (0..5).map(klingai_job).collect();

        let probe_clone = probe.clone();
        run_scenes(
            jobs,
            OrchestratorLimits::new(4, 3, false),
            move |job: SceneJob| {
                let probe = probe_clone.clone();
                async move {
                    probe.enter();
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    probe.exit();
                    Ok(output(job.index))
                }
            },
        )
        .await
        .unwrap();

        assert!(probe.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_klingai_batches_do_not_starve_general_pool() {
        // Three KlingAI scenes occupy the provider cap while two image
        // scenes proceed in the general pool: total concurrency above 3.
        let probe = Arc::new(Probe::default());
        let mut jobs: Vec<SceneJob> = (0..3).map(klingai_job).collect();
        jobs.push(image_job(3));
        jobs.push(image_job(4));

        let probe_clone = probe.clone();
        run_scenes(
            jobs,
            OrchestratorLimits::new(4, 3, false),
            move |job: SceneJob| {
                let probe = probe_clone.clone();
                async move {
                    probe.enter();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    probe.exit();
                    Ok(output(job.index))
                }
            },
        )
        .await
        .unwrap();

        assert!(probe.peak.load(Ordering::SeqCst) > 3);
    }

    #[tokio::test]
    async fn test_sequential_mode_runs_one_at_a_time() {
        let probe = Arc::new(Probe::default());
        let jobs: Vec<SceneJob> = (0..3).map(image_job).collect();

        let probe_clone = probe.clone();
        run_scenes(
            jobs,
            OrchestratorLimits::new(4, 3, true),
            move |job: SceneJob| {
                let probe = probe_clone.clone();
                async move {
                    probe.enter();
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    probe.exit();
                    Ok(output(job.index))
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_error_by_scene_order_wins() {
        let jobs: Vec<SceneJob> = (0..3).map(image_job).collect();
        let err = run_scenes(
            jobs,
            OrchestratorLimits::new(1, 3, false),
            |job: SceneJob| async move {
                if job.index == 1 {
                    Err(WorkerError::scene_failed(job.scene_id(), "boom"))
                } else {
                    Ok(output(job.index))
                }
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WorkerError::SceneFailed { .. }));
    }
}
