//! Stuck-task detection and recovery.
//!
//! A task still in `queued` or `in_progress` past the timeout is failed
//! with the canonical timeout error and its credits are refunded. Each
//! cycle also emits grouped notifications for recent failures and
//! currently-stuck tasks.

use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use reel_models::TaskState;
use reel_store::{credits, StatusUpdate, StoreClient, StoreResult};

use crate::notifier::SlackNotifier;

/// Canonical error recorded on timed-out tasks.
pub const TIMEOUT_ERROR: &str = "Timeout error: task exceeded maximum processing time";

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Age after which a non-terminal task is considered stuck
    pub task_timeout: Duration,
    /// Interval between cycles
    pub cycle_interval: Duration,
    /// Wait after a failed cycle before retrying
    pub error_backoff: Duration,
    /// Window for grouping recent failures into one notification
    pub failure_window: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(30 * 60),
            cycle_interval: Duration::from_secs(15 * 60),
            error_backoff: Duration::from_secs(60),
            failure_window: Duration::from_secs(30 * 60),
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let minutes = |name: &str, default: u64| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(Duration::from_secs(default))
        };
        Self {
            task_timeout: minutes("TASK_TIMEOUT_MINUTES", defaults.task_timeout.as_secs()),
            cycle_interval: std::env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cycle_interval),
            ..defaults
        }
    }
}

/// What one cycle accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub stuck_found: usize,
    pub failed: usize,
    pub refund_errors: usize,
}

/// The reconciliation loop.
pub struct Reconciler {
    store: StoreClient,
    notifier: SlackNotifier,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(store: StoreClient, notifier: SlackNotifier, config: ReconcilerConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Run cycles forever. Per-cycle errors wait out the backoff and retry.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.cycle_interval.as_secs(),
            timeout_secs = self.config.task_timeout.as_secs(),
            "Starting reconciler loop"
        );
        loop {
            match self.run_cycle().await {
                Ok(report) => {
                    if report.stuck_found > 0 {
                        info!(
                            stuck = report.stuck_found,
                            failed = report.failed,
                            "Reconcile cycle complete"
                        );
                    }
                    tokio::time::sleep(self.config.cycle_interval).await;
                }
                Err(e) => {
                    error!(error = %e, "Reconcile cycle failed, backing off");
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }
    }

    /// One reconciliation cycle: fail stuck tasks, then notify.
    pub async fn run_cycle(&self) -> StoreResult<CycleReport> {
        let mut report = CycleReport::default();

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.task_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let stuck = self.store.list_stuck_tasks(cutoff).await?;
        report.stuck_found = stuck.len();

        let mut transitioned: std::collections::HashSet<String> = std::collections::HashSet::new();
        for task in &stuck {
            if task.status.is_terminal() {
                continue;
            }
            info!(
                task_id = %task.id,
                status = %task.status,
                created_at = %task.created_at,
                "Failing stuck task"
            );
            let update = StatusUpdate::to(TaskState::Failed).with_error(TIMEOUT_ERROR);
            match self.store.update_task_status(&task.id, &update).await {
                Ok(()) => {
                    report.failed += 1;
                    transitioned.insert(task.id.to_string());
                    if let Err(e) = credits::refund_for_task(&self.store, task).await {
                        warn!(task_id = %task.id, error = %e, "Refund failed for stuck task");
                        report.refund_errors += 1;
                    }
                }
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "Failed to update stuck task");
                }
            }
        }

        // Grouped notifications: recent failures first, then still-stuck
        // tasks (those that could not be transitioned above).
        let since = Utc::now()
            - chrono::Duration::from_std(self.config.failure_window)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));
        match self.store.list_recent_failures(since).await {
            Ok(failures) if !failures.is_empty() => {
                self.notifier.notify_failed_tasks(&failures).await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not list recent failures"),
        }

        let still_stuck: Vec<_> = stuck
            .iter()
            .filter(|t| !t.status.is_terminal() && !transitioned.contains(t.id.as_str()))
            .cloned()
            .collect();
        if !still_stuck.is_empty() {
            self.notifier.notify_stuck_tasks(&still_stuck).await;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_store::{RetryConfig, StoreConfig};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> StoreClient {
        StoreClient::new(StoreConfig {
            base_url: server.uri(),
            api_key: String::new(),
        })
        .with_retry_config(RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 2,
        })
    }

    fn stuck_task_json() -> serde_json::Value {
        serde_json::json!({
            "id": "stuck-1",
            "status": "in_progress",
            "request": {
                "scenes": [
                    {"type": "image", "image_url": "https://e.com/a.png", "duration": 5},
                    {"type": "image", "image_url": "https://e.com/b.png", "duration": 5}
                ],
                "output_filename": "reel.mp4"
            },
            "user_api_key": "user-key",
            "created_at": (Utc::now() - chrono::Duration::minutes(45)).to_rfc3339(),
            "updated_at": (Utc::now() - chrono::Duration::minutes(45)).to_rfc3339(),
            "started_at": (Utc::now() - chrono::Duration::minutes(44)).to_rfc3339()
        })
    }

    #[tokio::test]
    async fn test_cycle_fails_stuck_task_and_refunds() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tasks/stuck"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(vec![stuck_task_json()]),
            )
            .mount(&server)
            .await;

        // Timeout failure must carry the canonical error string.
        Mock::given(method("PATCH"))
            .and(path("/tasks/stuck-1/status"))
            .and(body_partial_json(serde_json::json!({
                "status": "failed",
                "error": TIMEOUT_ERROR
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        // Two 1-credit scenes refunded.
        Mock::given(method("POST"))
            .and(path("/users/user-key/credits"))
            .and(body_partial_json(serde_json::json!({"delta": 2})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"credits": 12})),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/tasks/failures"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
            .mount(&server)
            .await;

        let reconciler = Reconciler::new(
            store_for(&server),
            SlackNotifier::disabled(),
            ReconcilerConfig::default(),
        );
        let report = reconciler.run_cycle().await.unwrap();
        assert_eq!(report.stuck_found, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.refund_errors, 0);
    }

    #[tokio::test]
    async fn test_empty_cycle_is_quiet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/stuck"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/failures"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
            .mount(&server)
            .await;

        let reconciler = Reconciler::new(
            store_for(&server),
            SlackNotifier::disabled(),
            ReconcilerConfig::default(),
        );
        let report = reconciler.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::default());
    }
}
