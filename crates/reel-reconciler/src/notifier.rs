//! Slack webhook notifications for failed and stuck tasks.
//!
//! One grouped message per cycle and category. Disabled cleanly when no
//! webhook is configured.

use std::time::Duration;

use tracing::{error, info, warn};

use reel_models::Task;

/// Error text is truncated to keep notifications readable.
const MAX_ERROR_CHARS: usize = 200;

/// Slack notifier over an incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    webhook_url: Option<String>,
    http: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        if webhook_url.is_none() {
            warn!("SLACK_WEBHOOK not set, notifications are disabled");
        }
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("SLACK_WEBHOOK").ok())
    }

    /// A notifier that drops every message (for tests and local runs).
    pub fn disabled() -> Self {
        Self {
            webhook_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// One grouped message for tasks that failed inside the window.
    pub async fn notify_failed_tasks(&self, tasks: &[Task]) {
        if tasks.is_empty() {
            return;
        }
        let header = format!(
            ":rotating_light: {} task(s) failed in the last 30 minutes",
            tasks.len()
        );
        self.send_grouped(&header, tasks).await;
    }

    /// One grouped message for currently-stuck tasks.
    pub async fn notify_stuck_tasks(&self, tasks: &[Task]) {
        if tasks.is_empty() {
            return;
        }
        let header = format!(":hourglass_flowing_sand: {} task(s) appear stuck", tasks.len());
        self.send_grouped(&header, tasks).await;
    }

    async fn send_grouped(&self, header: &str, tasks: &[Task]) {
        let mut blocks = vec![serde_json::json!({
            "type": "header",
            "text": {"type": "plain_text", "text": header}
        })];
        for task in tasks {
            blocks.push(serde_json::json!({
                "type": "section",
                "text": {"type": "mrkdwn", "text": format_task_info(task)}
            }));
        }

        self.send_message(header, Some(blocks)).await;
    }

    async fn send_message(&self, text: &str, blocks: Option<Vec<serde_json::Value>>) {
        let Some(webhook_url) = &self.webhook_url else {
            return;
        };

        let mut payload = serde_json::json!({"text": text});
        if let Some(blocks) = blocks {
            payload["blocks"] = serde_json::Value::Array(blocks);
        }

        match self
            .http
            .post(webhook_url)
            .json(&payload)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                info!("Slack notification sent");
            }
            Ok(response) => {
                error!(status = response.status().as_u16(), "Slack rejected the notification");
            }
            Err(e) => {
                error!(error = %e, "Failed to send Slack notification");
            }
        }
    }
}

/// One task line: id, status, age, truncated error, and a log link when
/// available.
fn format_task_info(task: &Task) -> String {
    let mut line = format!(
        "*{}* — status `{}`, created {}",
        task.id,
        task.status,
        task.created_at.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(error) = &task.error {
        let truncated: String = error.chars().take(MAX_ERROR_CHARS).collect();
        line.push_str(&format!("\n> {truncated}"));
    }
    if let Some(log_uri) = &task.log_uri {
        line.push_str(&format!("\n<{log_uri}|View logs>"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{TaskId, VideoSpec};

    fn task_with_error(error: &str) -> Task {
        let spec: VideoSpec = serde_json::from_value(serde_json::json!({
            "scenes": [{"type": "image", "image_url": "https://e.com/a.png", "duration": 5}],
            "output_filename": "reel.mp4"
        }))
        .unwrap();
        let mut task = Task::new(TaskId::from_string("t-9"), "key", spec);
        task.start().unwrap();
        task.fail(error).unwrap();
        task.log_uri = Some("https://logs.example.com/t-9".to_string());
        task
    }

    #[test]
    fn test_format_truncates_error_to_200_chars() {
        let task = task_with_error(&"e".repeat(500));
        let formatted = format_task_info(&task);
        let quoted = formatted
            .lines()
            .find(|l| l.starts_with("> "))
            .unwrap()
            .trim_start_matches("> ");
        assert_eq!(quoted.chars().count(), 200);
        assert!(formatted.contains("View logs"));
        assert!(formatted.contains("t-9"));
    }

    #[test]
    fn test_disabled_notifier() {
        let notifier = SlackNotifier::disabled();
        assert!(!notifier.is_enabled());
    }
}
