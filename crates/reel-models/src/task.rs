//! Task record and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::spec::VideoSpec;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Task is waiting to be picked up
    #[default]
    Queued,
    /// Task is being processed by a worker
    InProgress,
    /// Task finished successfully (terminal)
    Finished,
    /// Task failed (terminal)
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::InProgress => "in_progress",
            TaskState::Finished => "finished",
            TaskState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for illegal state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskStateError {
    #[error("task is already in terminal state {0}")]
    AlreadyTerminal(TaskState),
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskState, to: TaskState },
}

/// Result payload of a finished task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Public URL of the published video
    pub output_url: String,
    /// Local path of the final render on the worker host
    pub local_path: String,
    /// Final video duration in seconds
    pub duration: f64,
    /// Echoed post description from the payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_description: Option<String>,
}

/// A video-generation task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,

    /// Lifecycle state
    #[serde(default)]
    pub status: TaskState,

    /// Immutable video specification payload
    pub request: VideoSpec,

    /// Owner key used for credit operations
    pub user_api_key: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Set on the first transition into `in_progress` only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Set on the first transition into a terminal state only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Result of a finished task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,

    /// Human-readable error of a failed task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Link to full logs, set by an external executor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_uri: Option<String>,
}

impl Task {
    /// Create a new queued task.
    pub fn new(id: TaskId, user_api_key: impl Into<String>, request: VideoSpec) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: TaskState::Queued,
            request,
            user_api_key: user_api_key.into(),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            log_uri: None,
        }
    }

    /// Transition `queued -> in_progress`.
    ///
    /// `started_at` is write-once: it is only set on the first entry into
    /// `in_progress`.
    pub fn start(&mut self) -> Result<(), TaskStateError> {
        if self.status.is_terminal() {
            return Err(TaskStateError::AlreadyTerminal(self.status));
        }
        self.status = TaskState::InProgress;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition into `finished` with a result.
    pub fn finish(&mut self, result: TaskResult) -> Result<(), TaskStateError> {
        self.enter_terminal(TaskState::Finished)?;
        self.result = Some(result);
        Ok(())
    }

    /// Transition into `failed` with an error description.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskStateError> {
        self.enter_terminal(TaskState::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    fn enter_terminal(&mut self, state: TaskState) -> Result<(), TaskStateError> {
        if self.status.is_terminal() {
            return Err(TaskStateError::AlreadyTerminal(self.status));
        }
        self.status = state;
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Task age relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// A task is stuck when it is non-terminal and older than the cutoff.
    pub fn is_stuck(&self, cutoff: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.created_at < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::VideoSpec;

    fn minimal_spec() -> VideoSpec {
        serde_json::from_value(serde_json::json!({
            "scenes": [{"type": "image", "image_url": "https://example.com/a.png", "duration": 5}],
            "output_filename": "out.mp4"
        }))
        .unwrap()
    }

    #[test]
    fn test_start_sets_started_at_once() {
        let mut task = Task::new(TaskId::new(), "key", minimal_spec());
        task.start().unwrap();
        let first = task.started_at.unwrap();

        // Re-entering in_progress must not move the timestamp.
        task.start().unwrap();
        assert_eq!(task.started_at.unwrap(), first);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut task = Task::new(TaskId::new(), "key", minimal_spec());
        task.start().unwrap();
        task.fail("boom").unwrap();

        assert_eq!(
            task.start(),
            Err(TaskStateError::AlreadyTerminal(TaskState::Failed))
        );
        assert!(task
            .finish(TaskResult {
                output_url: "u".into(),
                local_path: "p".into(),
                duration: 5.0,
                post_description: None,
            })
            .is_err());
    }

    #[test]
    fn test_finished_at_written_once() {
        let mut task = Task::new(TaskId::new(), "key", minimal_spec());
        task.start().unwrap();
        task.finish(TaskResult {
            output_url: "u".into(),
            local_path: "p".into(),
            duration: 5.0,
            post_description: None,
        })
        .unwrap();

        let first = task.finished_at.unwrap();
        assert!(task.fail("late").is_err());
        assert_eq!(task.finished_at.unwrap(), first);
        assert_eq!(task.status, TaskState::Finished);
    }

    #[test]
    fn test_stuck_detection() {
        let mut task = Task::new(TaskId::new(), "key", minimal_spec());
        task.created_at = Utc::now() - chrono::Duration::minutes(45);
        let cutoff = Utc::now() - chrono::Duration::minutes(30);
        assert!(task.is_stuck(cutoff));

        task.start().unwrap();
        assert!(task.is_stuck(cutoff));

        task.fail("x").unwrap();
        assert!(!task.is_stuck(cutoff));
    }

    #[test]
    fn test_state_serde_round_trip() {
        let json = serde_json::to_string(&TaskState::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let state: TaskState = serde_json::from_str("\"finished\"").unwrap();
        assert!(state.is_terminal());
    }
}
