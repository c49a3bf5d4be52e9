//! Task-store REST client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use reel_models::{Task, TaskId, TaskResult, TaskState};

use crate::error::{StoreError, StoreResult};
use crate::retry::{with_retry, RetryConfig};

/// Store client configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL of the coordinator's API
    pub base_url: String,
    /// Service API key sent as `x-api-key`
    pub api_key: String,
}

impl StoreConfig {
    pub fn from_env() -> StoreResult<Self> {
        Ok(Self {
            base_url: std::env::var("TASK_STORE_API_BASE")
                .map_err(|_| StoreError::config_error("TASK_STORE_API_BASE not set"))?,
            api_key: std::env::var("TASK_STORE_API_KEY").unwrap_or_default(),
        })
    }
}

/// User record touched by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub email: String,
    pub credits: i64,
}

/// Status update payload for a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_uri: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: TaskState) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_result(mut self, result: TaskResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct CreditUpdate<'a> {
    delta: i64,
    reason: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreditBalance {
    credits: i64,
}

/// Retrying REST client for the task store.
#[derive(Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    config: StoreConfig,
    retry: RetryConfig,
}

impl StoreClient {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            retry: RetryConfig::default(),
        }
    }

    pub fn from_env() -> StoreResult<Self> {
        Ok(Self::new(StoreConfig::from_env()?))
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> StoreResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let message = response.text().await.unwrap_or_default();

        Err(StoreError::Api {
            status: status.as_u16(),
            message,
            retry_after_ms,
        })
    }

    /// Fetch a task by id. Returns `None` for unknown ids.
    pub async fn get_task(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        let url = self.url(&format!("/tasks/{id}"));
        with_retry(&self.retry, "get_task", || async {
            let response = self
                .http
                .get(&url)
                .header("x-api-key", &self.config.api_key)
                .send()
                .await?;

            if response.status().as_u16() == 404 {
                return Ok(None);
            }
            let response = Self::check(response).await?;
            let task: Task = response.json().await?;
            Ok(Some(task))
        })
        .await
    }

    /// Create a queued task.
    pub async fn create_task(&self, task: &Task) -> StoreResult<()> {
        let url = self.url("/tasks");
        with_retry(&self.retry, "create_task", || async {
            let response = self
                .http
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .json(task)
                .send()
                .await?;
            Self::check(response).await?;
            Ok(())
        })
        .await
    }

    /// Update a task's status (and optionally result/error/log_uri).
    ///
    /// The store applies the write-once timestamp rules: `started_at` only
    /// on the first `in_progress`, `finished_at` only on the first terminal
    /// state.
    pub async fn update_task_status(
        &self,
        id: &TaskId,
        update: &StatusUpdate,
    ) -> StoreResult<()> {
        debug!(task_id = %id, status = %update.status, "Updating task status");
        let url = self.url(&format!("/tasks/{id}/status"));
        with_retry(&self.retry, "update_task_status", || async {
            let response = self
                .http
                .patch(&url)
                .header("x-api-key", &self.config.api_key)
                .json(update)
                .send()
                .await?;
            Self::check(response).await?;
            Ok(())
        })
        .await
    }

    /// Look up a user by API key.
    pub async fn get_user_by_api_key(&self, api_key: &str) -> StoreResult<Option<UserInfo>> {
        let url = self.url(&format!("/users/by-api-key/{api_key}"));
        with_retry(&self.retry, "get_user_by_api_key", || async {
            let response = self
                .http
                .get(&url)
                .header("x-api-key", &self.config.api_key)
                .send()
                .await?;
            if response.status().as_u16() == 404 {
                return Ok(None);
            }
            let response = Self::check(response).await?;
            let user: UserInfo = response.json().await?;
            Ok(Some(user))
        })
        .await
    }

    /// Apply a credit delta (negative = debit, positive = refund) to the
    /// user owning `user_api_key`. Returns the new balance.
    pub async fn update_credits(
        &self,
        user_api_key: &str,
        delta: i64,
        reason: &str,
        task_id: Option<&TaskId>,
    ) -> StoreResult<i64> {
        let url = self.url(&format!("/users/{user_api_key}/credits"));
        let body = CreditUpdate {
            delta,
            reason,
            task_id: task_id.map(|t| t.as_str()),
        };
        with_retry(&self.retry, "update_credits", || async {
            let response = self
                .http
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .json(&body)
                .send()
                .await?;
            let response = Self::check(response).await?;
            let balance: CreditBalance = response.json().await?;
            Ok(balance.credits)
        })
        .await
    }

    /// Tasks still in `{queued, in_progress}` created before `cutoff`.
    pub async fn list_stuck_tasks(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        let url = self.url(&format!(
            "/tasks/stuck?cutoff={}",
            cutoff.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        ));
        with_retry(&self.retry, "list_stuck_tasks", || async {
            let response = self
                .http
                .get(&url)
                .header("x-api-key", &self.config.api_key)
                .send()
                .await?;
            let response = Self::check(response).await?;
            let tasks: Vec<Task> = response.json().await?;
            Ok(tasks)
        })
        .await
    }

    /// Tasks that entered `failed` since `since`.
    pub async fn list_recent_failures(&self, since: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        let url = self.url(&format!(
            "/tasks/failures?since={}",
            since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        ));
        with_retry(&self.retry, "list_recent_failures", || async {
            let response = self
                .http
                .get(&url)
                .header("x-api-key", &self.config.api_key)
                .send()
                .await?;
            let response = Self::check(response).await?;
            let tasks: Vec<Task> = response.json().await?;
            Ok(tasks)
        })
        .await
    }
}
