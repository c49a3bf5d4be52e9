//! Wiremock tests for the store client.

use chrono::Utc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reel_models::{Task, TaskId, TaskState, VideoSpec};

use crate::client::{StatusUpdate, StoreClient, StoreConfig};
use crate::credits;
use crate::retry::RetryConfig;

fn client_for(server: &MockServer) -> StoreClient {
    StoreClient::new(StoreConfig {
        base_url: server.uri(),
        api_key: "service-key".to_string(),
    })
    .with_retry_config(RetryConfig {
        max_retries: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
    })
}

fn sample_spec() -> VideoSpec {
    serde_json::from_value(serde_json::json!({
        "scenes": [
            {"type": "image", "image_url": "https://e.com/a.png", "duration": 5},
            {"type": "video", "prompt_video": "waves", "video_provider": "lumaai", "duration": 5}
        ],
        "output_filename": "reel.mp4"
    }))
    .unwrap()
}

fn sample_task() -> Task {
    Task::new(TaskId::from_string("task-1"), "user-key", sample_spec())
}

#[tokio::test]
async fn test_get_task_round_trip() {
    let server = MockServer::start().await;
    let task = sample_task();

    Mock::given(method("GET"))
        .and(path("/tasks/task-1"))
        .and(header("x-api-key", "service-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&task))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let fetched = client
        .get_task(&TaskId::from_string("task-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.id, task.id);
    assert_eq!(fetched.status, TaskState::Queued);
    assert_eq!(fetched.request.scenes.len(), 2);
}

#[tokio::test]
async fn test_get_task_not_found_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client
        .get_task(&TaskId::from_string("missing"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_update_status_payload_shape() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/tasks/task-1/status"))
        .and(body_partial_json(serde_json::json!({
            "status": "failed",
            "error": "boom"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .update_task_status(
            &TaskId::from_string("task-1"),
            &StatusUpdate::to(TaskState::Failed).with_error("boom"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_retry_on_server_error() {
    let server = MockServer::start().await;
    // First attempt fails with 500, then succeeds.
    Mock::given(method("GET"))
        .and(path("/tasks/task-1"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/task-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_task()))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client
        .get_task(&TaskId::from_string("task-1"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_debit_and_refund_amounts() {
    let server = MockServer::start().await;
    // 1 image + 1 AI video scene = 6 credits.
    Mock::given(method("POST"))
        .and(path("/users/user-key/credits"))
        .and(body_partial_json(serde_json::json!({"delta": -6})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"credits": 4})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/users/user-key/credits"))
        .and(body_partial_json(serde_json::json!({"delta": 6})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"credits": 10})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let task = sample_task();

    assert_eq!(credits::debit_for_task(&client, &task).await.unwrap(), 6);
    assert_eq!(credits::refund_for_task(&client, &task).await.unwrap(), 6);
}

#[tokio::test]
async fn test_list_stuck_tasks() {
    let server = MockServer::start().await;
    let mut stuck = sample_task();
    stuck.created_at = Utc::now() - chrono::Duration::minutes(45);

    Mock::given(method("GET"))
        .and(path("/tasks/stuck"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![&stuck]))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cutoff = Utc::now() - chrono::Duration::minutes(30);
    let tasks = client.list_stuck_tasks(cutoff).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].is_stuck(cutoff));
}
