//! Credit costs and ledger rows.
//!
//! Cost model: a video scene that submits an AI generation (`prompt_video`)
//! costs 5 credits; every other scene costs 1. Debits happen after a
//! successful final upload; refunds after any failure. Both are best-effort
//! and never change a task's terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spec::{Scene, SceneKind, VideoSpec};
use crate::task::TaskId;

/// Cost of an AI video generation scene.
pub const AI_VIDEO_SCENE_COST: u32 = 5;

/// Cost of any other scene.
pub const BASE_SCENE_COST: u32 = 1;

/// Credit cost of a single scene.
pub fn scene_cost(scene: &Scene) -> u32 {
    match scene.kind {
        SceneKind::Video if scene.prompt_video.is_some() => AI_VIDEO_SCENE_COST,
        _ => BASE_SCENE_COST,
    }
}

/// Total credit cost of a task payload.
pub fn task_cost(spec: &VideoSpec) -> u32 {
    spec.scenes.iter().map(scene_cost).sum()
}

/// An append-only credit ledger row. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditEntry {
    pub user_key: String,
    /// Negative for debits, positive for refunds
    pub delta: i64,
    pub reason: String,
    pub task_id: TaskId,
    pub timestamp: DateTime<Utc>,
}

impl CreditEntry {
    pub fn debit(user_key: impl Into<String>, amount: u32, task_id: TaskId) -> Self {
        Self {
            user_key: user_key.into(),
            delta: -(amount as i64),
            reason: "task_finished".to_string(),
            task_id,
            timestamp: Utc::now(),
        }
    }

    pub fn refund(user_key: impl Into<String>, amount: u32, task_id: TaskId) -> Self {
        Self {
            user_key: user_key.into(),
            delta: amount as i64,
            reason: "task_failed_refund".to_string(),
            task_id,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(scenes: serde_json::Value) -> VideoSpec {
        serde_json::from_value(serde_json::json!({
            "scenes": scenes,
            "output_filename": "out.mp4"
        }))
        .unwrap()
    }

    #[test]
    fn test_scene_costs() {
        let spec = spec(serde_json::json!([
            {"type": "image", "image_url": "https://e.com/a.png", "duration": 5},
            {"type": "image", "prompt_image": "a cat", "duration": 5},
            {"type": "video", "video_url": "https://e.com/v.mp4", "duration": 5},
            {"type": "video", "prompt_video": "waves", "video_provider": "lumaai", "duration": 5}
        ]));

        let costs: Vec<u32> = spec.scenes.iter().map(scene_cost).collect();
        assert_eq!(costs, vec![1, 1, 1, 5]);
        assert_eq!(task_cost(&spec), 8);
    }

    #[test]
    fn test_ledger_rows() {
        let id = TaskId::from_string("t1");
        let debit = CreditEntry::debit("user", 8, id.clone());
        assert_eq!(debit.delta, -8);

        let refund = CreditEntry::refund("user", 8, id);
        assert_eq!(refund.delta, 8);
    }
}
