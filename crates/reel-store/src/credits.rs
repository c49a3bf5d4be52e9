//! Best-effort credit settlement.
//!
//! A finished task debits the sum of its scene costs from the owner; a
//! failed task refunds the same sum. Neither operation may change the
//! task's terminal state: failures are logged and swallowed by callers.

use tracing::{info, warn};

use reel_models::{task_cost, Task};

use crate::client::StoreClient;
use crate::error::StoreResult;

/// Debit the owner for a finished task. Returns the amount debited.
pub async fn debit_for_task(client: &StoreClient, task: &Task) -> StoreResult<u32> {
    let cost = task_cost(&task.request);
    if cost == 0 {
        warn!(task_id = %task.id, "No credits calculated for deduction");
        return Ok(0);
    }

    let balance = client
        .update_credits(
            &task.user_api_key,
            -(cost as i64),
            "task_finished",
            Some(&task.id),
        )
        .await?;

    info!(
        task_id = %task.id,
        credits = cost,
        remaining = balance,
        "Debited credits for finished task"
    );
    Ok(cost)
}

/// Refund the owner for a failed task. Returns the amount refunded.
pub async fn refund_for_task(client: &StoreClient, task: &Task) -> StoreResult<u32> {
    let cost = task_cost(&task.request);
    if cost == 0 {
        warn!(task_id = %task.id, "No credits calculated for refund");
        return Ok(0);
    }

    let balance = client
        .update_credits(
            &task.user_api_key,
            cost as i64,
            "task_failed_refund",
            Some(&task.id),
        )
        .await?;

    info!(
        task_id = %task.id,
        credits = cost,
        remaining = balance,
        "Refunded credits for failed task"
    );
    Ok(cost)
}
