//! Best-effort credit settlement wrappers.
//!
//! Credit operations never change a task's terminal state: a failed debit
//! or refund is logged and swallowed.

use tracing::{error, info};

use reel_models::Task;
use reel_store::{credits, StoreClient};

/// Debit the owner after a successful final upload.
pub async fn settle_debit(store: &StoreClient, task: &Task) {
    match credits::debit_for_task(store, task).await {
        Ok(amount) => {
            info!(task_id = %task.id, credits = amount, "Credit debit settled");
        }
        Err(e) => {
            error!(
                task_id = %task.id,
                error = %e,
                "Failed to debit credits; task remains finished"
            );
        }
    }
}

/// Refund the owner after a failure.
pub async fn settle_refund(store: &StoreClient, task: &Task) {
    match credits::refund_for_task(store, task).await {
        Ok(amount) => {
            info!(task_id = %task.id, credits = amount, "Credit refund settled");
        }
        Err(e) => {
            error!(
                task_id = %task.id,
                error = %e,
                "Failed to refund credits; task remains failed"
            );
        }
    }
}
