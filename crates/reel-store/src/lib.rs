//! REST client for the coordinator's task store.
//!
//! The store is consumed, not owned: tasks, users, and credits live behind
//! the coordinator's API. This crate provides a retrying client plus the
//! best-effort credit debit/refund helpers used on task completion.

pub mod client;
pub mod credits;
pub mod error;
pub mod retry;

#[cfg(test)]
mod client_tests;

pub use client::{StoreClient, StoreConfig, StatusUpdate, UserInfo};
pub use credits::{debit_for_task, refund_for_task};
pub use error::{StoreError, StoreResult};
pub use retry::{with_retry, RetryConfig};
