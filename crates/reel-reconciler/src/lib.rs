//! Periodic reconciliation of stuck tasks plus operator notifications.

pub mod notifier;
pub mod reconciler;

pub use notifier::SlackNotifier;
pub use reconciler::{Reconciler, ReconcilerConfig, CycleReport};
