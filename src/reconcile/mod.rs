//! Change detection and owner alerts

pub mod diff;
pub mod notifier;
pub mod scheduler;

pub use diff::{diff, BalanceChange, ChangeSet};
pub use notifier::{LogNotifier, Notifier, WebhookNotifier};
pub use scheduler::{CycleReport, ReconcileOutcome, ReconciliationScheduler};
