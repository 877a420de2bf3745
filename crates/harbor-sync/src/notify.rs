//! # Notifications
//!
//! Optional side channel for user-facing summaries. The engine calls these
//! hooks; what they do (toast, log, nothing) is up to the host.

use tracing::{info, warn};

use harbor_core::QueuedOperation;

/// Receives sync summaries.
pub trait SyncNotifier: Send + Sync {
    /// A write was queued for later replay.
    fn operation_queued(&self, operation: &QueuedOperation);

    /// A pass confirmed `count` operations.
    fn sync_completed(&self, count: u32);

    /// A pass finished with `count` failed operations.
    fn sync_issues(&self, count: u32);

    /// A pass could not run at all.
    fn sync_failed(&self, reason: &str);

    /// The user's offline data was wiped.
    fn data_cleared(&self);
}

/// Notifier that discards everything.
pub struct NoOpNotifier;

impl SyncNotifier for NoOpNotifier {
    fn operation_queued(&self, _operation: &QueuedOperation) {}
    fn sync_completed(&self, _count: u32) {}
    fn sync_issues(&self, _count: u32) {}
    fn sync_failed(&self, _reason: &str) {}
    fn data_cleared(&self) {}
}

/// Notifier that writes each summary as a log line.
pub struct TracingNotifier;

impl SyncNotifier for TracingNotifier {
    fn operation_queued(&self, operation: &QueuedOperation) {
        info!(
            operation_id = %operation.id(),
            title = "Action Queued",
            "Your changes will sync when you're back online."
        );
    }

    fn sync_completed(&self, count: u32) {
        info!(title = "Sync Complete", "Successfully synced {} changes.", count);
    }

    fn sync_issues(&self, count: u32) {
        warn!(
            title = "Sync Issues",
            "{} operations failed to sync. Will retry later.", count
        );
    }

    fn sync_failed(&self, reason: &str) {
        warn!(
            title = "Sync Failed",
            reason,
            "Unable to sync your changes. Will retry automatically."
        );
    }

    fn data_cleared(&self) {
        info!(
            title = "Offline Data Cleared",
            "All offline data has been removed from this device."
        );
    }
}
