//! # Network State Monitor
//!
//! Holds the process's belief about connectivity and tells subscribers when
//! it flips.
//!
//! ```text
//! platform signal / probe ──► set_online(bool) ──► watch channel
//!                                                      │
//!                                   ┌──────────────────┼──────────────┐
//!                                   ▼                  ▼              ▼
//!                              Coordinator         Gateway      MessageStore
//!                           (schedule/cancel)   (queue or not)  (cache or not)
//! ```
//!
//! Only transitions are published; repeating the current value is a no-op.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Shared connectivity flag.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        NetworkMonitor { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Records the platform's current connectivity.
    ///
    /// ## Returns
    /// `true` if this was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                info!("Network connection restored");
            } else {
                info!("Network connection lost");
            }
        }
        changed
    }

    /// Receiver that wakes on every transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        NetworkMonitor::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_are_published_once() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();

        assert!(!monitor.set_online(false));
        assert!(!rx.has_changed().unwrap());

        assert!(monitor.set_online(true));
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        assert!(!monitor.set_online(true));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_clones_share_state() {
        let monitor = NetworkMonitor::new(true);
        let other = monitor.clone();

        other.set_online(false);
        assert!(!monitor.is_online());
    }
}
