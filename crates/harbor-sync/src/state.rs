//! # Shared Sync State
//!
//! The single owned [`SyncState`] value, published over a watch channel.
//! Components mutate it through [`SharedSyncState::update`]; readers take a
//! snapshot or subscribe for changes.

use std::sync::Arc;

use tokio::sync::watch;

use harbor_core::SyncState;

#[derive(Debug, Clone)]
pub struct SharedSyncState {
    tx: Arc<watch::Sender<SyncState>>,
}

impl SharedSyncState {
    pub fn new(initial: SyncState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        SharedSyncState { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    /// Applies `f` and notifies subscribers if anything changed.
    pub fn update(&self, f: impl FnOnce(&mut SyncState)) {
        self.tx.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            *state != before
        });
    }
}

impl Default for SharedSyncState {
    fn default() -> Self {
        SharedSyncState::new(SyncState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_notifies_only_on_change() {
        let state = SharedSyncState::default();
        let mut rx = state.subscribe();

        state.update(|s| s.pending_count = 0);
        assert!(!rx.has_changed().unwrap());

        state.update(|s| s.pending_count = 2);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().pending_count, 2);
        assert_eq!(state.snapshot().pending_count, 2);
    }
}
