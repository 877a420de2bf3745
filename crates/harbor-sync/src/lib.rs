//! # harbor-sync: Offline Sync Engine
//!
//! Lets an API client keep working without a network. Writes that cannot
//! reach the server are queued durably and replayed, in order, once
//! connectivity returns.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Engine Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    SyncEngine (public handle)                    │  │
//! │  │                                                                  │  │
//! │  │  Owns state, events and the command channel                     │  │
//! │  │  force_sync / sync_now / clear_offline_data / shutdown          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ Command (mpsc)                          │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  Coordinator (spawned task)                      │  │
//! │  │                                                                  │  │
//! │  │  debounce ─┐                                                     │  │
//! │  │  periodic ─┼──► SyncSchedule ──► DrainPass (one at a time)       │  │
//! │  │  online ───┘                                                     │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ OfflineGateway │  │  QueueManager  │  │  MessageStore          │    │
//! │  │                │  │                │  │                        │    │
//! │  │ network first, │─►│ durable FIFO   │  │ optimistic sends,      │    │
//! │  │ queue writes   │  │ retry counts   │  │ cached reads, drafts   │    │
//! │  │ when offline   │  │                │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  OBSERVABLE STATE:                                                     │
//! │  • watch<SyncState>   online, syncing, pending count, errors          │
//! │  • watch<SyncPhase>   idle, debounce pending, syncing                 │
//! │  • broadcast<SyncEvent> per-operation results, pass reports           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - TOML + environment configuration
//! - [`engine`] - `SyncEngine` and its builder
//! - [`error`] - Sync error types
//! - [`gateway`] - Offline-aware request gateway
//! - [`messages`] - Message store with optimistic writes
//! - [`monitor`] - Connectivity flag
//! - [`notify`] - User-facing notifications
//! - [`queue`] - Operation queue manager
//! - [`remote`] - HTTP transport
//! - [`state`] - Shared sync state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harbor_sync::{HttpRemote, SyncConfig, SyncEngineBuilder};
//! use harbor_db::{Database, DbConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new("harbor.db")).await?;
//! let remote = Arc::new(HttpRemote::from_config(&config)?);
//!
//! let engine = SyncEngineBuilder::new(db, remote, config.user()?)
//!     .from_config(&config)
//!     .start()
//!     .await?;
//!
//! let response = engine.gateway().post("/api/messages", body).await?;
//! if response.is_queued() {
//!     println!("Saved offline, pending: {}", engine.state().pending_count);
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
mod coordinator;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod monitor;
pub mod notify;
pub mod queue;
pub mod remote;
pub mod state;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ApiSettings, SessionSettings, StorageSettings, SyncConfig, SyncSettings};
pub use coordinator::{PassStart, SyncEvent};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use gateway::{GatewayResponse, OfflineGateway, QUEUED_MESSAGE};
pub use messages::{
    DraftUpdate, Freshness, Message, MessageDraft, MessageEntry, MessageStore, MessageType,
    NewDraft, NewMessage, Priority,
};
pub use monitor::NetworkMonitor;
pub use notify::{NoOpNotifier, SyncNotifier, TracingNotifier};
pub use queue::QueueManager;
pub use remote::{HttpRemote, RemoteApi};
pub use state::SharedSyncState;
