//! # harbor-core: Pure Types for the Harbor Sync Engine
//!
//! This crate holds everything in the offline sync engine that can be
//! expressed without I/O: the queued-operation model, the published sync
//! state, entity-cache records, validation, and the coordinator's
//! scheduling state machine.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Harbor Data Flow                                │
//! │                                                                         │
//! │  Domain hook (MessageStore)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Gateway ──► network ──► success: cache + return                       │
//! │       │                                                                 │
//! │       └── failure while offline ──► QueueManager.enqueue               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ harbor-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌────────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ validation │  │ schedule  │  │   error   │  │   │
//! │  │   │ Operation │  │  Endpoint  │  │ SyncPhase │  │ CoreError │  │   │
//! │  │   │ SyncState │  │  payloads  │  │ debounce  │  │           │  │   │
//! │  │   └───────────┘  └────────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO TIMERS                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Operation, entity and sync-state types
//! - [`validation`] - Endpoint and payload validation
//! - [`schedule`] - Debounce / periodic / mutual-exclusion state machine
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use harbor_core::{Endpoint, OperationKind, OperationRequest};
//! use serde_json::json;
//!
//! let endpoint = Endpoint::parse("/api/messages").unwrap();
//! let request = OperationRequest::create(endpoint, json!({ "subject": "Hello" })).unwrap();
//!
//! assert_eq!(request.kind(), OperationKind::Create);
//! assert_eq!(request.method().as_str(), "POST");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod schedule;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use schedule::{SyncPhase, SyncSchedule};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Replay attempts after which a queued operation is skipped.
///
/// Operations at or above this count stay in the queue and are reported as
/// errors on every pass until someone removes them.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Quiet period before a scheduled drain pass starts (milliseconds).
pub const DEFAULT_DEBOUNCE_MS: u64 = 2_000;

/// Interval of the recovery timer that restarts dropped passes (seconds).
pub const DEFAULT_PERIODIC_INTERVAL_SECS: u64 = 30;

/// Settings key under which the last completed pass time is stored.
pub const LAST_SYNC_TIME_KEY: &str = "lastSyncTime";

/// Prefix carried by every client-assigned temporary id.
pub const TEMP_ID_PREFIX: &str = "temp-";
