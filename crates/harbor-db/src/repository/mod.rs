//! # Repository Module
//!
//! Repository implementations for the Harbor store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories and their tables                        │
//! │                                                                         │
//! │  db.operations() ──► OperationRepository ──► queued_operations         │
//! │  ├── queue / pending_for_user / get                                    │
//! │  └── remove / increment_retry / count_for_user                         │
//! │                                                                         │
//! │  db.entities()   ──► EntityRepository    ──► cached_entities           │
//! │  ├── put / get / list / remove / replace_all                           │
//! │  └── cleanup_older_than / usage                                        │
//! │                                                                         │
//! │  db.settings()   ──► SettingsRepository  ──► settings                  │
//! │                                                                         │
//! │  Every method takes the owning user; there is no cross-user query.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod entities;
pub mod operations;
pub mod settings;

use chrono::{DateTime, Utc};

use crate::error::{DbError, DbResult};

/// Timestamps are stored as epoch milliseconds.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(entity: &str, id: &str, millis: i64) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DbError::invalid_row(entity, id, format!("timestamp {millis} out of range")))
}
