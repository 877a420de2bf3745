//! # Error Types
//!
//! Domain-specific error types for harbor-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  harbor-core errors (this file)                                        │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Malformed operations / identifiers             │
//! │                                                                         │
//! │  harbor-db errors (separate crate)                                     │
//! │  └── DbError          - Durable store failures                         │
//! │                                                                         │
//! │  harbor-sync errors (separate crate)                                   │
//! │  └── SyncError        - Persistence / replay / auth / network          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError/SyncError → caller        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stored value could not be mapped back onto a domain type.
    ///
    /// ## When This Occurs
    /// - A queued payload column holds text that is not JSON
    /// - An operation row names an unknown kind
    #[error("Corrupt {entity} record {id}: {reason}")]
    CorruptRecord {
        entity: String,
        id: String,
        reason: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised at enqueue time so malformed operations never reach the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., endpoint without leading slash).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

impl ValidationError {
    /// Creates a Required error for a field.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Creates an InvalidFormat error for a field.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
