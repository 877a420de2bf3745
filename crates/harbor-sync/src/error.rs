//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Local store   │  │     Replay              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Persistence    │  │  TransientSync          │ │
//! │  │  InvalidUrl     │  │  DatabaseError  │  │  RetryExhausted         │ │
//! │  │  ConfigLoad/Save│  │  InvalidOp      │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Remote API     │  │  Domain hooks   │  │     Internal            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Unauthorized   │  │  NoDataOffline  │  │  ChannelError           │ │
//! │  │  Remote{status} │  │                 │  │  ShuttingDown           │ │
//! │  │  Network        │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation Policy
//! - `Unauthorized` always reaches the caller; it is never queued.
//! - `Persistence` means a write was neither sent nor queued.
//! - Everything that fails during replay is recorded in `SyncState`
//!   instead of being returned.

use thiserror::Error;

use harbor_core::{ValidationError, TOO_MANY_RETRIES_MESSAGE};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid API base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Local Store Errors
    // =========================================================================
    /// The store could not record a queued write.
    #[error("Failed to queue operation: {0}")]
    Persistence(String),

    /// Any other store failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The operation was rejected before reaching the queue.
    #[error("Invalid operation: {0}")]
    InvalidOperation(#[from] ValidationError),

    // =========================================================================
    // Replay Errors
    // =========================================================================
    /// A single replay attempt failed; it will be retried next pass.
    #[error("Replay of {operation_id} failed: {message}")]
    TransientSync {
        operation_id: String,
        message: String,
    },

    /// An operation reached the retry cap and is skipped until removed.
    /// Displays as the message published in `sync_errors`.
    #[error("{}", TOO_MANY_RETRIES_MESSAGE)]
    RetryExhausted { operation_id: String, attempts: u32 },

    // =========================================================================
    // Remote API Errors
    // =========================================================================
    /// The server rejected our credentials (401/403).
    #[error("HTTP {status}: Unauthorized")]
    Unauthorized { status: u16 },

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    /// The request never got an answer (DNS, refused, reset, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered 2xx with a body we could not use.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Domain Hook Errors
    // =========================================================================
    /// Offline with nothing cached for this resource.
    #[error("No {resource} data available offline. Please connect to load your {resource}s.")]
    NoDataOffline { resource: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Failed to (de)serialize a value.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<harbor_db::DbError> for SyncError {
    fn from(err: harbor_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

/// Transport failures. Status errors are produced by the remote client
/// itself, so anything arriving here never got a usable answer.
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            SyncError::InvalidResponse(err.to_string())
        } else if err.is_builder() {
            SyncError::InvalidUrl(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if retrying the same request later could succeed.
    ///
    /// ## Retryable Errors
    /// - Network failures and timeouts
    /// - 5xx, 408 and 429 responses
    /// - Individual replay failures
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::TransientSync { .. } => true,
            SyncError::Remote { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if the session's credentials were rejected.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, SyncError::Unauthorized { .. })
    }

    /// Returns true if the request never reached the server.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }

    /// Returns true if a failed write left nothing behind on the server,
    /// so queuing it for replay cannot apply it twice.
    ///
    /// `InvalidResponse` is a 2xx the server already applied; local
    /// failures never produced a request at all.
    pub fn is_replayable_write_failure(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Remote { .. })
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Network("connection refused".into()).is_retryable());
        assert!(SyncError::Remote { status: 503, message: "Service Unavailable".into() }.is_retryable());
        assert!(SyncError::Remote { status: 429, message: "Too Many Requests".into() }.is_retryable());

        assert!(!SyncError::Remote { status: 400, message: "Bad Request".into() }.is_retryable());
        assert!(!SyncError::Unauthorized { status: 401 }.is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert!(SyncError::Unauthorized { status: 403 }.is_auth_error());
        assert!(SyncError::Network("reset".into()).is_network_failure());
        assert!(!SyncError::Remote { status: 500, message: "x".into() }.is_network_failure());
        assert!(SyncError::InvalidUrl("nope".into()).is_config_error());

        assert!(SyncError::Network("reset".into()).is_replayable_write_failure());
        assert!(SyncError::Remote { status: 502, message: "Bad Gateway".into() }
            .is_replayable_write_failure());
        assert!(!SyncError::InvalidResponse("expected value".into()).is_replayable_write_failure());
        assert!(!SyncError::Unauthorized { status: 401 }.is_replayable_write_failure());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::Remote {
            status: 500,
            message: "Internal Server Error".into(),
        };
        assert_eq!(err.to_string(), "HTTP 500: Internal Server Error");

        let err = SyncError::NoDataOffline {
            resource: "message".into(),
        };
        assert_eq!(
            err.to_string(),
            "No message data available offline. Please connect to load your messages."
        );
    }

    #[test]
    fn test_replay_errors() {
        let exhausted = SyncError::RetryExhausted {
            operation_id: "op-1".into(),
            attempts: 5,
        };
        assert_eq!(exhausted.to_string(), TOO_MANY_RETRIES_MESSAGE);
        assert!(!exhausted.is_retryable());

        let transient = SyncError::TransientSync {
            operation_id: "op-2".into(),
            message: "Network error: connection reset".into(),
        };
        assert!(transient.is_retryable());
        assert_eq!(
            transient.to_string(),
            "Replay of op-2 failed: Network error: connection reset"
        );
    }

    #[test]
    fn test_validation_converts() {
        let err: SyncError = ValidationError::required("payload").into();
        assert!(matches!(err, SyncError::InvalidOperation(_)));
    }
}
