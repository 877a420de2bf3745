//! # Validation Module
//!
//! Checks applied to operations before they are allowed into the queue.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Typed construction (THIS MODULE)                             │
//! │  ├── Endpoint shape (relative path or http(s) URL)                     │
//! │  ├── Payload presence for create/update                                │
//! │  └── Non-empty owning user                                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── CHECK (kind IN ('create','update','delete'))                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::Value;

use crate::error::ValidationError;
use crate::types::OperationKind;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest endpoint accepted into the queue.
pub const MAX_ENDPOINT_LEN: usize = 2048;

/// Longest user identifier accepted as a scope.
pub const MAX_USER_ID_LEN: usize = 256;

/// Validates an endpoint string.
///
/// ## Rules
/// - Must not be empty
/// - Must be at most [`MAX_ENDPOINT_LEN`] characters
/// - Must start with `/` or be an absolute `http://` / `https://` URL
/// - Must not contain whitespace
///
/// ## Example
/// ```rust
/// use harbor_core::validation::validate_endpoint;
///
/// assert!(validate_endpoint("/api/messages").is_ok());
/// assert!(validate_endpoint("https://api.example.com/v1/goals").is_ok());
/// assert!(validate_endpoint("api/messages").is_err());
/// assert!(validate_endpoint("").is_err());
/// ```
pub fn validate_endpoint(endpoint: &str) -> ValidationResult<()> {
    if endpoint.is_empty() {
        return Err(ValidationError::required("endpoint"));
    }

    if endpoint.len() > MAX_ENDPOINT_LEN {
        return Err(ValidationError::TooLong {
            field: "endpoint".to_string(),
            max: MAX_ENDPOINT_LEN,
        });
    }

    if endpoint.chars().any(char::is_whitespace) {
        return Err(ValidationError::invalid(
            "endpoint",
            "must not contain whitespace",
        ));
    }

    let absolute = endpoint.starts_with("http://") || endpoint.starts_with("https://");
    if !endpoint.starts_with('/') && !absolute {
        return Err(ValidationError::invalid(
            "endpoint",
            "must start with '/' or be an http(s) URL",
        ));
    }

    Ok(())
}

/// Validates the payload carried by an operation of the given kind.
///
/// Create and update operations must carry a non-null body. Delete
/// operations may carry a body or none at all, but never an explicit null.
pub fn validate_payload(kind: OperationKind, payload: Option<&Value>) -> ValidationResult<()> {
    match (kind, payload) {
        (OperationKind::Create | OperationKind::Update, None) => {
            Err(ValidationError::required("payload"))
        }
        (_, Some(Value::Null)) => Err(ValidationError::invalid("payload", "must not be null")),
        _ => Ok(()),
    }
}

/// Validates an owning user identifier.
pub fn validate_user_id(user_id: &str) -> ValidationResult<()> {
    if user_id.trim().is_empty() {
        return Err(ValidationError::required("user_id"));
    }

    if user_id.len() > MAX_USER_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "user_id".to_string(),
            max: MAX_USER_ID_LEN,
        });
    }

    Ok(())
}
