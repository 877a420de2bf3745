//! # Domain Types
//!
//! Core types shared by the store, the queue, the coordinator and the
//! domain hooks.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │ OperationRequest │   │ QueuedOperation  │   │    SyncState     │    │
//! │  │ ──────────────── │   │ ──────────────── │   │ ──────────────── │    │
//! │  │ Create{ep, body} │──►│ id (UUID)        │   │ is_online        │    │
//! │  │ Update{ep, body} │   │ user_id (scope)  │   │ is_syncing       │    │
//! │  │ Delete{ep, body?}│   │ request          │   │ pending_count    │    │
//! │  └──────────────────┘   │ enqueued_at      │   │ last_sync_time   │    │
//! │                         │ retry_count      │   │ sync_errors[]    │    │
//! │                         └──────────────────┘   └──────────────────┘    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │   CachedEntity   │   │    EntityKind    │   │ EntitySyncStatus │    │
//! │  │ ──────────────── │   │ ──────────────── │   │ ──────────────── │    │
//! │  │ id (maybe temp-) │   │ student document │   │ synced           │    │
//! │  │ kind, user_id    │   │ goal message     │   │ pending          │    │
//! │  │ data (JSON)      │   │ draft settings   │   │ error            │    │
//! │  └──────────────────┘   └──────────────────┘   └──────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Immutability
//! A [`QueuedOperation`] exposes no setters. Its request (endpoint and
//! payload) is fixed at enqueue time; only the store bumps its retry count.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::validation::{validate_endpoint, validate_payload, validate_user_id};
use crate::TEMP_ID_PREFIX;

/// Message recorded for operations skipped because they hit the retry cap.
pub const TOO_MANY_RETRIES_MESSAGE: &str = "Too many retry attempts";

/// Operation id used for errors that abort a whole pass rather than one item.
pub const PASS_ERROR_ID: &str = "sync-error";

// =============================================================================
// User Scope
// =============================================================================

/// Identifier of the user owning a partition of the store and queue.
///
/// Nothing in the store is readable without one of these; there is no
/// cross-user query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserScope(String);

impl UserScope {
    /// Creates a scope, rejecting blank identifiers.
    pub fn new(user_id: impl Into<String>) -> Result<Self, ValidationError> {
        let user_id = user_id.into();
        validate_user_id(&user_id)?;
        Ok(UserScope(user_id))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserScope {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        UserScope::new(value)
    }
}

impl From<UserScope> for String {
    fn from(scope: UserScope) -> Self {
        scope.0
    }
}

// =============================================================================
// Operation Kind & HTTP Method
// =============================================================================

/// The write intent carried by a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// The verb used when replaying an operation of this kind.
    pub const fn method(self) -> Method {
        match self {
            OperationKind::Create => Method::Post,
            OperationKind::Update => Method::Put,
            OperationKind::Delete => Method::Delete,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            _ => Err(ValidationError::NotAllowed {
                field: "kind".to_string(),
                allowed: vec!["create".into(), "update".into(), "delete".into()],
            }),
        }
    }
}

/// HTTP verbs the gateway understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Whether a failed call with this verb may be queued for replay.
    pub const fn is_mutating(self) -> bool {
        !matches!(self, Method::Get)
    }

    /// The queue kind for a mutating verb; `None` for reads.
    pub const fn operation_kind(self) -> Option<OperationKind> {
        match self {
            Method::Get => None,
            Method::Post => Some(OperationKind::Create),
            Method::Put => Some(OperationKind::Update),
            Method::Delete => Some(OperationKind::Delete),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// A validated request target: a path relative to the API base URL, or an
/// absolute http(s) URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint(String);

impl Endpoint {
    pub fn parse(endpoint: impl Into<String>) -> Result<Self, ValidationError> {
        let endpoint = endpoint.into();
        validate_endpoint(&endpoint)?;
        Ok(Endpoint(endpoint))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this endpoint carries its own scheme and host.
    pub fn is_absolute(&self) -> bool {
        !self.0.starts_with('/')
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Endpoint::parse(value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0
    }
}

// =============================================================================
// Operation Request
// =============================================================================

/// A validated write intent: what to replay and where.
///
/// ## Payload Rules
/// - `Create` / `Update` always carry a non-null JSON body
/// - `Delete` may carry a body (some APIs expect one) or none
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OperationRequest {
    Create {
        endpoint: Endpoint,
        payload: Value,
    },
    Update {
        endpoint: Endpoint,
        payload: Value,
    },
    Delete {
        endpoint: Endpoint,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

impl OperationRequest {
    pub fn create(endpoint: Endpoint, payload: Value) -> Result<Self, ValidationError> {
        Self::from_parts(OperationKind::Create, endpoint, Some(payload))
    }

    pub fn update(endpoint: Endpoint, payload: Value) -> Result<Self, ValidationError> {
        Self::from_parts(OperationKind::Update, endpoint, Some(payload))
    }

    pub fn delete(endpoint: Endpoint, payload: Option<Value>) -> Result<Self, ValidationError> {
        Self::from_parts(OperationKind::Delete, endpoint, payload)
    }

    /// Builds a request from its stored or caller-supplied parts.
    ///
    /// This is the single validation point: every constructor funnels here.
    pub fn from_parts(
        kind: OperationKind,
        endpoint: Endpoint,
        payload: Option<Value>,
    ) -> Result<Self, ValidationError> {
        validate_payload(kind, payload.as_ref())?;

        let request = match (kind, payload) {
            (OperationKind::Create, Some(payload)) => OperationRequest::Create { endpoint, payload },
            (OperationKind::Update, Some(payload)) => OperationRequest::Update { endpoint, payload },
            (OperationKind::Delete, payload) => OperationRequest::Delete { endpoint, payload },
            (_, None) => return Err(ValidationError::required("payload")),
        };

        Ok(request)
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            OperationRequest::Create { .. } => OperationKind::Create,
            OperationRequest::Update { .. } => OperationKind::Update,
            OperationRequest::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        match self {
            OperationRequest::Create { endpoint, .. }
            | OperationRequest::Update { endpoint, .. }
            | OperationRequest::Delete { endpoint, .. } => endpoint,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            OperationRequest::Create { payload, .. } | OperationRequest::Update { payload, .. } => {
                Some(payload)
            }
            OperationRequest::Delete { payload, .. } => payload.as_ref(),
        }
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.kind().method()
    }
}

// =============================================================================
// Queued Operation
// =============================================================================

/// A persisted write intent awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    id: String,
    user_id: UserScope,
    request: OperationRequest,
    enqueued_at: DateTime<Utc>,
    retry_count: u32,
}

impl QueuedOperation {
    /// Assembles an operation. Only the store calls this, either right after
    /// inserting a row or when mapping one back.
    pub fn new(
        id: impl Into<String>,
        user_id: UserScope,
        request: OperationRequest,
        enqueued_at: DateTime<Utc>,
        retry_count: u32,
    ) -> Self {
        QueuedOperation {
            id: id.into(),
            user_id,
            request,
            enqueued_at,
            retry_count,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &UserScope {
        &self.user_id
    }

    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    pub fn kind(&self) -> OperationKind {
        self.request.kind()
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.request.endpoint()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.request.payload()
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether replay should skip this operation.
    #[inline]
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}

// =============================================================================
// Sync State
// =============================================================================

/// One failure recorded during a drain pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SyncErrorEntry {
    pub operation_id: String,
    pub message: String,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

impl SyncErrorEntry {
    pub fn new(
        operation_id: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        SyncErrorEntry {
            operation_id: operation_id.into(),
            message: message.into(),
            timestamp,
        }
    }

    /// Entry for a failure that aborted the pass before any item ran.
    pub fn pass_failure(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(PASS_ERROR_ID, message, timestamp)
    }
}

/// Aggregate sync state published to consumers (UI banners, hooks).
///
/// ## Invariants
/// - `is_syncing` is true only while a drain pass runs
/// - `pending_count` matches the queue after every mutation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SyncState {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_count: u32,
    #[ts(as = "Option<String>")]
    pub last_sync_time: Option<DateTime<Utc>>,
    pub sync_errors: Vec<SyncErrorEntry>,
}

impl SyncState {
    /// Whether a manual "sync now" would start a pass.
    pub fn can_sync(&self) -> bool {
        self.is_online && !self.is_syncing
    }

    pub fn has_errors(&self) -> bool {
        !self.sync_errors.is_empty()
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PassReport {
    pub succeeded: u32,
    pub failed: u32,
    /// Operations skipped at the retry cap.
    pub skipped: u32,
    pub errors: Vec<SyncErrorEntry>,
    #[ts(as = "String")]
    pub finished_at: DateTime<Utc>,
}

impl PassReport {
    pub fn had_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

// =============================================================================
// Entity Cache
// =============================================================================

/// Kinds of domain entity kept in the local cache.
///
/// The message store writes `Message` and `Draft`. The other kinds are
/// reserved for the student, document, goal and settings hooks, which
/// share the same cache table and repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum EntityKind {
    Student,
    Document,
    Goal,
    Message,
    Draft,
    Settings,
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Student => "student",
            EntityKind::Document => "document",
            EntityKind::Goal => "goal",
            EntityKind::Message => "message",
            EntityKind::Draft => "draft",
            EntityKind::Settings => "settings",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a cached entity is known to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum EntitySyncStatus {
    #[default]
    Synced,
    Pending,
    Error,
}

/// A domain object held in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntity {
    pub id: String,
    pub kind: EntityKind,
    pub user_id: String,
    pub data: Value,
    pub sync_status: EntitySyncStatus,
    pub updated_at: DateTime<Utc>,
}

impl CachedEntity {
    /// Whether the id was assigned locally and has no server counterpart yet.
    pub fn has_temporary_id(&self) -> bool {
        is_temporary_id(&self.id)
    }
}

/// Size of a user's local footprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StorageStats {
    /// Total serialized size of cached entity data.
    pub size_bytes: u64,
    pub item_count: u64,
    pub pending_operations: u64,
}

// =============================================================================
// Temporary Ids
// =============================================================================

/// Generates a client-side id for an entity not yet confirmed by the server.
///
/// ```rust
/// use harbor_core::{is_temporary_id, temporary_id, EntityKind};
///
/// let id = temporary_id(EntityKind::Message);
/// assert!(id.starts_with("temp-message-"));
/// assert!(is_temporary_id(&id));
/// ```
pub fn temporary_id(kind: EntityKind) -> String {
    format!("{}{}-{}", TEMP_ID_PREFIX, kind.as_str(), Uuid::new_v4())
}

pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}
