//! # Message Store
//!
//! Offline-capable message list and local drafts for one user.
//!
//! ## Load
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  online?                                                                │
//! │    yes ──► GET /api/messages                                            │
//! │              ├── Ok        ──► overwrite cache (keep still-queued       │
//! │              │                 optimistic entries)      ► Fresh         │
//! │              ├── 401/403   ──► Err(Unauthorized)                        │
//! │              └── other Err ──► cached list              ► Stale         │
//! │    no  ──► cached list                                  ► Cached        │
//! │              └── empty     ──► Err(NoDataOffline)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Send
//! ```text
//! temp-message-<uuid> entry written locally (Pending)
//!    │
//!    └── gateway.post("/api/messages")
//!          ├── Remote(body) ──► replace temp entry with server message
//!          ├── Queued(op)   ──► keep temp entry, pending_operation = op.id
//!          │                    ... later SyncEvent::OperationSynced(op)
//!          │                    ──► reconcile(): replace with server message
//!          └── Err          ──► remove temp entry, return Err
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use harbor_core::{
    is_temporary_id, temporary_id, CachedEntity, EntityKind, EntitySyncStatus, UserScope,
};
use harbor_db::EntityRepository;

use crate::coordinator::SyncEvent;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{GatewayResponse, OfflineGateway};

const MESSAGES_ENDPOINT: &str = "/api/messages";

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Sent,
    Received,
    Draft,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// A message as the API returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub recipient_id: String,
    #[serde(default)]
    pub recipient_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message: Option<String>,
}

impl Message {
    pub fn is_unread(&self) -> bool {
        self.message_type == MessageType::Received && self.read_at.is_none()
    }

    fn matches(&self, needle: &str) -> bool {
        [
            &self.subject,
            &self.content,
            &self.sender_name,
            &self.recipient_name,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
    }
}

/// Input for [`MessageStore::send_message`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewMessage {
    pub subject: String,
    pub content: String,
    pub recipient_id: String,
    pub recipient_name: String,
    pub priority: Priority,
    pub student_id: Option<String>,
    pub parent_message: Option<String>,
    pub tags: Vec<String>,
}

/// A cached message plus the queued write that created it, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEntry {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_operation: Option<String>,
}

impl MessageEntry {
    fn synced(message: Message) -> Self {
        MessageEntry {
            message,
            pending_operation: None,
        }
    }

    /// Waiting for a queued create to reach the server.
    pub fn is_pending(&self) -> bool {
        self.pending_operation.is_some()
    }

    fn sync_status(&self) -> EntitySyncStatus {
        if self.is_pending() {
            EntitySyncStatus::Pending
        } else {
            EntitySyncStatus::Synced
        }
    }
}

// =============================================================================
// Draft Types
// =============================================================================

/// A locally saved, never-sent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    pub id: String,
    pub subject: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub last_saved: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewDraft {
    pub subject: String,
    pub content: String,
    pub recipient_id: Option<String>,
    pub recipient_name: Option<String>,
    pub priority: Priority,
    pub student_id: Option<String>,
}

/// Fields to change on an existing draft; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftUpdate {
    pub subject: Option<String>,
    pub content: Option<String>,
    pub recipient_id: Option<String>,
    pub recipient_name: Option<String>,
    pub priority: Option<Priority>,
    pub student_id: Option<String>,
}

/// Where the last [`MessageStore::load`] got its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Straight from the server.
    Fresh,
    /// The server could not be reached; this is the cached copy.
    Stale,
    /// Offline; this is the cached copy.
    Cached,
}

// =============================================================================
// Message Store
// =============================================================================

/// Message list backed by the entity cache and written through the gateway.
pub struct MessageStore {
    entities: EntityRepository,
    user: UserScope,
    gateway: OfflineGateway,
    sender_name: String,
    messages: Vec<MessageEntry>,
    drafts: Vec<MessageDraft>,
    freshness: Option<Freshness>,
}

impl MessageStore {
    pub fn new(engine: &SyncEngine) -> Self {
        MessageStore {
            entities: engine.database().entities(),
            user: engine.user().clone(),
            gateway: engine.gateway(),
            sender_name: "You".to_string(),
            messages: Vec::new(),
            drafts: Vec::new(),
            freshness: None,
        }
    }

    /// Display name put on optimistic messages.
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    pub fn messages(&self) -> &[MessageEntry] {
        &self.messages
    }

    pub fn drafts(&self) -> &[MessageDraft] {
        &self.drafts
    }

    /// Source of the current list; `None` before the first load.
    pub fn freshness(&self) -> Option<Freshness> {
        self.freshness
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Loads drafts from the cache and messages from the server or cache.
    pub async fn load(&mut self) -> SyncResult<Freshness> {
        self.drafts = self.cached_drafts().await?;

        let freshness = if self.gateway.monitor().is_online() {
            match self.fetch_remote().await {
                Ok(messages) => {
                    self.store_fetched(messages).await?;
                    Freshness::Fresh
                }
                Err(err) if err.is_auth_error() => return Err(err),
                Err(err) => {
                    warn!(error = %err, "Failed to load messages, using cached copy");
                    self.messages = self.cached_messages().await?;
                    Freshness::Stale
                }
            }
        } else {
            let cached = self.cached_messages().await?;
            if cached.is_empty() {
                self.messages.clear();
                self.freshness = None;
                return Err(SyncError::NoDataOffline {
                    resource: "message".into(),
                });
            }
            self.messages = cached;
            Freshness::Cached
        };

        debug!(count = self.messages.len(), ?freshness, "Messages loaded");
        self.freshness = Some(freshness);
        Ok(freshness)
    }

    async fn fetch_remote(&self) -> SyncResult<Vec<Message>> {
        let body = self.gateway.get(MESSAGES_ENDPOINT).await?;
        let list = match body {
            Value::Object(mut map) => map.remove("messages").unwrap_or(Value::Null),
            other => other,
        };
        serde_json::from_value(list).map_err(|e| SyncError::InvalidResponse(e.to_string()))
    }

    /// Replaces the cache with the server's list, keeping optimistic entries
    /// whose queued create has not been replayed yet.
    async fn store_fetched(&mut self, messages: Vec<Message>) -> SyncResult<()> {
        let queued: HashSet<String> = self
            .gateway
            .queue()
            .list()
            .await?
            .into_iter()
            .map(|op| op.id().to_string())
            .collect();

        let mut entries: Vec<MessageEntry> = messages.into_iter().map(MessageEntry::synced).collect();
        let still_pending: Vec<MessageEntry> = self
            .cached_messages()
            .await?
            .into_iter()
            .filter(|entry| {
                entry
                    .pending_operation
                    .as_ref()
                    .is_some_and(|op| queued.contains(op))
            })
            .filter(|entry| !entries.iter().any(|e| e.message.id == entry.message.id))
            .collect();
        entries.extend(still_pending);

        let records = entries
            .iter()
            .map(|entry| self.record(entry, entry.sync_status()))
            .collect::<SyncResult<Vec<_>>>()?;
        self.entities
            .replace_all(&self.user, EntityKind::Message, &records)
            .await?;

        self.messages = entries;
        Ok(())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Sends a message, showing it immediately under a temporary id.
    ///
    /// ## Returns
    /// The entry as it now stands: the server's message, or the optimistic
    /// one flagged pending if the write was queued.
    pub async fn send_message(&mut self, input: NewMessage) -> SyncResult<MessageEntry> {
        let optimistic = MessageEntry::synced(Message {
            id: temporary_id(EntityKind::Message),
            subject: input.subject,
            content: input.content,
            message_type: MessageType::Sent,
            priority: input.priority,
            sender_id: self.user.as_str().to_string(),
            sender_name: self.sender_name.clone(),
            recipient_id: input.recipient_id,
            recipient_name: input.recipient_name,
            timestamp: Utc::now(),
            read_at: None,
            attachments: Vec::new(),
            tags: input.tags,
            student_id: input.student_id,
            parent_message: input.parent_message,
        });
        let temp_id = optimistic.message.id.clone();

        self.write_entry(&temp_id, optimistic.clone(), EntitySyncStatus::Pending)
            .await?;

        let payload = serde_json::to_value(&optimistic.message)?;
        match self.gateway.post(MESSAGES_ENDPOINT, payload).await {
            Ok(GatewayResponse::Remote(body)) => {
                let entry = match parse_message(body) {
                    Ok(message) => MessageEntry::synced(message),
                    Err(err) => {
                        warn!(error = %err, "Sent message but could not read the server copy");
                        optimistic
                    }
                };
                self.write_entry(&temp_id, entry.clone(), EntitySyncStatus::Synced)
                    .await?;
                info!(message_id = %entry.message.id, "Message sent");
                Ok(entry)
            }
            Ok(GatewayResponse::Queued { operation }) => {
                let entry = MessageEntry {
                    pending_operation: Some(operation.id().to_string()),
                    ..optimistic
                };
                self.write_entry(&temp_id, entry.clone(), EntitySyncStatus::Pending)
                    .await?;
                info!(message_id = %temp_id, "Message queued for sync");
                Ok(entry)
            }
            Err(err) => {
                if let Err(cleanup) = self.drop_entry(&temp_id).await {
                    warn!(error = %cleanup, "Failed to roll back optimistic message");
                }
                Err(err)
            }
        }
    }

    /// Applies a sync event. Returns `true` if an optimistic entry was
    /// replaced.
    pub async fn reconcile(&mut self, event: &SyncEvent) -> SyncResult<bool> {
        let SyncEvent::OperationSynced {
            operation,
            response,
        } = event
        else {
            return Ok(false);
        };

        let Some(current) = self
            .messages
            .iter()
            .find(|e| e.pending_operation.as_deref() == Some(operation.id()))
            .cloned()
        else {
            return Ok(false);
        };

        let entry = match parse_message(response.clone()) {
            Ok(message) => MessageEntry::synced(message),
            Err(err) => {
                debug!(error = %err, "Synced message response carried no message");
                MessageEntry::synced(current.message.clone())
            }
        };

        debug!(
            temp_id = %current.message.id,
            message_id = %entry.message.id,
            "Reconciled optimistic message"
        );
        self.write_entry(&current.message.id, entry, EntitySyncStatus::Synced)
            .await?;
        Ok(true)
    }

    /// Marks a message read, locally first.
    ///
    /// ## Returns
    /// `false` if the message is unknown or already read.
    pub async fn mark_as_read(&mut self, id: &str) -> SyncResult<bool> {
        let Some(previous) = self.find(id).cloned() else {
            return Ok(false);
        };
        if previous.message.read_at.is_some() {
            return Ok(false);
        }

        let read_at = Utc::now();
        let mut entry = previous.clone();
        entry.message.read_at = Some(read_at);
        let status = entry.sync_status();
        self.write_entry(id, entry.clone(), status).await?;

        // The server has never heard of a temporary id.
        if is_temporary_id(id) {
            return Ok(true);
        }

        let endpoint = format!("{}/{}/read", MESSAGES_ENDPOINT, id);
        match self.gateway.put(&endpoint, json!({ "readAt": read_at })).await {
            Ok(GatewayResponse::Queued { .. }) => {
                self.write_entry(id, entry, EntitySyncStatus::Pending).await?;
                Ok(true)
            }
            Ok(GatewayResponse::Remote(_)) => Ok(true),
            Err(err) => {
                let status = previous.sync_status();
                self.write_entry(id, previous, status).await?;
                Err(err)
            }
        }
    }

    // =========================================================================
    // Drafts
    // =========================================================================

    /// Saves a draft, replacing one with the same recipient and subject.
    pub async fn save_draft(&mut self, input: NewDraft) -> SyncResult<MessageDraft> {
        let draft = MessageDraft {
            id: temporary_id(EntityKind::Draft),
            subject: input.subject,
            content: input.content,
            recipient_id: input.recipient_id,
            recipient_name: input.recipient_name,
            priority: input.priority,
            student_id: input.student_id,
            last_saved: Utc::now(),
        };

        let replaced: Vec<String> = self
            .drafts
            .iter()
            .filter(|d| d.recipient_id == draft.recipient_id && d.subject == draft.subject)
            .map(|d| d.id.clone())
            .collect();
        for id in &replaced {
            self.entities.remove(&self.user, EntityKind::Draft, id).await?;
        }
        self.drafts.retain(|d| !replaced.contains(&d.id));

        self.put_draft(&draft).await?;
        self.drafts.push(draft.clone());
        Ok(draft)
    }

    /// Changes fields of a draft. Returns `None` if there is no such draft.
    pub async fn update_draft(
        &mut self,
        id: &str,
        update: DraftUpdate,
    ) -> SyncResult<Option<MessageDraft>> {
        let Some(index) = self.drafts.iter().position(|d| d.id == id) else {
            return Ok(None);
        };

        let mut draft = self.drafts[index].clone();
        if let Some(subject) = update.subject {
            draft.subject = subject;
        }
        if let Some(content) = update.content {
            draft.content = content;
        }
        if update.recipient_id.is_some() {
            draft.recipient_id = update.recipient_id;
        }
        if update.recipient_name.is_some() {
            draft.recipient_name = update.recipient_name;
        }
        if let Some(priority) = update.priority {
            draft.priority = priority;
        }
        if update.student_id.is_some() {
            draft.student_id = update.student_id;
        }
        draft.last_saved = Utc::now();

        self.put_draft(&draft).await?;
        self.drafts[index] = draft.clone();
        Ok(Some(draft))
    }

    pub async fn delete_draft(&mut self, id: &str) -> SyncResult<bool> {
        let removed = self.entities.remove(&self.user, EntityKind::Draft, id).await?;
        let before = self.drafts.len();
        self.drafts.retain(|d| d.id != id);
        Ok(removed || self.drafts.len() != before)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn unread_count(&self) -> usize {
        self.messages.iter().filter(|e| e.message.is_unread()).count()
    }

    pub fn by_type(&self, message_type: MessageType) -> Vec<&Message> {
        self.messages
            .iter()
            .map(|e| &e.message)
            .filter(|m| m.message_type == message_type)
            .collect()
    }

    pub fn for_student(&self, student_id: &str) -> Vec<&Message> {
        self.messages
            .iter()
            .map(|e| &e.message)
            .filter(|m| m.student_id.as_deref() == Some(student_id))
            .collect()
    }

    /// Case-insensitive match on subject, content and both party names.
    pub fn search(&self, query: &str) -> Vec<&Message> {
        let needle = query.to_lowercase();
        self.messages
            .iter()
            .map(|e| &e.message)
            .filter(|m| m.matches(&needle))
            .collect()
    }

    // =========================================================================
    // Cache Plumbing
    // =========================================================================

    fn find(&self, id: &str) -> Option<&MessageEntry> {
        self.messages.iter().find(|e| e.message.id == id)
    }

    fn record(&self, entry: &MessageEntry, status: EntitySyncStatus) -> SyncResult<CachedEntity> {
        Ok(CachedEntity {
            id: entry.message.id.clone(),
            kind: EntityKind::Message,
            user_id: self.user.as_str().to_string(),
            data: serde_json::to_value(entry)?,
            sync_status: status,
            updated_at: Utc::now(),
        })
    }

    /// Stores `entry` in place of the entry currently under `old_id`.
    async fn write_entry(
        &mut self,
        old_id: &str,
        entry: MessageEntry,
        status: EntitySyncStatus,
    ) -> SyncResult<()> {
        let record = self.record(&entry, status)?;
        if old_id != entry.message.id {
            self.entities
                .remove(&self.user, EntityKind::Message, old_id)
                .await?;
        }
        self.entities.put(&record).await?;

        let new_id = entry.message.id.clone();
        self.messages
            .retain(|e| e.message.id == old_id || e.message.id != new_id);
        match self.messages.iter().position(|e| e.message.id == old_id) {
            Some(index) => self.messages[index] = entry,
            None => self.messages.push(entry),
        }
        Ok(())
    }

    async fn drop_entry(&mut self, id: &str) -> SyncResult<()> {
        self.messages.retain(|e| e.message.id != id);
        self.entities
            .remove(&self.user, EntityKind::Message, id)
            .await?;
        Ok(())
    }

    async fn cached_messages(&self) -> SyncResult<Vec<MessageEntry>> {
        let rows = self.entities.list(&self.user, EntityKind::Message).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row.data) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(id = %row.id, error = %err, "Skipping unreadable cached message");
                    None
                }
            })
            .collect())
    }

    async fn cached_drafts(&self) -> SyncResult<Vec<MessageDraft>> {
        let rows = self.entities.list(&self.user, EntityKind::Draft).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row.data) {
                Ok(draft) => Some(draft),
                Err(err) => {
                    warn!(id = %row.id, error = %err, "Skipping unreadable draft");
                    None
                }
            })
            .collect())
    }

    /// Drafts never reach the server, so they are cached as pending and
    /// survive stale-data cleanup.
    async fn put_draft(&self, draft: &MessageDraft) -> SyncResult<()> {
        let record = CachedEntity {
            id: draft.id.clone(),
            kind: EntityKind::Draft,
            user_id: self.user.as_str().to_string(),
            data: serde_json::to_value(draft)?,
            sync_status: EntitySyncStatus::Pending,
            updated_at: draft.last_saved,
        };
        Ok(self.entities.put(&record).await?)
    }
}

/// Reads a message out of `{"message": {...}}` or a bare message body.
fn parse_message(body: Value) -> SyncResult<Message> {
    let message = match body {
        Value::Object(mut map) if map.contains_key("message") => {
            map.remove("message").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(message).map_err(|e| SyncError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        echo_responder, memory_db, start_engine, ScriptedRemote, WAIT,
    };
    use harbor_core::{Endpoint, Method};
    use std::time::Duration;

    const NEVER: Duration = Duration::from_secs(3600);

    fn server_message(id: &str, message_type: &str, extra: Value) -> Value {
        let mut message = json!({
            "id": id,
            "subject": format!("Subject {id}"),
            "content": "Meeting notes for the IEP review",
            "type": message_type,
            "priority": "medium",
            "senderId": "staff-9",
            "senderName": "Ms. Rivera",
            "recipientId": "staff-1",
            "recipientName": "Mr. Chen",
            "timestamp": "2024-05-01T10:00:00Z",
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut message, extra) {
            base.extend(extra);
        }
        message
    }

    fn hello() -> NewMessage {
        NewMessage {
            subject: "Hello".into(),
            content: "See you at the meeting".into(),
            recipient_id: "parent-7".into(),
            recipient_name: "Jordan".into(),
            ..NewMessage::default()
        }
    }

    /// GET returns `messages`; everything else behaves like the echo server.
    fn api_with(
        messages: Vec<Value>,
    ) -> impl Fn(Method, &Endpoint, Option<&Value>) -> SyncResult<Value> + Send + Sync + 'static {
        let echo = echo_responder();
        move |method: Method, endpoint: &Endpoint, payload: Option<&Value>| {
            if method == Method::Get {
                Ok(json!({ "messages": messages.clone() }))
            } else {
                echo(method, endpoint, payload)
            }
        }
    }

    async fn next_synced(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> SyncEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = rx.recv().await.unwrap();
                if matches!(event, SyncEvent::OperationSynced { .. }) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_offline_send_is_reconciled_after_sync() {
        let remote = ScriptedRemote::failing();
        let engine = start_engine(memory_db().await, remote.clone(), false, NEVER).await;
        let mut store = MessageStore::new(&engine);
        let mut events = engine.subscribe_events();

        let entry = store.send_message(hello()).await.unwrap();
        assert!(entry.is_pending());
        assert!(is_temporary_id(&entry.message.id));
        assert_eq!(entry.message.sender_name, "You");
        assert_eq!(store.messages().len(), 1);
        assert_eq!(engine.state().pending_count, 1);

        remote.set_responder(echo_responder());
        engine.monitor().set_online(true);
        let report = engine.sync_now().await.unwrap().unwrap();
        assert_eq!(report.succeeded, 1);

        let event = next_synced(&mut events).await;
        assert!(store.reconcile(&event).await.unwrap());

        assert_eq!(store.messages().len(), 1);
        let synced = &store.messages()[0];
        assert_eq!(synced.message.id, "srv-1");
        assert!(!synced.is_pending());
        assert_eq!(synced.message.subject, "Hello");

        let cached = engine
            .database()
            .entities()
            .list(engine.user(), EntityKind::Message)
            .await
            .unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, "srv-1");
        assert_eq!(cached[0].sync_status, EntitySyncStatus::Synced);

        // A repeated event finds nothing left to replace.
        assert!(!store.reconcile(&event).await.unwrap());

        let state = engine.state();
        assert_eq!(state.pending_count, 0);
        assert!(state.last_sync_time.is_some());
    }

    #[tokio::test]
    async fn test_online_send_replaces_temp_entry() {
        let engine = start_engine(memory_db().await, ScriptedRemote::echo(), true, NEVER).await;
        let mut store = MessageStore::new(&engine).with_sender_name("Mr. Chen");

        let entry = store.send_message(hello()).await.unwrap();

        assert_eq!(entry.message.id, "srv-1");
        assert_eq!(entry.message.sender_name, "Mr. Chen");
        assert!(!entry.is_pending());
        assert_eq!(store.messages(), std::slice::from_ref(&entry));
        assert_eq!(engine.state().pending_count, 0);
    }

    #[tokio::test]
    async fn test_online_send_failure_rolls_back() {
        let engine = start_engine(memory_db().await, ScriptedRemote::failing(), true, NEVER).await;
        let mut store = MessageStore::new(&engine);

        let err = store.send_message(hello()).await.unwrap_err();

        assert!(err.is_network_failure());
        assert!(store.messages().is_empty());
        let stats = engine.storage_stats().await.unwrap();
        assert_eq!((stats.item_count, stats.pending_operations), (0, 0));
    }

    #[tokio::test]
    async fn test_load_online_overwrites_cache_but_keeps_queued_sends() {
        let remote = ScriptedRemote::failing();
        let engine = start_engine(memory_db().await, remote.clone(), false, NEVER).await;
        let mut store = MessageStore::new(&engine);
        let queued = store.send_message(hello()).await.unwrap();

        remote.set_responder(api_with(vec![
            server_message("m-1", "received", json!({})),
            server_message("m-2", "sent", json!({})),
        ]));
        engine.monitor().set_online(true);

        assert_eq!(store.load().await.unwrap(), Freshness::Fresh);

        let ids: Vec<&str> = store.messages().iter().map(|e| e.message.id.as_str()).collect();
        assert_eq!(ids, vec!["m-1", "m-2", queued.message.id.as_str()]);
        assert!(store.messages()[2].is_pending());

        let mut reopened = MessageStore::new(&engine);
        engine.monitor().set_online(false);
        assert_eq!(reopened.load().await.unwrap(), Freshness::Cached);
        assert_eq!(reopened.messages(), store.messages());
    }

    #[tokio::test]
    async fn test_load_falls_back_to_cache_when_fetch_fails() {
        let remote = ScriptedRemote::new(api_with(vec![server_message("m-1", "received", json!({}))]));
        let engine = start_engine(memory_db().await, remote.clone(), true, NEVER).await;
        let mut store = MessageStore::new(&engine);
        assert_eq!(store.load().await.unwrap(), Freshness::Fresh);

        remote.set_responder(|_, _, _| {
            Err(SyncError::Remote {
                status: 502,
                message: "Bad Gateway".into(),
            })
        });

        assert_eq!(store.load().await.unwrap(), Freshness::Stale);
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.freshness(), Some(Freshness::Stale));
    }

    #[tokio::test]
    async fn test_load_offline_with_empty_cache() {
        let engine = start_engine(memory_db().await, ScriptedRemote::echo(), false, NEVER).await;
        let mut store = MessageStore::new(&engine);

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, SyncError::NoDataOffline { .. }));
        assert_eq!(
            err.to_string(),
            "No message data available offline. Please connect to load your messages."
        );
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn test_load_propagates_auth_errors() {
        let remote = ScriptedRemote::new(|_, _, _| Err(SyncError::Unauthorized { status: 401 }));
        let engine = start_engine(memory_db().await, remote, true, NEVER).await;
        let mut store = MessageStore::new(&engine);

        assert!(store.load().await.unwrap_err().is_auth_error());
    }

    #[tokio::test]
    async fn test_mark_as_read() {
        let remote = ScriptedRemote::new(api_with(vec![
            server_message("m-1", "received", json!({})),
            server_message("m-2", "received", json!({ "readAt": "2024-05-02T08:00:00Z" })),
        ]));
        let engine = start_engine(memory_db().await, remote.clone(), true, NEVER).await;
        let mut store = MessageStore::new(&engine);
        store.load().await.unwrap();
        assert_eq!(store.unread_count(), 1);

        assert!(store.mark_as_read("m-1").await.unwrap());
        assert_eq!(store.unread_count(), 0);

        let put = remote.calls().into_iter().find(|c| c.method == Method::Put).unwrap();
        assert_eq!(put.endpoint, "/api/messages/m-1/read");
        assert!(put.payload.unwrap()["readAt"].is_string());

        let calls = remote.calls().len();
        assert!(!store.mark_as_read("m-1").await.unwrap());
        assert!(!store.mark_as_read("m-2").await.unwrap());
        assert!(!store.mark_as_read("missing").await.unwrap());
        assert_eq!(remote.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_mark_as_read_offline_is_queued() {
        let remote = ScriptedRemote::new(api_with(vec![server_message("m-1", "received", json!({}))]));
        let engine = start_engine(memory_db().await, remote.clone(), true, NEVER).await;
        let mut store = MessageStore::new(&engine);
        store.load().await.unwrap();

        remote.set_responder(|_, _, _| Err(SyncError::Network("offline".into())));
        engine.monitor().set_online(false);

        assert!(store.mark_as_read("m-1").await.unwrap());
        assert_eq!(store.unread_count(), 0);
        assert_eq!(engine.state().pending_count, 1);

        let cached = engine
            .database()
            .entities()
            .get(engine.user(), EntityKind::Message, "m-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.sync_status, EntitySyncStatus::Pending);
        assert!(cached.data["readAt"].is_string());
    }

    #[tokio::test]
    async fn test_drafts_are_local_and_replace_by_recipient_and_subject() {
        let remote = ScriptedRemote::echo();
        let engine = start_engine(memory_db().await, remote.clone(), true, NEVER).await;
        let mut store = MessageStore::new(&engine);

        let draft = NewDraft {
            subject: "Progress report".into(),
            content: "First pass".into(),
            recipient_id: Some("parent-7".into()),
            ..NewDraft::default()
        };
        store.save_draft(draft.clone()).await.unwrap();
        let second = store
            .save_draft(NewDraft {
                content: "Second pass".into(),
                ..draft
            })
            .await
            .unwrap();

        assert_eq!(store.drafts().len(), 1);
        assert_eq!(store.drafts()[0].content, "Second pass");

        let updated = store
            .update_draft(
                &second.id,
                DraftUpdate {
                    priority: Some(Priority::High),
                    ..DraftUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(updated.content, "Second pass");
        assert!(store.update_draft("nope", DraftUpdate::default()).await.unwrap().is_none());

        let mut reopened = MessageStore::new(&engine);
        reopened.load().await.unwrap();
        assert_eq!(reopened.drafts(), store.drafts());

        assert!(store.delete_draft(&second.id).await.unwrap());
        assert!(store.drafts().is_empty());
        assert!(!store.delete_draft(&second.id).await.unwrap());

        assert!(remote.calls().iter().all(|c| c.method == Method::Get));
    }

    #[tokio::test]
    async fn test_filters_and_search() {
        let remote = ScriptedRemote::new(api_with(vec![
            server_message("m-1", "received", json!({ "studentId": "s-1", "subject": "Reading GOALS" })),
            server_message("m-2", "sent", json!({ "studentId": "s-2" })),
            server_message("m-3", "received", json!({ "recipientName": "Dana Whitfield" })),
        ]));
        let engine = start_engine(memory_db().await, remote, true, NEVER).await;
        let mut store = MessageStore::new(&engine);
        store.load().await.unwrap();

        let ids = |messages: Vec<&Message>| -> Vec<String> {
            messages.into_iter().map(|m| m.id.clone()).collect()
        };

        assert_eq!(ids(store.by_type(MessageType::Received)), vec!["m-1", "m-3"]);
        assert_eq!(ids(store.by_type(MessageType::Sent)), vec!["m-2"]);
        assert_eq!(ids(store.for_student("s-2")), vec!["m-2"]);
        assert_eq!(ids(store.search("reading goals")), vec!["m-1"]);
        assert_eq!(ids(store.search("whitfield")), vec!["m-3"]);
        assert_eq!(store.search("rivera").len(), 3);
        assert_eq!(store.unread_count(), 2);
    }
}
