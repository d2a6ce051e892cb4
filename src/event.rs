//! # Sync Events
//!
//! The typed event vocabulary shared by every channel consumer: row-level
//! change events, presence records, ephemeral signals, and channel status
//! transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of row-level change reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// New record inserted
    Insert,
    /// Existing record updated
    Update,
    /// Record deleted
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "INSERT"),
            ChangeKind::Update => write!(f, "UPDATE"),
            ChangeKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A row-level change pushed by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Change kind
    pub kind: ChangeKind,

    /// Collection name
    pub collection: String,

    /// Record ID
    pub record_id: String,

    /// New record data (for INSERT/UPDATE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_record: Option<Value>,

    /// Old record data (for UPDATE/DELETE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Value>,

    /// Timestamp of the change
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create an INSERT event
    pub fn insert(collection: impl Into<String>, record_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            collection: collection.into(),
            record_id: record_id.into(),
            new_record: Some(data),
            old_record: None,
            timestamp: Utc::now(),
        }
    }

    /// Create an UPDATE event
    pub fn update(
        collection: impl Into<String>,
        record_id: impl Into<String>,
        old_record: Value,
        new_record: Value,
    ) -> Self {
        Self {
            kind: ChangeKind::Update,
            collection: collection.into(),
            record_id: record_id.into(),
            new_record: Some(new_record),
            old_record: Some(old_record),
            timestamp: Utc::now(),
        }
    }

    /// Create a DELETE event carrying the record as it existed before deletion
    pub fn delete(collection: impl Into<String>, record_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            collection: collection.into(),
            record_id: record_id.into(),
            new_record: None,
            old_record: Some(data),
            timestamp: Utc::now(),
        }
    }

    /// The record payload relevant for this event: the new data for
    /// inserts/updates, the pre-deletion data for deletes.
    pub fn record(&self) -> Option<&Value> {
        self.new_record.as_ref().or(self.old_record.as_ref())
    }
}

/// An actor's declared "I am here" state on a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Actor ID
    pub actor_id: String,

    /// When the actor joined the channel
    pub connected_at: DateTime<Utc>,

    /// Actor-declared custom state
    pub state: Map<String, Value>,
}

impl PresenceRecord {
    /// Create a new presence record stamped with the current time
    pub fn new(actor_id: impl Into<String>, state: Map<String, Value>) -> Self {
        Self {
            actor_id: actor_id.into(),
            connected_at: Utc::now(),
            state,
        }
    }

    /// Merge a partial state patch into this record's state (old ∪ patch).
    /// The backend receives the full merged state on re-publish, never a
    /// partial patch.
    pub fn merged_with(&self, patch: &Map<String, Value>) -> Self {
        let mut state = self.state.clone();
        for (k, v) in patch {
            state.insert(k.clone(), v.clone());
        }
        Self {
            actor_id: self.actor_id.clone(),
            connected_at: self.connected_at,
            state,
        }
    }
}

/// A transient broadcast message. Never stored, only forwarded to the
/// subscribers present at the time of send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
    /// Event name (user-defined)
    pub event: String,

    /// Payload
    pub payload: Value,

    /// Timestamp
    pub sent_at: DateTime<Utc>,
}

impl SignalMessage {
    /// Create a new signal message
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
            sent_at: Utc::now(),
        }
    }
}

/// Connection state of a channel, surfaced to callers as a boolean-ish
/// connectivity signal. The transport never auto-reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Opened but not yet subscribed
    Opened,
    /// Subscribe handshake confirmed
    Subscribed,
    /// Channel-level error
    ChannelError,
    /// Subscribe or delivery timed out
    TimedOut,
    /// Closed by the owner
    Closed,
}

impl ChannelStatus {
    /// Whether this state counts as connected
    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelStatus::Subscribed)
    }
}

/// Everything a channel can deliver to its owner
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A row-level change matching the channel's descriptor
    Change(ChangeEvent),

    /// An ephemeral broadcast message
    Signal(SignalMessage),

    /// The channel's presence table changed; consumers should resync
    PresenceSync,

    /// Connection state transition
    Status(ChannelStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_kind_display() {
        assert_eq!(ChangeKind::Insert.to_string(), "INSERT");
        assert_eq!(ChangeKind::Update.to_string(), "UPDATE");
        assert_eq!(ChangeKind::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_insert_event() {
        let event = ChangeEvent::insert("projects", "p1", json!({"title": "Drive"}));

        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.collection, "projects");
        assert!(event.new_record.is_some());
        assert!(event.old_record.is_none());
        assert_eq!(event.record().unwrap()["title"], "Drive");
    }

    #[test]
    fn test_update_event() {
        let event = ChangeEvent::update(
            "projects",
            "p1",
            json!({"title": "Old"}),
            json!({"title": "New"}),
        );

        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.record().unwrap()["title"], "New");
    }

    #[test]
    fn test_delete_event_carries_old_record() {
        let event = ChangeEvent::delete("projects", "p1", json!({"title": "Gone"}));

        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.new_record.is_none());
        assert_eq!(event.record().unwrap()["title"], "Gone");
    }

    #[test]
    fn test_presence_merge_is_union() {
        let mut state = Map::new();
        state.insert("status".to_string(), json!("online"));
        state.insert("page".to_string(), json!("/budgets"));

        let record = PresenceRecord::new("actor-1", state);

        let mut patch = Map::new();
        patch.insert("page".to_string(), json!("/reports"));

        let merged = record.merged_with(&patch);
        assert_eq!(merged.state["status"], json!("online"));
        assert_eq!(merged.state["page"], json!("/reports"));
        assert_eq!(merged.connected_at, record.connected_at);
    }

    #[test]
    fn test_status_connectivity() {
        assert!(ChannelStatus::Subscribed.is_connected());
        assert!(!ChannelStatus::ChannelError.is_connected());
        assert!(!ChannelStatus::TimedOut.is_connected());
        assert!(!ChannelStatus::Closed.is_connected());
    }
}
