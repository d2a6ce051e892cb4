//! # Transport Backend Contract
//!
//! The backend is an opaque collaborator reached through this trait and
//! injected at construction time, never through ambient global state. Any
//! backend capable of row-change notification, ephemeral presence, and
//! ephemeral broadcast satisfies it.

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::changes::StreamDescriptor;
use crate::errors::SyncResult;
use crate::event::{ChannelEvent, PresenceRecord};

/// Event sender attached to an open channel
pub type EventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Event receiver owned by the channel's opener
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Opaque identifier for one opened channel instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Allocate a fresh channel id
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The channel-transport face of the backend service.
///
/// The transport performs no deduplication of opens: every `open` yields an
/// independent channel instance owned exclusively by its caller. `close` is
/// safe to call multiple times and releases every listener registered on
/// the channel.
pub trait ChannelTransport: Send + Sync {
    /// Open a channel on the given topic
    fn open(&self, topic: &str) -> SyncResult<ChannelId>;

    /// Attach the event sender for a channel. Events are not delivered
    /// before attachment.
    fn attach(&self, id: ChannelId, sender: EventSender) -> SyncResult<()>;

    /// Complete the subscribe handshake. The descriptor, if any, binds at
    /// this point and cannot be mutated afterwards.
    fn subscribe(&self, id: ChannelId, descriptor: Option<&StreamDescriptor>) -> SyncResult<()>;

    /// Publish a presence record on the channel. Undefined before the
    /// subscribe handshake confirms; the transport rejects it.
    fn track(&self, id: ChannelId, record: PresenceRecord) -> SyncResult<()>;

    /// Withdraw this channel's presence record
    fn untrack(&self, id: ChannelId) -> SyncResult<()>;

    /// The synced presence table for the channel's topic
    fn presence_table(&self, id: ChannelId) -> Vec<PresenceRecord>;

    /// Send an ephemeral broadcast on the channel's topic. Messages reach
    /// only the subscribers present at send time; with zero subscribers the
    /// message is silently dropped.
    fn send(&self, id: ChannelId, event: &str, payload: Value) -> SyncResult<()>;

    /// Close the channel and release its listeners. Idempotent.
    fn close(&self, id: ChannelId);
}

/// Response shape of the backend's request/response data API, consumed by
/// query fetchers and by the optimistic mutation's server-call step.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiResponse {
    /// Whether the call succeeded
    pub success: bool,

    /// Payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Backend-provided message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    /// Create a success response
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an empty success response
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    /// Create a failure response
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
