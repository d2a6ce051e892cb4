//! # Channel Handle
//!
//! Client-side handle over one opened transport channel. Lifecycle:
//! `opened → subscribed → {active | errored | timed_out} → closed`.
//!
//! A channel is owned exclusively by the component that opened it and is
//! never shared by reference across components. Dropping the handle closes
//! the channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use super::backend::{ChannelId, ChannelTransport, EventReceiver};
use crate::changes::StreamDescriptor;
use crate::errors::{SyncError, SyncResult};
use crate::event::ChannelStatus;

/// Shared view of a channel's connection state, updated by the owner's
/// event pump as status transitions arrive.
pub type StatusCell = Arc<RwLock<ChannelStatus>>;

/// An opened transport channel
pub struct Channel {
    topic: String,
    id: ChannelId,
    transport: Arc<dyn ChannelTransport>,
    status: StatusCell,
    closed: AtomicBool,
}

impl Channel {
    /// Open a channel on `topic` and attach an event queue to it.
    ///
    /// The returned receiver delivers every event the transport routes to
    /// this channel, in transport order.
    pub fn open(
        transport: Arc<dyn ChannelTransport>,
        topic: &str,
    ) -> SyncResult<(Self, EventReceiver)> {
        let id = transport.open(topic)?;
        let (tx, rx) = mpsc::unbounded_channel();
        transport.attach(id, tx)?;

        let channel = Self {
            topic: topic.to_string(),
            id,
            transport,
            status: Arc::new(RwLock::new(ChannelStatus::Opened)),
            closed: AtomicBool::new(false),
        };

        Ok((channel, rx))
    }

    /// Complete the subscribe handshake. The descriptor binds at open time
    /// and cannot be changed afterwards; callers wanting a different
    /// descriptor close this channel and open a new one.
    pub fn subscribe(&self, descriptor: Option<&StreamDescriptor>) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::ChannelClosed);
        }
        self.transport.subscribe(self.id, descriptor)?;
        self.set_status(ChannelStatus::Subscribed);
        Ok(())
    }

    /// The topic this channel was opened on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The transport-assigned channel id
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Current connection state
    pub fn status(&self) -> ChannelStatus {
        self.status
            .read()
            .map(|s| *s)
            .unwrap_or(ChannelStatus::ChannelError)
    }

    /// Record a status transition
    pub fn set_status(&self, status: ChannelStatus) {
        if let Ok(mut s) = self.status.write() {
            *s = status;
        }
    }

    /// Shared status cell for event pumps
    pub fn status_cell(&self) -> StatusCell {
        Arc::clone(&self.status)
    }

    /// Whether the channel is currently connected
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// The transport this channel was opened on
    pub fn transport(&self) -> &Arc<dyn ChannelTransport> {
        &self.transport
    }

    /// Close the channel. Safe to call multiple times; releases all
    /// registered listeners so the channel stops consuming resources and
    /// delivering events.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.close(self.id);
        self.set_status(ChannelStatus::Closed);
    }

    /// Whether `close` has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}
