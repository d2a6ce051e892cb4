//! # Local Hub
//!
//! In-process implementation of [`ChannelTransport`]: a routing registry
//! that fans change notifications out to matching subscribed channels,
//! keeps a per-topic presence table, and forwards ephemeral broadcasts.
//!
//! Delivery is best-effort. Within one channel, delivery order matches
//! publish order; across channels no relative ordering is guaranteed.
//!
//! The hub backs the test suite and any embedding that runs the backend
//! and its consumers in one process.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use tracing::debug;

use super::backend::{ChannelId, ChannelTransport, EventSender};
use crate::changes::StreamDescriptor;
use crate::errors::{SyncError, SyncResult};
use crate::event::{ChangeEvent, ChannelEvent, ChannelStatus, PresenceRecord, SignalMessage};

/// Hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum broadcast payload size in bytes
    pub max_signal_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_signal_bytes: 65536, // 64KB
        }
    }
}

/// One opened channel as the hub sees it
#[derive(Debug)]
struct Slot {
    topic: String,
    sender: Option<EventSender>,
    descriptor: Option<StreamDescriptor>,
    subscribed: bool,
    presence: Option<PresenceRecord>,
}

/// Result of fanning one event out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Channels whose descriptor matched the event
    pub matched: usize,
    /// Events actually enqueued
    pub delivered: usize,
    /// Matches that could not be enqueued (listener gone)
    pub dropped: usize,
}

/// In-process channel transport
#[derive(Debug, Default)]
pub struct LocalHub {
    slots: RwLock<HashMap<ChannelId, Slot>>,
    config: HubConfig,
}

impl LocalHub {
    /// Create a new hub
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: HubConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Ingest a backend change notification and fan it out to every
    /// subscribed channel whose descriptor matches.
    pub fn publish(&self, event: &ChangeEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let slots = match self.slots.read() {
            Ok(s) => s,
            Err(_) => return outcome,
        };

        for slot in slots.values() {
            if !slot.subscribed {
                continue;
            }
            let Some(descriptor) = &slot.descriptor else {
                continue;
            };
            if !descriptor.matches(event) {
                continue;
            }

            outcome.matched += 1;
            match &slot.sender {
                Some(sender) if sender.send(ChannelEvent::Change(event.clone())).is_ok() => {
                    outcome.delivered += 1;
                }
                _ => outcome.dropped += 1,
            }
        }

        debug!(
            collection = %event.collection,
            kind = %event.kind,
            matched = outcome.matched,
            delivered = outcome.delivered,
            "change dispatched"
        );
        outcome
    }

    /// Push a status transition to every subscribed channel whose topic
    /// starts with `topic`. Used to simulate channel errors and timeouts.
    pub fn inject_status(&self, topic: &str, status: ChannelStatus) {
        if let Ok(slots) = self.slots.read() {
            for slot in slots.values() {
                if slot.topic.starts_with(topic) && slot.subscribed {
                    if let Some(sender) = &slot.sender {
                        let _ = sender.send(ChannelEvent::Status(status));
                    }
                }
            }
        }
    }

    /// Number of currently open channels
    pub fn channel_count(&self) -> usize {
        self.slots.read().map(|s| s.len()).unwrap_or(0)
    }

    fn topic_of(&self, id: ChannelId) -> Option<String> {
        self.slots
            .read()
            .ok()
            .and_then(|slots| slots.get(&id).map(|s| s.topic.clone()))
    }

    /// Notify subscribed peers on `topic` that the presence table changed
    fn notify_presence(&self, topic: &str) {
        if let Ok(slots) = self.slots.read() {
            for slot in slots.values() {
                if slot.topic == topic && slot.subscribed {
                    if let Some(sender) = &slot.sender {
                        let _ = sender.send(ChannelEvent::PresenceSync);
                    }
                }
            }
        }
    }
}

impl ChannelTransport for LocalHub {
    fn open(&self, topic: &str) -> SyncResult<ChannelId> {
        let id = ChannelId::fresh();
        let mut slots = self
            .slots
            .write()
            .map_err(|_| SyncError::Internal("Lock poisoned".into()))?;

        slots.insert(
            id,
            Slot {
                topic: topic.to_string(),
                sender: None,
                descriptor: None,
                subscribed: false,
                presence: None,
            },
        );
        Ok(id)
    }

    fn attach(&self, id: ChannelId, sender: EventSender) -> SyncResult<()> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| SyncError::Internal("Lock poisoned".into()))?;

        match slots.get_mut(&id) {
            Some(slot) => {
                slot.sender = Some(sender);
                Ok(())
            }
            None => Err(SyncError::ChannelNotFound(id.to_string())),
        }
    }

    fn subscribe(&self, id: ChannelId, descriptor: Option<&StreamDescriptor>) -> SyncResult<()> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| SyncError::Internal("Lock poisoned".into()))?;

        match slots.get_mut(&id) {
            Some(slot) => {
                slot.descriptor = descriptor.cloned();
                slot.subscribed = true;
                if let Some(sender) = &slot.sender {
                    let _ = sender.send(ChannelEvent::Status(ChannelStatus::Subscribed));
                }
                Ok(())
            }
            None => Err(SyncError::ChannelNotFound(id.to_string())),
        }
    }

    fn track(&self, id: ChannelId, record: PresenceRecord) -> SyncResult<()> {
        let topic = {
            let mut slots = self
                .slots
                .write()
                .map_err(|_| SyncError::Internal("Lock poisoned".into()))?;

            let slot = slots
                .get_mut(&id)
                .ok_or_else(|| SyncError::ChannelNotFound(id.to_string()))?;

            // Publishing before the subscribe handshake confirms is unsent.
            if !slot.subscribed {
                return Err(SyncError::NotSubscribed);
            }

            slot.presence = Some(record);
            slot.topic.clone()
        };

        self.notify_presence(&topic);
        Ok(())
    }

    fn untrack(&self, id: ChannelId) -> SyncResult<()> {
        let topic = {
            let mut slots = self
                .slots
                .write()
                .map_err(|_| SyncError::Internal("Lock poisoned".into()))?;

            match slots.get_mut(&id) {
                Some(slot) => {
                    slot.presence = None;
                    slot.topic.clone()
                }
                // Untracking a closed channel is a no-op.
                None => return Ok(()),
            }
        };

        self.notify_presence(&topic);
        Ok(())
    }

    fn presence_table(&self, id: ChannelId) -> Vec<PresenceRecord> {
        let Some(topic) = self.topic_of(id) else {
            return Vec::new();
        };

        self.slots
            .read()
            .map(|slots| {
                slots
                    .values()
                    .filter(|s| s.topic == topic)
                    .filter_map(|s| s.presence.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn send(&self, id: ChannelId, event: &str, payload: Value) -> SyncResult<()> {
        let payload_size = serde_json::to_string(&payload).map(|s| s.len()).unwrap_or(0);
        if payload_size > self.config.max_signal_bytes {
            return Err(SyncError::MessageTooLarge(self.config.max_signal_bytes));
        }

        let slots = self
            .slots
            .read()
            .map_err(|_| SyncError::Internal("Lock poisoned".into()))?;

        let topic = slots
            .get(&id)
            .map(|s| s.topic.clone())
            .ok_or_else(|| SyncError::ChannelNotFound(id.to_string()))?;

        let message = SignalMessage::new(event, payload);

        // Forwarded only to subscribers present right now; zero subscribers
        // means the message is silently dropped.
        for (slot_id, slot) in slots.iter() {
            if *slot_id == id || slot.topic != topic || !slot.subscribed {
                continue;
            }
            if let Some(sender) = &slot.sender {
                let _ = sender.send(ChannelEvent::Signal(message.clone()));
            }
        }

        Ok(())
    }

    fn close(&self, id: ChannelId) {
        let removed = {
            let Ok(mut slots) = self.slots.write() else {
                return;
            };
            slots.remove(&id)
        };

        // A tracked actor leaving must vanish from peer rosters.
        if let Some(slot) = removed {
            if slot.presence.is_some() {
                self.notify_presence(&slot.topic);
            }
        }
    }
}
