//! # Broadcast Signal Bus
//!
//! Fire-and-forget ephemeral messages between actors on the same channel.
//! No persistence, no replay: a message reaches only the listeners
//! subscribed at the time of send, and a channel with zero subscribers
//! silently drops it.

pub mod typing;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::errors::{SyncError, SyncResult};
use crate::event::{ChannelEvent, ChannelStatus, SignalMessage};
use crate::transport::{Channel, ChannelTransport};

pub use typing::{TypingConfig, TypingWatcher, STOPPED_TYPING_EVENT, TYPING_EVENT};

struct BusInner {
    transport: Arc<dyn ChannelTransport>,
    /// Lazily opened send-only channels, one per topic
    publishers: RwLock<HashMap<String, Channel>>,
}

/// Ephemeral signaling bus over an injected transport
#[derive(Clone)]
pub struct SignalBus {
    inner: Arc<BusInner>,
}

impl SignalBus {
    /// Create a new bus
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                transport,
                publishers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Listen for signals on a channel
    pub fn subscribe(
        &self,
        channel_name: &str,
        on_message: impl Fn(SignalMessage) + Send + Sync + 'static,
    ) -> SyncResult<SignalSubscription> {
        let (channel, mut rx) = Channel::open(Arc::clone(&self.inner.transport), channel_name)?;
        channel.subscribe(None)?;

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ChannelEvent::Signal(message) => on_message(message),
                    ChannelEvent::Status(ChannelStatus::Closed) => break,
                    _ => {}
                }
            }
        });

        Ok(SignalSubscription {
            channel,
            task,
            done: AtomicBool::new(false),
        })
    }

    /// Send a signal on a channel. Delivery is best-effort to current
    /// subscribers only.
    pub fn send(&self, channel_name: &str, event: &str, payload: Value) -> SyncResult<()> {
        {
            let publishers = self
                .inner
                .publishers
                .read()
                .map_err(|_| SyncError::Internal("Lock poisoned".into()))?;
            if let Some(channel) = publishers.get(channel_name) {
                return self.inner.transport.send(channel.id(), event, payload);
            }
        }

        // First send on this topic: open a send-only channel and keep it.
        let (channel, _rx) = Channel::open(Arc::clone(&self.inner.transport), channel_name)?;

        let mut publishers = self
            .inner
            .publishers
            .write()
            .map_err(|_| SyncError::Internal("Lock poisoned".into()))?;
        let channel = publishers
            .entry(channel_name.to_string())
            .or_insert(channel);
        self.inner.transport.send(channel.id(), event, payload)
    }

    /// Close every publisher channel this bus opened
    pub fn close(&self) {
        if let Ok(mut publishers) = self.inner.publishers.write() {
            publishers.clear();
        }
    }
}

/// An active signal listener
pub struct SignalSubscription {
    channel: Channel,
    task: JoinHandle<()>,
    done: AtomicBool,
}

impl SignalSubscription {
    /// Whether the underlying channel is connected
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Stop listening and close the channel. Idempotent.
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.task.abort();
        self.channel.close();
    }
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
