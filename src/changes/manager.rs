//! # Change Stream Subscription Manager
//!
//! Subscribes to inserts/updates/deletes for one collection and routes each
//! delivered event to exactly one of the registered callbacks, in backend
//! delivery order.
//!
//! Activation is caller-driven: disabling a stream synchronously closes its
//! channel; enabling opens a fresh one and re-registers callbacks. Changing
//! the descriptor closes the old channel and opens a new one — predicates
//! bind at channel-open time and are never mutated in place.
//!
//! A channel error or timeout degrades connectivity without raising:
//! subscription loss means "data may be stale", not a fatal error, and no
//! events are synthesized to compensate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::warn;

use super::descriptor::StreamDescriptor;
use crate::errors::{SyncError, SyncResult};
use crate::event::{ChangeEvent, ChangeKind, ChannelEvent, ChannelStatus};
use crate::transport::{Channel, ChannelTransport, EventReceiver, StatusCell};

/// Callback invoked with a delivered change event
pub type ChangeCallback = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Per-kind callbacks for one stream
#[derive(Default)]
pub struct ChangeHandlers {
    on_insert: Option<ChangeCallback>,
    on_update: Option<ChangeCallback>,
    on_delete: Option<ChangeCallback>,
    on_any: Option<ChangeCallback>,
}

impl ChangeHandlers {
    /// Create an empty handler set
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked with the new record on every insert
    pub fn on_insert(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_insert = Some(Box::new(f));
        self
    }

    /// Invoked with the new record on every update
    pub fn on_update(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    /// Invoked with the pre-deletion record on every delete
    pub fn on_delete(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Box::new(f));
        self
    }

    /// Invoked after the kind-specific callback for every event
    pub fn on_any(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_any = Some(Box::new(f));
        self
    }

    /// Route one event to exactly one kind-specific callback, then `on_any`
    pub(crate) fn dispatch(&self, event: &ChangeEvent) {
        let handler = match event.kind {
            ChangeKind::Insert => &self.on_insert,
            ChangeKind::Update => &self.on_update,
            ChangeKind::Delete => &self.on_delete,
        };
        if let Some(f) = handler {
            f(event);
        }
        if let Some(f) = &self.on_any {
            f(event);
        }
    }
}

struct Active {
    channel: Channel,
    pump: JoinHandle<()>,
}

struct StreamInner {
    transport: Arc<dyn ChannelTransport>,
    descriptor: Mutex<StreamDescriptor>,
    handlers: Arc<ChangeHandlers>,
    connected: Arc<AtomicBool>,
    enabled: AtomicBool,
    active: Mutex<Option<Active>>,
}

impl StreamInner {
    /// Open a fresh channel for the current descriptor and start its pump.
    /// Each activation gets its own time-suffixed topic so concurrently
    /// mounted consumers never collide.
    fn activate(self: &Arc<Self>) -> SyncResult<()> {
        let descriptor = self
            .descriptor
            .lock()
            .map_err(|_| SyncError::Internal("Lock poisoned".into()))?
            .clone();

        let topic = format!("{}:{}", descriptor.topic(), Utc::now().timestamp_millis());
        let (channel, rx) = Channel::open(Arc::clone(&self.transport), &topic)?;
        channel.subscribe(Some(&descriptor))?;
        self.connected.store(true, Ordering::SeqCst);

        let pump = tokio::spawn(pump_events(
            rx,
            Arc::clone(&self.handlers),
            Arc::clone(&self.connected),
            channel.status_cell(),
            topic,
        ));

        if let Ok(mut active) = self.active.lock() {
            *active = Some(Active { channel, pump });
        }
        Ok(())
    }

    /// Synchronously close the active channel, if any, and clear
    /// connectivity.
    fn deactivate(&self) {
        let taken = self.active.lock().ok().and_then(|mut a| a.take());
        if let Some(active) = taken {
            active.channel.close();
            active.pump.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

async fn pump_events(
    mut rx: EventReceiver,
    handlers: Arc<ChangeHandlers>,
    connected: Arc<AtomicBool>,
    status: StatusCell,
    topic: String,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ChannelEvent::Change(change) => handlers.dispatch(&change),
            ChannelEvent::Status(s) => {
                if let Ok(mut cell) = status.write() {
                    *cell = s;
                }
                connected.store(s.is_connected(), Ordering::SeqCst);
                if !s.is_connected() {
                    warn!(%topic, status = ?s, "change stream degraded; data may be stale");
                }
                if s == ChannelStatus::Closed {
                    break;
                }
            }
            _ => {}
        }
    }
    connected.store(false, Ordering::SeqCst);
}

/// Handle over one subscribed change stream
pub struct StreamHandle {
    inner: Arc<StreamInner>,
}

impl StreamHandle {
    /// Whether the underlying channel is currently connected
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Whether the stream is currently enabled
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Flip the activation flag. `false` synchronously closes the channel
    /// and clears connectivity; `true` opens a fresh channel with the same
    /// callbacks.
    pub fn set_enabled(&self, enabled: bool) -> SyncResult<()> {
        let was = self.inner.enabled.swap(enabled, Ordering::SeqCst);
        if was == enabled {
            return Ok(());
        }
        if enabled {
            self.inner.activate()
        } else {
            self.inner.deactivate();
            Ok(())
        }
    }

    /// Replace the descriptor. Treated as closing the old channel and
    /// opening a new one, never as mutating the old one in place.
    pub fn set_descriptor(&self, descriptor: StreamDescriptor) -> SyncResult<()> {
        {
            let mut current = self
                .inner
                .descriptor
                .lock()
                .map_err(|_| SyncError::Internal("Lock poisoned".into()))?;
            *current = descriptor;
        }

        if self.is_enabled() {
            self.inner.deactivate();
            self.inner.activate()
        } else {
            Ok(())
        }
    }

    /// The stream's current descriptor
    pub fn descriptor(&self) -> StreamDescriptor {
        self.inner
            .descriptor
            .lock()
            .map(|d| d.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    /// Tear the stream down. Idempotent: calling twice produces no error
    /// and leaves zero active listeners.
    pub fn unsubscribe(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        self.inner.deactivate();
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Opens change streams against an injected transport
pub struct ChangeStreamManager {
    transport: Arc<dyn ChannelTransport>,
}

impl ChangeStreamManager {
    /// Create a new manager
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self { transport }
    }

    /// Subscribe to the stream described by `descriptor`, activating it
    /// immediately.
    pub fn subscribe(
        &self,
        descriptor: StreamDescriptor,
        handlers: ChangeHandlers,
    ) -> SyncResult<StreamHandle> {
        let inner = Arc::new(StreamInner {
            transport: Arc::clone(&self.transport),
            descriptor: Mutex::new(descriptor),
            handlers: Arc::new(handlers),
            connected: Arc::new(AtomicBool::new(false)),
            enabled: AtomicBool::new(true),
            active: Mutex::new(None),
        });

        inner.activate()?;
        Ok(StreamHandle { inner })
    }
}
