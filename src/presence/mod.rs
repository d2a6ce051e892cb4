//! # Presence Tracking
//!
//! Maintains a per-channel roster of connected actors and their declared
//! state. The roster is derived: recomputed from the transport's synced
//! presence table, never mutated in place.
//!
//! Updates are event-driven, with a fixed polling interval as the
//! reconciliation safety net for missed sync events. Presence is eventually
//! consistent — a departed actor vanishes from peer rosters within one
//! polling interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::{SyncError, SyncResult};
use crate::event::{ChannelEvent, ChannelStatus, PresenceRecord};
use crate::transport::{Channel, ChannelId, ChannelTransport, EventReceiver};

/// Configuration for presence tracking
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Roster resync interval
    pub poll_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Joins actors onto presence channels of an injected transport
pub struct PresenceTracker {
    transport: Arc<dyn ChannelTransport>,
    config: PresenceConfig,
}

impl PresenceTracker {
    /// Create a new tracker
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self::with_config(transport, PresenceConfig::default())
    }

    /// Create with custom config
    pub fn with_config(transport: Arc<dyn ChannelTransport>, config: PresenceConfig) -> Self {
        Self { transport, config }
    }

    /// Join a channel as `actor_id`, publishing `initial_state`.
    ///
    /// The actor's own record is published immediately upon confirmed
    /// subscription, never before.
    pub fn join(
        &self,
        channel_name: &str,
        actor_id: &str,
        initial_state: Map<String, Value>,
    ) -> SyncResult<PresenceHandle> {
        let (channel, rx) = Channel::open(Arc::clone(&self.transport), channel_name)?;
        channel.subscribe(None)?;

        let record = PresenceRecord::new(actor_id, initial_state);
        self.transport.track(channel.id(), record.clone())?;

        let roster = Arc::new(RwLock::new(self.transport.presence_table(channel.id())));
        let task = tokio::spawn(resync_loop(
            rx,
            Arc::clone(&self.transport),
            channel.id(),
            Arc::clone(&roster),
            self.config.poll_interval,
        ));

        Ok(PresenceHandle {
            channel,
            transport: Arc::clone(&self.transport),
            record: Mutex::new(record),
            roster,
            task,
            left: AtomicBool::new(false),
        })
    }
}

/// Recompute the roster on every presence-sync event, and on a fixed tick
/// to tolerate missed ones.
async fn resync_loop(
    mut rx: EventReceiver,
    transport: Arc<dyn ChannelTransport>,
    id: ChannelId,
    roster: Arc<RwLock<Vec<PresenceRecord>>>,
    poll_interval: Duration,
) {
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                resync(&transport, id, &roster);
            }
            event = rx.recv() => {
                match event {
                    Some(ChannelEvent::PresenceSync) => resync(&transport, id, &roster),
                    Some(ChannelEvent::Status(ChannelStatus::Closed)) | None => break,
                    Some(_) => {}
                }
            }
        }
    }
}

fn resync(
    transport: &Arc<dyn ChannelTransport>,
    id: ChannelId,
    roster: &Arc<RwLock<Vec<PresenceRecord>>>,
) {
    let table = transport.presence_table(id);
    debug!(channel = %id, actors = table.len(), "presence roster resynced");
    if let Ok(mut current) = roster.write() {
        *current = table;
    }
}

/// An actor's membership on one presence channel
pub struct PresenceHandle {
    channel: Channel,
    transport: Arc<dyn ChannelTransport>,
    record: Mutex<PresenceRecord>,
    roster: Arc<RwLock<Vec<PresenceRecord>>>,
    task: JoinHandle<()>,
    left: AtomicBool,
}

impl PresenceHandle {
    /// The last-synced roster
    pub fn roster(&self) -> Vec<PresenceRecord> {
        self.roster.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// Whether an actor is present on the last-synced roster. Returns
    /// false for any id not currently present, including ids that left
    /// before this handle joined.
    pub fn is_user_online(&self, actor_id: &str) -> bool {
        self.roster
            .read()
            .map(|r| r.iter().any(|p| p.actor_id == actor_id))
            .unwrap_or(false)
    }

    /// Merge `patch` into the actor's state and re-publish the full merged
    /// state. The backend always receives the complete state, never a
    /// partial patch.
    pub fn update_state(&self, patch: Map<String, Value>) -> SyncResult<()> {
        let merged = {
            let mut record = self
                .record
                .lock()
                .map_err(|_| SyncError::Internal("Lock poisoned".into()))?;
            let merged = record.merged_with(&patch);
            *record = merged.clone();
            merged
        };

        self.transport.track(self.channel.id(), merged)
    }

    /// Untrack the actor and close the channel. After this, the actor
    /// disappears from every other connected roster within one polling
    /// interval.
    pub fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        self.task.abort();
        let _ = self.transport.untrack(self.channel.id());
        self.channel.close();
        if let Ok(mut roster) = self.roster.write() {
            roster.clear();
        }
    }
}

impl Drop for PresenceHandle {
    fn drop(&mut self) {
        self.leave();
    }
}
