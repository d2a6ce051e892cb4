//! # Typing Indicators
//!
//! A low-stakes consumer of the signal bus: tracks which remote actors are
//! currently typing in a shared context. Each remote actor gets its own
//! expiry timer, held in an explicit timer table owned by the watcher —
//! actor A's timeout never affects actor B's visibility.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use super::{SignalBus, SignalSubscription};
use crate::errors::SyncResult;
use crate::event::SignalMessage;

/// Signal event name announcing that an actor is typing
pub const TYPING_EVENT: &str = "typing";

/// Signal event name announcing that an actor stopped typing
pub const STOPPED_TYPING_EVENT: &str = "stopped_typing";

/// Configuration for typing indicators
#[derive(Debug, Clone)]
pub struct TypingConfig {
    /// How long an actor stays visible without a renewed typing signal
    pub expiry: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            expiry: Duration::from_millis(3000),
        }
    }
}

type TypingSet = Arc<RwLock<HashSet<String>>>;
type TimerTable = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

/// Watches a channel for typing signals from remote actors
pub struct TypingWatcher {
    bus: SignalBus,
    channel_name: String,
    local_actor: String,
    typing: TypingSet,
    timers: TimerTable,
    subscription: SignalSubscription,
}

impl TypingWatcher {
    /// Start watching `channel_name` as `local_actor`
    pub fn watch(bus: &SignalBus, channel_name: &str, local_actor: &str) -> SyncResult<Self> {
        Self::with_config(bus, channel_name, local_actor, TypingConfig::default())
    }

    /// Start watching with custom config
    pub fn with_config(
        bus: &SignalBus,
        channel_name: &str,
        local_actor: &str,
        config: TypingConfig,
    ) -> SyncResult<Self> {
        let typing: TypingSet = Arc::new(RwLock::new(HashSet::new()));
        let timers: TimerTable = Arc::new(Mutex::new(HashMap::new()));

        let subscription = {
            let typing = Arc::clone(&typing);
            let timers = Arc::clone(&timers);
            let local = local_actor.to_string();
            let expiry = config.expiry;
            bus.subscribe(channel_name, move |message| {
                handle_signal(&typing, &timers, &local, expiry, &message);
            })?
        };

        Ok(Self {
            bus: bus.clone(),
            channel_name: channel_name.to_string(),
            local_actor: local_actor.to_string(),
            typing,
            timers,
            subscription,
        })
    }

    /// Remote actors currently typing, sorted for stable display
    pub fn typing_actors(&self) -> Vec<String> {
        let mut actors: Vec<String> = self
            .typing
            .read()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        actors.sort();
        actors
    }

    /// Whether a specific actor is currently typing
    pub fn is_typing(&self, actor_id: &str) -> bool {
        self.typing
            .read()
            .map(|set| set.contains(actor_id))
            .unwrap_or(false)
    }

    /// Announce that the local actor is typing. Call repeatedly while
    /// typing continues; remote watchers re-arm their expiry on each
    /// signal.
    pub fn announce_typing(&self) -> SyncResult<()> {
        self.bus.send(
            &self.channel_name,
            TYPING_EVENT,
            json!({"actor_id": self.local_actor}),
        )
    }

    /// Announce that the local actor stopped typing
    pub fn announce_stopped(&self) -> SyncResult<()> {
        self.bus.send(
            &self.channel_name,
            STOPPED_TYPING_EVENT,
            json!({"actor_id": self.local_actor}),
        )
    }

    /// Stop watching: cancel every pending timer, clear the visible set,
    /// and close the subscription.
    pub fn stop(&self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, timer) in timers.drain() {
                timer.abort();
            }
        }
        if let Ok(mut typing) = self.typing.write() {
            typing.clear();
        }
        self.subscription.unsubscribe();
    }
}

impl Drop for TypingWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_signal(
    typing: &TypingSet,
    timers: &TimerTable,
    local_actor: &str,
    expiry: Duration,
    message: &SignalMessage,
) {
    let Some(actor) = message.payload.get("actor_id").and_then(|v| v.as_str()) else {
        return;
    };
    // No self-echo
    if actor == local_actor {
        return;
    }

    match message.event.as_str() {
        TYPING_EVENT => {
            if let Ok(mut set) = typing.write() {
                set.insert(actor.to_string());
            }
            arm_timer(typing, timers, actor, expiry);
        }
        STOPPED_TYPING_EVENT => {
            if let Ok(mut set) = typing.write() {
                set.remove(actor);
            }
            if let Ok(mut table) = timers.lock() {
                if let Some(timer) = table.remove(actor) {
                    timer.abort();
                }
            }
        }
        _ => {}
    }
}

/// (Re-)arm the expiry timer for one actor, cancelling any pending one
fn arm_timer(typing: &TypingSet, timers: &TimerTable, actor: &str, expiry: Duration) {
    let timer = tokio::spawn({
        let typing = Arc::clone(typing);
        let timers = Arc::clone(timers);
        let actor = actor.to_string();
        async move {
            tokio::time::sleep(expiry).await;
            if let Ok(mut set) = typing.write() {
                set.remove(&actor);
            }
            if let Ok(mut table) = timers.lock() {
                table.remove(&actor);
            }
        }
    });

    if let Ok(mut table) = timers.lock() {
        if let Some(previous) = table.insert(actor.to_string(), timer) {
            previous.abort();
        }
    }
}
