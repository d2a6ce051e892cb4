//! # portalsync
//!
//! Real-time synchronization subsystem for role-based dashboard portals.
//!
//! Turns backend change notifications into typed local events, tracks
//! which actors are concurrently present in a shared context, carries
//! ephemeral signaling between them, and reconciles a client-side query
//! cache against both optimistic local mutations and server-pushed
//! updates — so the UI never shows a state the server has not (or no
//! longer) confirmed.
//!
//! ## Architecture
//!
//! - **Transport**: named bidirectional event channels; the backend is an
//!   opaque collaborator injected through [`transport::ChannelTransport`]
//! - **Changes**: per-collection change streams with typed decode at the
//!   boundary
//! - **Presence**: per-channel actor rosters, event-driven with polled
//!   reconciliation
//! - **Broadcast**: fire-and-forget signals and typing indicators
//! - **Cache**: stale-time-aware query cache with optimistic mutations
//!   and rollback
//! - **Bridge**: merges change-stream events into cached lists without a
//!   refetch

pub mod bridge;
pub mod broadcast;
pub mod cache;
pub mod changes;
pub mod errors;
pub mod event;
pub mod presence;
pub mod transport;

pub use bridge::StreamBridge;
pub use broadcast::{SignalBus, SignalSubscription, TypingConfig, TypingWatcher};
pub use cache::{
    CacheConfig, MutationOptions, MutationOutcome, QueryCache, QueryKey, QueryOptions, QueryState,
    QueryStatus,
};
pub use changes::{
    ChangeHandlers, ChangeStreamManager, Predicate, PredicateOp, StreamDescriptor, StreamHandle,
};
pub use errors::{SyncError, SyncResult};
pub use event::{ChangeEvent, ChangeKind, ChannelEvent, ChannelStatus, PresenceRecord, SignalMessage};
pub use presence::{PresenceConfig, PresenceHandle, PresenceTracker};
pub use transport::{ApiResponse, Channel, ChannelId, ChannelTransport, LocalHub};
