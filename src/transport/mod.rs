//! # Channel Transport
//!
//! The foundation every other sync component multiplexes on: named,
//! bidirectional event channels to the backend.
//!
//! ## Architecture
//!
//! - **Backend contract**: [`ChannelTransport`] trait, injected into every
//!   component at construction time
//! - **Channel**: client-side handle with an owned lifecycle
//! - **Local hub**: in-process transport implementation used by tests and
//!   single-process embeddings

pub mod backend;
pub mod channel;
pub mod hub;

pub use backend::{ApiResponse, ChannelId, ChannelTransport, EventReceiver, EventSender};
pub use channel::{Channel, StatusCell};
pub use hub::{DispatchOutcome, HubConfig, LocalHub};
