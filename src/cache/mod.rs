//! # Reactive Query Cache
//!
//! A keyed, stale-time-aware store of fetched data with two mutation
//! paths: plain invalidate-and-refetch, and optimistic-update-with-
//! rollback. Server-pushed changes are merged in by the stream bridge.
//!
//! A cache entry may be read by many consumers simultaneously but is
//! mutated only by its own fetcher's resolution, by the optimistic
//! mutation protocol for that exact key, or by the bridge applying a
//! matching change-stream event.

pub mod entry;
pub mod key;
pub mod mutation;
pub mod store;

pub use entry::CacheEntry;
pub use key::QueryKey;
pub use mutation::{MutationContext, MutationOptions, MutationOutcome};
pub use store::{CacheConfig, Fetcher, QueryCache, QueryOptions, QueryState, QueryStatus};
