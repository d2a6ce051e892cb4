//! # Cache Entries
//!
//! A keyed, staleness-timestamped unit of fetched data.
//!
//! The visible value of an entry at any instant is either the last
//! confirmed server value or that value with at most one still-pending
//! optimistic overlay applied on top.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// One cached value with its staleness bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Currently visible value
    pub value: Value,

    /// When the value was last confirmed or merged
    pub fetched_at: DateTime<Utc>,

    /// How long the value counts as fresh
    pub stale_after: Duration,

    stale: bool,
    overlay: bool,
}

impl CacheEntry {
    /// Entry holding a freshly confirmed value
    pub fn new(value: Value, stale_after: Duration) -> Self {
        Self {
            value,
            fetched_at: Utc::now(),
            stale_after,
            stale: false,
            overlay: false,
        }
    }

    /// Whether the value may be served without refetching
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.stale && now - self.fetched_at < self.stale_after
    }

    /// Force the next read to refetch
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Replace with a confirmed server value, resetting staleness
    pub fn confirm(&mut self, value: Value) {
        self.value = value;
        self.fetched_at = Utc::now();
        self.stale = false;
        self.overlay = false;
    }

    /// Whether an optimistic overlay is pending on this entry
    pub fn has_overlay(&self) -> bool {
        self.overlay
    }

    /// Apply an optimistic overlay value
    pub fn apply_overlay(&mut self, value: Value) {
        self.value = value;
        self.overlay = true;
    }

    /// Drop the overlay flag without touching the value
    pub fn clear_overlay(&mut self) {
        self.overlay = false;
    }
}
