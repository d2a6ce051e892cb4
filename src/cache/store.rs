//! # Reactive Query Cache
//!
//! A keyed, stale-time-aware store of fetched collections and entities.
//! Fresh reads are served from cache without invoking the fetcher; fetch
//! errors are retried once before being surfaced as a terminal error
//! state.
//!
//! There is no cancellation token for in-flight fetches. Cancellation is
//! disabling the key: a response arriving after disablement is dropped,
//! never written.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{Duration, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::key::QueryKey;
use crate::transport::ApiResponse;

/// Stored fetch closure, re-invoked on refetch and settle
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, ApiResponse> + Send + Sync>;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Default freshness window
    pub stale_time: Duration,

    /// Automatic retries per failed fetch
    pub retry: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::seconds(30),
            retry: 1,
        }
    }
}

/// Per-query read options
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Disabled queries never fetch and never transition
    pub enabled: bool,

    /// Freshness window override for this key
    pub stale_time: Option<Duration>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_time: None,
        }
    }
}

/// Observable status of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Query disabled (e.g. required identifier missing); no future
    /// transition will occur
    Disabled,
    /// Fetch in flight
    Loading,
    /// Last fetch confirmed
    Success,
    /// Last fetch failed terminally
    Error,
}

/// Read-side view of one key
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    /// Visible data, if any
    pub data: Option<Value>,

    /// Status
    pub status: QueryStatus,

    /// Backend-provided message for terminal errors
    pub error: Option<String>,
}

impl QueryState {
    /// The disabled state: not loading, no data
    pub fn disabled() -> Self {
        Self {
            data: None,
            status: QueryStatus::Disabled,
            error: None,
        }
    }

    /// Fetch in flight, possibly with previous data still visible
    pub fn loading(data: Option<Value>) -> Self {
        Self {
            data,
            status: QueryStatus::Loading,
            error: None,
        }
    }

    /// Confirmed data
    pub fn success(data: Value) -> Self {
        Self {
            data: Some(data),
            status: QueryStatus::Success,
            error: None,
        }
    }

    /// Terminal fetch error
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            data: None,
            status: QueryStatus::Error,
            error: Some(message.into()),
        }
    }

    /// Whether a fetch is in flight
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    /// Whether confirmed data is available
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// Whether the last fetch failed terminally
    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// The terminal fetch error as a typed error, if any
    pub fn as_error(&self) -> Option<crate::errors::SyncError> {
        if self.is_error() {
            Some(crate::errors::SyncError::Fetch(
                self.error.clone().unwrap_or_else(|| "fetch failed".to_string()),
            ))
        } else {
            None
        }
    }
}

pub(crate) struct CacheInner {
    pub(crate) entries: RwLock<HashMap<QueryKey, CacheEntry>>,
    fetchers: RwLock<HashMap<QueryKey, Fetcher>>,
    generations: RwLock<HashMap<QueryKey, u64>>,
    loading: RwLock<HashSet<QueryKey>>,
    last_errors: RwLock<HashMap<QueryKey, String>>,
    pub(crate) mutation_locks: Mutex<HashMap<QueryKey, Arc<tokio::sync::Mutex<()>>>>,
    pub(crate) config: CacheConfig,
}

/// Keyed, stale-time-aware reactive cache
#[derive(Clone)]
pub struct QueryCache {
    pub(crate) inner: Arc<CacheInner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    /// Create a cache with default config
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                fetchers: RwLock::new(HashMap::new()),
                generations: RwLock::new(HashMap::new()),
                loading: RwLock::new(HashSet::new()),
                last_errors: RwLock::new(HashMap::new()),
                mutation_locks: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Read a key, fetching if no fresh value is cached.
    ///
    /// The fetcher is registered for the key and re-invoked on refetch and
    /// on mutation settle.
    pub async fn query<F, Fut>(&self, key: &QueryKey, fetcher: F, opts: QueryOptions) -> QueryState
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResponse> + Send + 'static,
    {
        if !opts.enabled {
            return QueryState::disabled();
        }

        let boxed: Fetcher =
            Arc::new(move || -> BoxFuture<'static, ApiResponse> { Box::pin(fetcher()) });
        if let Ok(mut fetchers) = self.inner.fetchers.write() {
            fetchers.insert(key.clone(), boxed);
        }

        let stale_time = opts.stale_time.unwrap_or(self.inner.config.stale_time);

        // Fresh cache hit: served without invoking the fetcher
        if let Some(value) = self.fresh_value(key) {
            return QueryState::success(value);
        }

        self.fetch_into(key, stale_time).await
    }

    /// Force a fetch for a key with a registered fetcher, ignoring
    /// freshness
    pub async fn refetch(&self, key: &QueryKey) -> QueryState {
        let stale_time = self
            .inner
            .entries
            .read()
            .ok()
            .and_then(|entries| entries.get(key).map(|e| e.stale_after))
            .unwrap_or(self.inner.config.stale_time);
        self.fetch_into(key, stale_time).await
    }

    async fn fetch_into(&self, key: &QueryKey, stale_time: Duration) -> QueryState {
        let generation = self.generation(key);
        let Some(fetcher) = self.fetcher(key) else {
            return QueryState::failure(format!("No fetcher registered for key: {key}"));
        };

        self.set_loading(key, true);

        let mut attempts = 0u32;
        let outcome = loop {
            let response = fetcher().await;
            if response.success {
                break Ok(response.data.unwrap_or(Value::Null));
            }
            attempts += 1;
            if attempts > self.inner.config.retry {
                break Err(response
                    .error
                    .unwrap_or_else(|| "fetch failed".to_string()));
            }
            debug!(%key, attempt = attempts, "fetch failed, retrying");
        };

        self.set_loading(key, false);

        // Late response: the key was disabled or removed mid-flight.
        if self.generation(key) != generation {
            debug!(%key, "dropping late fetch response");
            return QueryState::disabled();
        }

        match outcome {
            Ok(value) => {
                if let Ok(mut errors) = self.inner.last_errors.write() {
                    errors.remove(key);
                }
                let visible = {
                    let mut entries = match self.inner.entries.write() {
                        Ok(entries) => entries,
                        Err(_) => return QueryState::failure("Internal error: Lock poisoned"),
                    };
                    match entries.get_mut(key) {
                        // A pending overlay stays visible; the confirmed
                        // value lands on the next settle-driven refetch.
                        Some(entry) if entry.has_overlay() => {
                            entry.mark_stale();
                            entry.value.clone()
                        }
                        Some(entry) => {
                            entry.stale_after = stale_time;
                            entry.confirm(value.clone());
                            value
                        }
                        None => {
                            entries.insert(key.clone(), CacheEntry::new(value.clone(), stale_time));
                            value
                        }
                    }
                };
                QueryState::success(visible)
            }
            Err(message) => {
                warn!(%key, error = %message, "fetch failed terminally");
                if let Ok(mut errors) = self.inner.last_errors.write() {
                    errors.insert(key.clone(), message.clone());
                }
                QueryState::failure(message)
            }
        }
    }

    /// Observable state of a key without triggering a fetch
    pub fn state(&self, key: &QueryKey) -> QueryState {
        if self
            .inner
            .loading
            .read()
            .map(|l| l.contains(key))
            .unwrap_or(false)
        {
            return QueryState::loading(self.peek(key));
        }
        if let Some(value) = self.peek(key) {
            return QueryState::success(value);
        }
        if let Some(message) = self
            .inner
            .last_errors
            .read()
            .ok()
            .and_then(|e| e.get(key).cloned())
        {
            return QueryState::failure(message);
        }
        QueryState::disabled()
    }

    /// Current cached value for a key, fresh or not
    pub fn peek(&self, key: &QueryKey) -> Option<Value> {
        self.inner
            .entries
            .read()
            .ok()
            .and_then(|entries| entries.get(key).map(|e| e.value.clone()))
    }

    /// Mark one key stale; the next read refetches
    pub fn invalidate(&self, key: &QueryKey) {
        if let Ok(mut entries) = self.inner.entries.write() {
            if let Some(entry) = entries.get_mut(key) {
                entry.mark_stale();
            }
        }
    }

    /// Mark every key rooted at a collection stale
    pub fn invalidate_collection(&self, collection: &str) {
        if let Ok(mut entries) = self.inner.entries.write() {
            for (key, entry) in entries.iter_mut() {
                if key.collection() == collection {
                    entry.mark_stale();
                }
            }
        }
    }

    /// Write a confirmed server value directly (stream-bridge merges)
    pub fn write(&self, key: &QueryKey, value: Value) {
        if let Ok(mut entries) = self.inner.entries.write() {
            match entries.get_mut(key) {
                Some(entry) => entry.confirm(value),
                None => {
                    entries.insert(
                        key.clone(),
                        CacheEntry::new(value, self.inner.config.stale_time),
                    );
                }
            }
        }
    }

    /// Whether a pending optimistic overlay covers this key
    pub fn has_overlay(&self, key: &QueryKey) -> bool {
        self.inner
            .entries
            .read()
            .map(|entries| entries.get(key).map(CacheEntry::has_overlay).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Stop caring about a key's in-flight result. Any response that
    /// arrives afterwards is dropped.
    pub fn disable(&self, key: &QueryKey) {
        self.bump_generation(key);
        if let Ok(mut fetchers) = self.inner.fetchers.write() {
            fetchers.remove(key);
        }
        self.set_loading(key, false);
    }

    /// Drop a key entirely
    pub fn remove(&self, key: &QueryKey) {
        self.bump_generation(key);
        if let Ok(mut entries) = self.inner.entries.write() {
            entries.remove(key);
        }
        if let Ok(mut fetchers) = self.inner.fetchers.write() {
            fetchers.remove(key);
        }
        if let Ok(mut errors) = self.inner.last_errors.write() {
            errors.remove(key);
        }
    }

    pub(crate) fn fetcher(&self, key: &QueryKey) -> Option<Fetcher> {
        self.inner
            .fetchers
            .read()
            .ok()
            .and_then(|fetchers| fetchers.get(key).cloned())
    }

    fn fresh_value(&self, key: &QueryKey) -> Option<Value> {
        let entries = self.inner.entries.read().ok()?;
        let entry = entries.get(key)?;
        if entry.is_fresh(Utc::now()) {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn generation(&self, key: &QueryKey) -> u64 {
        self.inner
            .generations
            .read()
            .ok()
            .and_then(|g| g.get(key).copied())
            .unwrap_or(0)
    }

    fn bump_generation(&self, key: &QueryKey) {
        if let Ok(mut generations) = self.inner.generations.write() {
            *generations.entry(key.clone()).or_insert(0) += 1;
        }
    }

    fn set_loading(&self, key: &QueryKey, loading: bool) {
        if let Ok(mut set) = self.inner.loading.write() {
            if loading {
                set.insert(key.clone());
            } else {
                set.remove(key);
            }
        }
    }
}
