//! # Optimistic Mutation Protocol
//!
//! A local cache write applied before server confirmation, paired with a
//! rollback path:
//!
//! ```text
//! IDLE -> SNAPSHOT_TAKEN -> OPTIMISTIC_APPLIED
//!      -> (server confirms) COMMITTED  -> SETTLED
//!      -> (server rejects)  ROLLED_BACK -> SETTLED
//! ```
//!
//! The snapshot is taken before the optimistic value is applied and is
//! restored exactly on failure, never an intermediate or merged value. On
//! settle the affected key is force-refetched and related list keys are
//! marked stale, never patched — list membership and ordering under a
//! filter are not knowable from a single-entity change.
//!
//! Same-key mutations are serialized: the second mutation waits for the
//! first to settle, so at most one mutation context exists per key.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::entry::CacheEntry;
use super::key::QueryKey;
use super::store::QueryCache;
use crate::errors::{SyncError, SyncResult};
use crate::transport::ApiResponse;

/// Snapshot of a key taken before an optimistic write. Exists only while
/// its owning mutation call is in flight; it is always consumed (committed
/// or rolled back) before that call resolves.
#[derive(Debug)]
pub struct MutationContext {
    target: QueryKey,
    previous: Option<Value>,
}

impl MutationContext {
    fn capture(cache: &QueryCache, target: &QueryKey) -> Self {
        Self {
            target: target.clone(),
            previous: cache.peek(target),
        }
    }

    /// The key this context snapshots
    pub fn target(&self) -> &QueryKey {
        &self.target
    }

    /// The pre-mutation value, if the key was cached
    pub fn previous(&self) -> Option<&Value> {
        self.previous.as_ref()
    }
}

/// Final result of one mutation call
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// Whether the server confirmed the mutation
    pub success: bool,

    /// The server's authoritative response data on success
    pub data: Option<Value>,

    /// Backend-provided message on rejection
    pub error: Option<String>,
}

impl MutationOutcome {
    /// The rejection as a typed error, if the server rejected the call
    pub fn as_error(&self) -> Option<SyncError> {
        if self.success {
            None
        } else {
            Some(SyncError::Mutation(
                self.error
                    .clone()
                    .unwrap_or_else(|| "mutation rejected".to_string()),
            ))
        }
    }
}

/// Per-mutation options
#[derive(Debug, Clone, Default)]
pub struct MutationOptions {
    /// Related keys (typically list queries containing the mutated
    /// entity) to mark stale on settle
    pub invalidate: Vec<QueryKey>,
}

impl QueryCache {
    /// Apply `optimistic` to `target`, run the server call, and reconcile.
    ///
    /// On success the cache holds the server's authoritative response, not
    /// the optimistic guess — the two may legitimately differ. On
    /// rejection the cache holds exactly the pre-mutation snapshot and the
    /// error is surfaced in the outcome. Either way the target is
    /// refetched on settle so cross-cutting invalidation converges.
    pub async fn mutate<F, Fut>(
        &self,
        target: &QueryKey,
        optimistic: Value,
        server_call: F,
        opts: MutationOptions,
    ) -> SyncResult<MutationOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResponse>,
    {
        if target.collection().is_empty() {
            return Err(SyncError::MissingIdentifier(
                "mutation target key has no collection".to_string(),
            ));
        }

        // Serialize same-key mutations: one in-flight context per key.
        let lock = self.mutation_lock(target);
        let _guard = lock.lock().await;

        let context = MutationContext::capture(self, target);
        debug!(key = %target, "mutation snapshot taken");

        self.apply_optimistic(target, optimistic);
        debug!(key = %target, "optimistic value applied");

        let response = server_call().await;

        let outcome = if response.success {
            self.commit(target, response.data.clone());
            debug!(key = %target, "mutation committed");
            MutationOutcome {
                success: true,
                data: response.data,
                error: None,
            }
        } else {
            let message = response
                .error
                .unwrap_or_else(|| "mutation rejected".to_string());
            self.rollback(target, context);
            debug!(key = %target, error = %message, "mutation rolled back");
            MutationOutcome {
                success: false,
                data: None,
                error: Some(message),
            }
        };

        // Settle: related lists go stale, the target refetches.
        for key in &opts.invalidate {
            self.invalidate(key);
        }
        self.invalidate(target);
        if self.fetcher(target).is_some() {
            let _ = self.refetch(target).await;
        }

        Ok(outcome)
    }

    fn apply_optimistic(&self, target: &QueryKey, value: Value) {
        if let Ok(mut entries) = self.inner.entries.write() {
            match entries.get_mut(target) {
                Some(entry) => entry.apply_overlay(value),
                None => {
                    let mut entry = CacheEntry::new(Value::Null, self.inner.config.stale_time);
                    entry.apply_overlay(value);
                    entries.insert(target.clone(), entry);
                }
            }
        }
    }

    fn commit(&self, target: &QueryKey, data: Option<Value>) {
        if let Ok(mut entries) = self.inner.entries.write() {
            if let Some(entry) = entries.get_mut(target) {
                match data {
                    // The server's response is authoritative, not the guess.
                    Some(value) => entry.confirm(value),
                    None => {
                        entry.clear_overlay();
                        entry.mark_stale();
                    }
                }
            }
        }
    }

    fn rollback(&self, target: &QueryKey, context: MutationContext) {
        if let Ok(mut entries) = self.inner.entries.write() {
            match context.previous {
                Some(previous) => {
                    if let Some(entry) = entries.get_mut(target) {
                        entry.confirm(previous);
                        entry.mark_stale();
                    }
                }
                // No entry existed before the mutation: restore that.
                None => {
                    entries.remove(target);
                }
            }
        }
    }

    pub(crate) fn mutation_lock(&self, key: &QueryKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.inner.mutation_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}
