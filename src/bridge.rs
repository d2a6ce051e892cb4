//! # Cache/Stream Bridge
//!
//! Feeds change-stream events into the query cache so server-pushed
//! changes merge into already-cached lists without a full refetch:
//! inserts prepend, updates replace in place, deletes remove.
//!
//! A bridge-driven update never stomps a pending optimistic overlay: when
//! the target key has one, the entry is marked stale instead and the
//! confirmed value lands on the next settle-driven refetch.

use serde_json::Value;
use tracing::debug;

use crate::cache::{QueryCache, QueryKey};
use crate::changes::{ChangeHandlers, ChangeStreamManager, StreamDescriptor, StreamHandle};
use crate::errors::SyncResult;
use crate::event::{ChangeEvent, ChangeKind};

/// Merges change-stream events into list-valued cache entries
pub struct StreamBridge {
    cache: QueryCache,
    id_field: String,
}

impl StreamBridge {
    /// Bridge matching records by their `id` field
    pub fn new(cache: QueryCache) -> Self {
        Self::with_id_field(cache, "id")
    }

    /// Bridge matching records by a custom identifier field
    pub fn with_id_field(cache: QueryCache, id_field: impl Into<String>) -> Self {
        Self {
            cache,
            id_field: id_field.into(),
        }
    }

    /// Change handlers that merge every delivered event into the list
    /// cached under `key`
    pub fn handlers(&self, key: QueryKey) -> ChangeHandlers {
        let cache = self.cache.clone();
        let id_field = self.id_field.clone();
        ChangeHandlers::new().on_any(move |event| apply(&cache, &id_field, &key, event))
    }

    /// Subscribe `descriptor` on `manager` and keep the list under `key`
    /// in sync with its events
    pub fn bind(
        &self,
        manager: &ChangeStreamManager,
        descriptor: StreamDescriptor,
        key: QueryKey,
    ) -> SyncResult<StreamHandle> {
        manager.subscribe(descriptor, self.handlers(key))
    }
}

fn apply(cache: &QueryCache, id_field: &str, key: &QueryKey, event: &ChangeEvent) {
    // Conservative deferral: an overlay owns the visible value until its
    // mutation settles.
    if cache.has_overlay(key) {
        debug!(%key, record_id = %event.record_id, "overlay pending, deferring stream merge");
        cache.invalidate(key);
        return;
    }

    let Some(cached) = cache.peek(key) else {
        // Nothing cached yet; the first read will fetch the full list.
        return;
    };

    let Value::Array(mut items) = cached else {
        // Not a list: membership rules are not knowable here.
        cache.invalidate(key);
        return;
    };

    match event.kind {
        ChangeKind::Insert => {
            let Some(record) = &event.new_record else {
                return;
            };
            if items
                .iter()
                .any(|item| id_matches(item, id_field, &event.record_id))
            {
                return;
            }
            items.insert(0, record.clone());
        }
        ChangeKind::Update => {
            let Some(record) = &event.new_record else {
                return;
            };
            match items
                .iter_mut()
                .find(|item| id_matches(item, id_field, &event.record_id))
            {
                Some(slot) => *slot = record.clone(),
                None => {
                    // The record may have started matching this list's
                    // filter; only a refetch can tell.
                    cache.invalidate(key);
                    return;
                }
            }
        }
        ChangeKind::Delete => {
            items.retain(|item| !id_matches(item, id_field, &event.record_id));
        }
    }

    cache.write(key, Value::Array(items));
}

fn id_matches(item: &Value, id_field: &str, record_id: &str) -> bool {
    match item.get(id_field) {
        Some(Value::String(s)) => s == record_id,
        Some(Value::Number(n)) => n.to_string() == record_id,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn seeded() -> (QueryCache, StreamBridge, QueryKey) {
        let cache = QueryCache::new();
        let key = QueryKey::new("projects").with("corp-1");
        cache.write(
            &key,
            json!([{"id": "p1", "title": "Alpha"}, {"id": "p2", "title": "Beta"}]),
        );
        let bridge = StreamBridge::new(cache.clone());
        (cache, bridge, key)
    }

    #[test]
    fn test_insert_prepends_without_reordering() {
        let (cache, bridge, key) = seeded();
        let handlers = bridge.handlers(key.clone());

        handlers.dispatch(&ChangeEvent::insert(
            "projects",
            "p9",
            json!({"id": "p9", "title": "New Drive"}),
        ));

        let items = cache.peek(&key).unwrap();
        assert_eq!(items[0]["id"], json!("p9"));
        assert_eq!(items[1]["id"], json!("p1"));
        assert_eq!(items[2]["id"], json!("p2"));
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let (cache, bridge, key) = seeded();
        let handlers = bridge.handlers(key.clone());

        handlers.dispatch(&ChangeEvent::insert(
            "projects",
            "p1",
            json!({"id": "p1", "title": "Alpha again"}),
        ));

        let items = cache.peek(&key).unwrap();
        assert_eq!(items.as_array().unwrap().len(), 2);
        assert_eq!(items[0]["title"], json!("Alpha"));
    }

    #[test]
    fn test_update_replaces_in_place() {
        let (cache, bridge, key) = seeded();
        let handlers = bridge.handlers(key.clone());

        handlers.dispatch(&ChangeEvent::update(
            "projects",
            "p2",
            json!({"id": "p2", "title": "Beta"}),
            json!({"id": "p2", "title": "Beta v2"}),
        ));

        let items = cache.peek(&key).unwrap();
        assert_eq!(items.as_array().unwrap().len(), 2);
        assert_eq!(items[1]["title"], json!("Beta v2"));
    }

    #[test]
    fn test_update_of_unknown_record_invalidates() {
        let (cache, bridge, key) = seeded();
        let handlers = bridge.handlers(key.clone());

        handlers.dispatch(&ChangeEvent::update(
            "projects",
            "p7",
            json!({"id": "p7"}),
            json!({"id": "p7", "title": "Newly matching"}),
        ));

        // Value untouched, but stale: the next read refetches
        let entries = cache.inner.entries.read().unwrap();
        let entry = entries.get(&key).unwrap();
        assert_eq!(entry.value.as_array().unwrap().len(), 2);
        assert!(!entry.is_fresh(Utc::now()));
    }

    #[test]
    fn test_delete_removes_by_id() {
        let (cache, bridge, key) = seeded();
        let handlers = bridge.handlers(key.clone());

        handlers.dispatch(&ChangeEvent::delete(
            "projects",
            "p1",
            json!({"id": "p1", "title": "Alpha"}),
        ));

        let items = cache.peek(&key).unwrap();
        assert_eq!(items.as_array().unwrap().len(), 1);
        assert_eq!(items[0]["id"], json!("p2"));
    }

    #[test]
    fn test_overlay_defers_stream_merge() {
        let (cache, bridge, key) = seeded();
        let handlers = bridge.handlers(key.clone());

        // Simulate a pending optimistic overlay on the list key
        {
            let mut entries = cache.inner.entries.write().unwrap();
            entries
                .get_mut(&key)
                .unwrap()
                .apply_overlay(json!([{"id": "p1", "title": "Optimistic"}]));
        }

        handlers.dispatch(&ChangeEvent::insert(
            "projects",
            "p9",
            json!({"id": "p9"}),
        ));

        // The overlay value survives; the entry went stale instead
        let entries = cache.inner.entries.read().unwrap();
        let entry = entries.get(&key).unwrap();
        assert_eq!(entry.value, json!([{"id": "p1", "title": "Optimistic"}]));
        assert!(entry.has_overlay());
        assert!(!entry.is_fresh(Utc::now()));
    }

    #[test]
    fn test_numeric_ids_match() {
        let cache = QueryCache::new();
        let key = QueryKey::new("reports");
        cache.write(&key, json!([{"id": 7, "name": "Q1"}]));
        let bridge = StreamBridge::new(cache.clone());
        let handlers = bridge.handlers(key.clone());

        handlers.dispatch(&ChangeEvent::delete("reports", "7", json!({"id": 7})));

        assert_eq!(cache.peek(&key).unwrap().as_array().unwrap().len(), 0);
    }
}
