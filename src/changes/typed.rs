//! # Typed Decode Boundary
//!
//! Backend payloads arrive as dynamic JSON. Rather than propagating untyped
//! values through the pipeline, each collection decodes its payload exactly
//! once, here, into its own record type. Events whose payload fails to
//! decode are logged and skipped, never delivered half-typed.

use serde::de::DeserializeOwned;
use tracing::warn;

use super::descriptor::StreamDescriptor;
use super::manager::{ChangeHandlers, ChangeStreamManager, StreamHandle};
use crate::errors::{SyncError, SyncResult};
use crate::event::{ChangeEvent, ChangeKind};

/// Typed callback invoked with a decoded record
pub type TypedCallback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Per-kind typed callbacks for one collection
pub struct TypedCallbacks<T> {
    on_insert: Option<TypedCallback<T>>,
    on_update: Option<TypedCallback<T>>,
    on_delete: Option<TypedCallback<T>>,
}

impl<T> Default for TypedCallbacks<T> {
    fn default() -> Self {
        Self {
            on_insert: None,
            on_update: None,
            on_delete: None,
        }
    }
}

impl<T> TypedCallbacks<T> {
    /// Create an empty callback set
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked with the decoded new record on every insert
    pub fn on_insert(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.on_insert = Some(Box::new(f));
        self
    }

    /// Invoked with the decoded new record on every update
    pub fn on_update(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    /// Invoked with the decoded pre-deletion record on every delete
    pub fn on_delete(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Box::new(f));
        self
    }
}

impl<T: DeserializeOwned + Send + Sync + 'static> TypedCallbacks<T> {
    /// Wrap these callbacks into raw [`ChangeHandlers`] with the decode
    /// step applied at the boundary.
    pub fn into_handlers(self) -> ChangeHandlers {
        ChangeHandlers::new().on_any(move |event: &ChangeEvent| {
            let Some(payload) = event.record() else {
                return;
            };

            let record: T = match serde_json::from_value(payload.clone()) {
                Ok(record) => record,
                Err(err) => {
                    let err = SyncError::Decode {
                        collection: event.collection.clone(),
                        message: err.to_string(),
                    };
                    warn!(
                        record_id = %event.record_id,
                        error = %err,
                        "dropping change event with undecodable payload"
                    );
                    return;
                }
            };

            let callback = match event.kind {
                ChangeKind::Insert => &self.on_insert,
                ChangeKind::Update => &self.on_update,
                ChangeKind::Delete => &self.on_delete,
            };
            if let Some(f) = callback {
                f(record);
            }
        })
    }
}

/// Subscribe to a change stream delivering decoded records of type `T`
pub fn subscribe_typed<T: DeserializeOwned + Send + Sync + 'static>(
    manager: &ChangeStreamManager,
    descriptor: StreamDescriptor,
    callbacks: TypedCallbacks<T>,
) -> SyncResult<StreamHandle> {
    manager.subscribe(descriptor, callbacks.into_handlers())
}
