//! # Stream Descriptors
//!
//! The (collection, predicate, event-kind) tuple identifying one logical
//! change stream, plus predicate evaluation against record payloads.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{ChangeEvent, ChangeKind};

/// Predicate operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl PredicateOp {
    fn as_str(&self) -> &'static str {
        match self {
            PredicateOp::Eq => "eq",
            PredicateOp::Neq => "neq",
            PredicateOp::Gt => "gt",
            PredicateOp::Gte => "gte",
            PredicateOp::Lt => "lt",
            PredicateOp::Lte => "lte",
            PredicateOp::In => "in",
        }
    }
}

/// A `field op value` filter bound to a stream at channel-open time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Field to filter on
    pub field: String,
    /// Operator
    pub op: PredicateOp,
    /// Value to compare
    pub value: Value,
}

impl Predicate {
    /// Equality predicate, the common case
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: PredicateOp::Eq,
            value,
        }
    }

    /// Check whether a record payload satisfies this predicate
    pub fn matches(&self, record: &Value) -> bool {
        let Some(field_value) = record.get(&self.field) else {
            return false;
        };

        match self.op {
            PredicateOp::Eq => field_value == &self.value,
            PredicateOp::Neq => field_value != &self.value,
            PredicateOp::Gt => {
                if let (Some(a), Some(b)) = (field_value.as_f64(), self.value.as_f64()) {
                    a > b
                } else {
                    false
                }
            }
            PredicateOp::Gte => {
                if let (Some(a), Some(b)) = (field_value.as_f64(), self.value.as_f64()) {
                    a >= b
                } else {
                    false
                }
            }
            PredicateOp::Lt => {
                if let (Some(a), Some(b)) = (field_value.as_f64(), self.value.as_f64()) {
                    a < b
                } else {
                    false
                }
            }
            PredicateOp::Lte => {
                if let (Some(a), Some(b)) = (field_value.as_f64(), self.value.as_f64()) {
                    a <= b
                } else {
                    false
                }
            }
            PredicateOp::In => {
                if let Some(arr) = self.value.as_array() {
                    arr.contains(field_value)
                } else {
                    false
                }
            }
        }
    }

    /// Canonical `field=op.value` rendering used in channel topics
    pub fn render(&self) -> String {
        let value = match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        format!("{}={}.{}", self.field, self.op.as_str(), value)
    }
}

/// Identifies one logical change stream.
///
/// Two descriptors with identical `(collection, predicate)` are semantically
/// duplicate subscriptions; the system does not deduplicate them — each
/// caller owns its own channel lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Collection name
    pub collection: String,

    /// Change kinds to deliver (None = all)
    pub events: Option<HashSet<ChangeKind>>,

    /// Row filter, bound at channel-open time
    pub predicate: Option<Predicate>,
}

impl StreamDescriptor {
    /// Descriptor for all changes on a collection
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            events: None,
            predicate: None,
        }
    }

    /// Restrict to a subset of change kinds
    pub fn with_events(mut self, events: impl IntoIterator<Item = ChangeKind>) -> Self {
        self.events = Some(events.into_iter().collect());
        self
    }

    /// Attach a row predicate
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Check whether a change event belongs to this stream
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.collection != self.collection {
            return false;
        }

        if let Some(events) = &self.events {
            if !events.contains(&event.kind) {
                return false;
            }
        }

        if let Some(predicate) = &self.predicate {
            // Deletes are filtered on the pre-deletion record.
            let Some(record) = event.record() else {
                return false;
            };
            if !predicate.matches(record) {
                return false;
            }
        }

        true
    }

    /// Logical topic for channels carrying this stream
    pub fn topic(&self) -> String {
        match &self.predicate {
            Some(p) => format!("changes:{}:{}", self.collection, p.render()),
            None => format!("changes:{}", self.collection),
        }
    }

    /// Whether two descriptors identify the same logical stream
    pub fn same_stream(&self, other: &StreamDescriptor) -> bool {
        self.collection == other.collection && self.predicate == other.predicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predicate_eq() {
        let predicate = Predicate::eq("status", json!("published"));

        assert!(predicate.matches(&json!({"status": "published"})));
        assert!(!predicate.matches(&json!({"status": "draft"})));
        assert!(!predicate.matches(&json!({"title": "no status"})));
    }

    #[test]
    fn test_predicate_ordering_ops() {
        let gt = Predicate {
            field: "amount".to_string(),
            op: PredicateOp::Gt,
            value: json!(100),
        };
        assert!(gt.matches(&json!({"amount": 150})));
        assert!(!gt.matches(&json!({"amount": 100})));

        let lte = Predicate {
            field: "amount".to_string(),
            op: PredicateOp::Lte,
            value: json!(100),
        };
        assert!(lte.matches(&json!({"amount": 100})));
        assert!(!lte.matches(&json!({"amount": 101})));
    }

    #[test]
    fn test_predicate_in() {
        let predicate = Predicate {
            field: "status".to_string(),
            op: PredicateOp::In,
            value: json!(["active", "pending"]),
        };

        assert!(predicate.matches(&json!({"status": "pending"})));
        assert!(!predicate.matches(&json!({"status": "closed"})));
    }

    #[test]
    fn test_descriptor_matches_collection_and_kind() {
        let descriptor = StreamDescriptor::new("projects").with_events([ChangeKind::Insert]);

        assert!(descriptor.matches(&ChangeEvent::insert("projects", "p1", json!({}))));
        assert!(!descriptor.matches(&ChangeEvent::insert("reports", "r1", json!({}))));
        assert!(!descriptor.matches(&ChangeEvent::delete("projects", "p1", json!({}))));
    }

    #[test]
    fn test_descriptor_predicate_applies_to_deletes() {
        let descriptor = StreamDescriptor::new("projects")
            .with_predicate(Predicate::eq("corporate_id", json!("corp-1")));

        let matching = ChangeEvent::delete("projects", "p1", json!({"corporate_id": "corp-1"}));
        let other = ChangeEvent::delete("projects", "p2", json!({"corporate_id": "corp-2"}));

        assert!(descriptor.matches(&matching));
        assert!(!descriptor.matches(&other));
    }

    #[test]
    fn test_topic_rendering() {
        let plain = StreamDescriptor::new("projects");
        assert_eq!(plain.topic(), "changes:projects");

        let filtered = StreamDescriptor::new("projects")
            .with_predicate(Predicate::eq("corporate_id", json!("corp-1")));
        assert_eq!(filtered.topic(), "changes:projects:corporate_id=eq.corp-1");
    }

    #[test]
    fn test_same_stream_ignores_event_kinds() {
        let a = StreamDescriptor::new("projects").with_events([ChangeKind::Insert]);
        let b = StreamDescriptor::new("projects").with_events([ChangeKind::Delete]);
        let c = StreamDescriptor::new("projects")
            .with_predicate(Predicate::eq("corporate_id", json!("corp-1")));

        assert!(a.same_stream(&b));
        assert!(!a.same_stream(&c));
    }
}
