//! # Query Keys
//!
//! Structured cache keys: collection name plus filter parameters. Entries
//! for the same logical collection under different filters stay
//! independently addressable and independently invalidatable.

use serde::{Deserialize, Serialize};

/// A structured cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    segments: Vec<String>,
}

impl QueryKey {
    /// Key rooted at a collection name
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            segments: vec![collection.into()],
        }
    }

    /// Append a filter segment
    pub fn with(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// The collection this key is rooted at
    pub fn collection(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or("")
    }

    /// All key segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}
