//! # Sync Errors
//!
//! Error taxonomy for the synchronization subsystem.
//!
//! Connectivity failures are handled locally (logged, connectivity flag
//! flipped) and never bubble as errors. Fetch and mutation failures bubble
//! to the calling layer, which owns user-visible messaging.

use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Synchronization errors
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    // ==================
    // Connectivity Errors
    // ==================
    /// Channel was closed by its owner
    #[error("Channel closed")]
    ChannelClosed,

    /// Channel not found on the transport
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// Operation attempted before the subscribe handshake confirmed
    #[error("Channel not subscribed")]
    NotSubscribed,

    // ==================
    // Fetch Errors
    // ==================
    /// Fetch failed after the automatic retry
    #[error("Fetch failed: {0}")]
    Fetch(String),

    // ==================
    // Mutation Errors
    // ==================
    /// Server rejected the mutation; cache was rolled back
    #[error("Mutation rejected: {0}")]
    Mutation(String),

    // ==================
    // Logic Errors
    // ==================
    /// Required identifier missing from the call
    #[error("Missing identifier: {0}")]
    MissingIdentifier(String),

    /// Broadcast payload exceeds the configured limit
    #[error("Message too large (max: {0} bytes)")]
    MessageTooLarge(usize),

    /// Payload failed to decode into the expected record type
    #[error("Decode error for collection {collection}: {message}")]
    Decode {
        /// Collection whose payload failed to decode
        collection: String,
        /// Decoder message
        message: String,
    },

    // ==================
    // Internal Errors
    // ==================
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(SyncError::ChannelClosed.to_string(), "Channel closed");
        assert_eq!(
            SyncError::Fetch("boom".to_string()).to_string(),
            "Fetch failed: boom"
        );
        assert_eq!(
            SyncError::MessageTooLarge(65536).to_string(),
            "Message too large (max: 65536 bytes)"
        );
    }
}
