//! Error types for the pairsync wire format.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The bytes were not a well-formed message object
    #[error("malformed message: {0}")]
    Malformed(String),
}
