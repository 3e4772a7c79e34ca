//! Transport abstraction for pairsync.
//!
//! This module provides a pluggable transport layer that abstracts the
//! underlying link between the two devices (an in-process channel pair, a
//! mock for testing, or a real network link supplied by the embedder).
//!
//! # Design
//!
//! The transport is a capability the orchestrator calls, not a loop it
//! owns:
//! - `send_message()` delivers one encoded protocol message
//! - `send_file()` streams one file's content to the peer
//!
//! Inbound traffic flows the other way: whatever owns the link feeds
//! [`Inbound`] frames to `SyncOrchestrator::run` (or calls the
//! `on_*` handlers directly).
//!
//! # Example
//!
//! ```ignore
//! let ((a, a_rx), (b, b_rx)) = ChannelTransport::pair(PeerId::new("a"), PeerId::new("b"));
//! a.send_message(&PeerId::new("b"), &message).await?;
//! ```

mod channel;
mod mock;

pub use channel::ChannelTransport;
pub use mock::{MockTransport, Sent};

use std::path::Path;

use async_trait::async_trait;
use sync_types::{CodecError, Message, PeerId};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The bytes could not be delivered.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The peer went away.
    #[error("peer disconnected: {0}")]
    PeerDisconnected(PeerId),

    /// No link exists to the addressed peer.
    #[error("not connected to {0}")]
    NotConnected(PeerId),

    /// The send did not finish in time.
    #[error("send timed out")]
    Timeout,

    /// The message could not be encoded.
    #[error("encoding failed: {0}")]
    Codec(#[from] CodecError),
}

impl TransportError {
    /// Whether the session cannot continue after this error.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::PeerDisconnected(_) | Self::NotConnected(_))
    }
}

/// One unit of traffic arriving from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An encoded protocol message.
    Message {
        /// Sender.
        peer: PeerId,
        /// Wire bytes.
        bytes: Vec<u8>,
    },
    /// Content of the file announced by the last `file_transfer_start`.
    File {
        /// Sender.
        peer: PeerId,
        /// File content.
        bytes: Vec<u8>,
    },
    /// The link to `peer` is gone.
    Disconnected {
        /// Lost peer.
        peer: PeerId,
    },
}

/// Transport trait for sending sync protocol messages and file content.
///
/// Implementations handle the underlying link (channels, sockets, mock,
/// etc). Both methods are fallible; the orchestrator decides what a
/// failure means for the session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one protocol message to `peer`.
    async fn send_message(&self, peer: &PeerId, message: &Message) -> Result<(), TransportError>;

    /// Send the content of the file at `path` to `peer`.
    ///
    /// Called between the `file_transfer_start` and
    /// `file_transfer_complete` messages for the same file.
    async fn send_file(&self, peer: &PeerId, path: &Path) -> Result<(), TransportError>;
}
