//! # sync-types
//!
//! Wire format types for the pairsync folder synchronization protocol.
//!
//! This crate provides the foundational types used across all pairsync crates:
//! - [`SessionId`], [`PeerId`] - Identity types
//! - [`FileRecord`] - Per-file metadata snapshot exchanged between peers
//! - [`Message`] - Protocol messages (sync_request, sync_accepted, etc.)
//! - [`CodecError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod file;
mod ids;
mod messages;

pub use error::CodecError;
pub use file::{FileRecord, TransferStatus};
pub use ids::{PeerId, SessionId};
pub use messages::{
    decode, ConflictDetected, ConflictResolution, Decoded, FileTransferComplete,
    FileTransferStart, Message, Resolution, SessionRef, SyncAccepted, SyncRequest,
};
