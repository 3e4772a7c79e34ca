//! Protocol messages for pairsync.
//!
//! Every message is a JSON object with a snake_case `type` discriminator and
//! a `sessionId` that ties it to one session on the receiving side.

use serde::{Deserialize, Serialize};

use crate::{CodecError, FileRecord, SessionId};

/// All known protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Initiator asks the peer to take part in a new session
    SyncRequest(SyncRequest),
    /// Responder agreed to the session
    SyncAccepted(SyncAccepted),
    /// Sender paused the session
    SyncPaused(SessionRef),
    /// Sender resumed the session
    SyncResumed(SessionRef),
    /// Sender cancelled (or declined) the session
    SyncCancelled(SessionRef),
    /// Both sides hold different versions of the same path
    ConflictDetected(ConflictDetected),
    /// Outcome chosen for a detected conflict
    ConflictResolution(ConflictResolution),
    /// A file payload is about to follow
    FileTransferStart(FileTransferStart),
    /// The file payload attempt finished
    FileTransferComplete(FileTransferComplete),
}

/// Discriminators this version understands.
const KNOWN_TYPES: &[&str] = &[
    "sync_request",
    "sync_accepted",
    "sync_paused",
    "sync_resumed",
    "sync_cancelled",
    "conflict_detected",
    "conflict_resolution",
    "file_transfer_start",
    "file_transfer_complete",
];

impl Message {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Serialization)
    }

    /// Deserialize from JSON bytes.
    ///
    /// Unknown `type` values are an error here; use [`decode`] on inbound
    /// traffic so they can be skipped instead.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        match decode(bytes)? {
            Decoded::Known(message) => Ok(message),
            Decoded::Unknown(kind) => Err(CodecError::Malformed(format!(
                "unknown message type: {}",
                kind
            ))),
        }
    }

    /// The session this message belongs to.
    ///
    /// For `sync_request` this is the id being minted.
    pub fn session_id(&self) -> SessionId {
        match self {
            Message::SyncRequest(m) => m.session_id,
            Message::SyncAccepted(m) => m.session_id,
            Message::SyncPaused(m) | Message::SyncResumed(m) | Message::SyncCancelled(m) => {
                m.session_id
            }
            Message::ConflictDetected(m) => m.session_id,
            Message::ConflictResolution(m) => m.session_id,
            Message::FileTransferStart(m) => m.session_id,
            Message::FileTransferComplete(m) => m.session_id,
        }
    }

    /// The wire discriminator of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SyncRequest(_) => "sync_request",
            Message::SyncAccepted(_) => "sync_accepted",
            Message::SyncPaused(_) => "sync_paused",
            Message::SyncResumed(_) => "sync_resumed",
            Message::SyncCancelled(_) => "sync_cancelled",
            Message::ConflictDetected(_) => "conflict_detected",
            Message::ConflictResolution(_) => "conflict_resolution",
            Message::FileTransferStart(_) => "file_transfer_start",
            Message::FileTransferComplete(_) => "file_transfer_complete",
        }
    }
}

/// Result of decoding inbound bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A message this version understands.
    Known(Message),
    /// A well-formed object whose `type` is not recognised.
    Unknown(String),
}

/// Decode inbound bytes, tolerating message types from newer peers.
///
/// Returns [`CodecError::Malformed`] when the bytes are not a JSON object
/// with a string `type`, or when a known type is missing required fields.
pub fn decode(bytes: &[u8]) -> Result<Decoded, CodecError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| CodecError::Malformed("missing string field `type`".into()))?
        .to_string();

    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Ok(Decoded::Unknown(kind));
    }

    serde_json::from_value(value)
        .map(Decoded::Known)
        .map_err(|e| CodecError::Malformed(format!("{}: {}", kind, e)))
}

/// Body of messages that carry nothing but the session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    /// Session the message refers to
    pub session_id: SessionId,
}

impl SessionRef {
    /// Wrap a session id.
    pub fn new(session_id: SessionId) -> Self {
        Self { session_id }
    }
}

/// Opening message of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Newly minted session id
    pub session_id: SessionId,
    /// Source folder on the initiator
    pub source_path: String,
    /// Whether the responder should send its own changes back
    pub two_way: bool,
    /// Catalog of the initiator's source folder
    pub files: Vec<FileRecord>,
    /// Human-readable name of the initiating device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// Acceptance of a [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAccepted {
    /// Session being accepted
    pub session_id: SessionId,
    /// Catalog of the responder's target folder, when it has one to offer.
    ///
    /// Without it the initiator sends every selected file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileRecord>>,
}

/// How a conflict is (or should be) settled.
///
/// On the wire, `keep_local` and `keep_remote` are from the sender's point
/// of view; receivers apply [`Resolution::mirrored`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// No decision yet.
    #[default]
    Unresolved,
    /// Keep this side's version.
    KeepLocal,
    /// Keep the other side's version.
    KeepRemote,
    /// Keep whichever version was modified last.
    KeepNewest,
}

impl Resolution {
    /// The same decision seen from the other peer.
    pub fn mirrored(self) -> Self {
        match self {
            Resolution::KeepLocal => Resolution::KeepRemote,
            Resolution::KeepRemote => Resolution::KeepLocal,
            other => other,
        }
    }
}

/// Announcement that a path differs on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetected {
    /// Session the conflict belongs to
    pub session_id: SessionId,
    /// Conflicting relative path
    pub path: String,
    /// Sender's version
    pub local_version: FileRecord,
    /// Receiver's version as known to the sender
    pub remote_version: FileRecord,
}

/// Decision for a previously announced conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    /// Session the conflict belongs to
    pub session_id: SessionId,
    /// Conflicting relative path
    pub path: String,
    /// Concrete outcome, from the sender's point of view
    pub resolution: Resolution,
}

/// Sent immediately before a file payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferStart {
    /// Session the transfer belongs to
    pub session_id: SessionId,
    /// Relative path of the file
    pub path: String,
    /// Size of the payload in bytes
    pub size_bytes: u64,
}

/// Sent after a file payload attempt, whatever its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferComplete {
    /// Session the transfer belongs to
    pub session_id: SessionId,
    /// Relative path of the file
    pub path: String,
    /// Whether the payload was handed to the transport successfully
    pub success: bool,
}
