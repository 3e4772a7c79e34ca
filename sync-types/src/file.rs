//! Per-file metadata records.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Transfer state of a single file within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Not yet attempted.
    #[default]
    Pending,
    /// Currently being sent or received.
    InProgress,
    /// Transferred successfully.
    Done,
    /// The transfer attempt failed.
    Failed,
}

/// Metadata snapshot of one file, taken when a catalog is built.
///
/// `relative_path` is the identity used to match records across catalogs.
/// Everything except `selected` and `transfer_status` is immutable once the
/// record has been created; those two fields belong to the owning session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Path relative to the catalog root, `/`-separated.
    pub relative_path: String,
    /// Absolute path on the device that built the record.
    pub absolute_path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Last modification time, milliseconds since the Unix epoch.
    pub modified_at: u64,
    /// MIME type guessed from the file name.
    pub content_type: String,
    /// Hex content digest, absent until computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Whether this file takes part in the transfer.
    #[serde(default = "default_selected")]
    pub selected: bool,
    /// Transfer state within the owning session.
    #[serde(default)]
    pub transfer_status: TransferStatus,
}

fn default_selected() -> bool {
    true
}

impl FileRecord {
    /// Create a selected, pending record without a content hash.
    pub fn new(
        relative_path: impl Into<String>,
        absolute_path: impl Into<PathBuf>,
        size_bytes: u64,
        modified_at: u64,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            absolute_path: absolute_path.into(),
            size_bytes,
            modified_at,
            content_type: content_type.into(),
            content_hash: None,
            selected: true,
            transfer_status: TransferStatus::Pending,
        }
    }

    /// Attach a content hash.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// The content hash, if one was computed and is non-empty.
    pub fn hash(&self) -> Option<&str> {
        self.content_hash.as_deref().filter(|h| !h.is_empty())
    }

    /// Whether two records describe the same content.
    ///
    /// Hashes decide when both sides carry one; otherwise size and
    /// modification time must both match.
    pub fn same_content(&self, other: &FileRecord) -> bool {
        match (self.hash(), other.hash()) {
            (Some(a), Some(b)) => a == b,
            _ => self.size_bytes == other.size_bytes && self.modified_at == other.modified_at,
        }
    }
}
