//! Filesystem abstraction for pairsync.
//!
//! The orchestrator never touches `std::fs` directly; it lists, hashes,
//! writes and deletes through a [`FileSystem`] so tests can run against an
//! in-memory folder tree.
//!
//! - `list_files_recursive()` enumerates a folder, counting unreadable
//!   entries instead of failing
//! - `compute_hash()` returns a lowercase hex content digest
//! - `copy_into()` writes received bytes under a destination folder
//! - `delete()` removes one file

mod local;
mod mock;

pub use local::LocalFileSystem;
pub use mock::MockFileSystem;

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Filesystem errors.
#[derive(Debug, Error)]
pub enum FsError {
    /// The folder or file does not exist.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A relative path from the peer escapes its folder.
    #[error("invalid relative path: {0}")]
    InvalidPath(String),

    /// Any other I/O failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }
}

/// One regular file found by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Path relative to the listed folder, `/`-separated.
    pub relative_path: String,
    /// Absolute path on this device.
    pub absolute_path: PathBuf,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Modification time, ms since the epoch.
    pub modified_at: u64,
    /// MIME type guessed from the extension.
    pub content_type: String,
}

/// Result of a recursive listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Readable regular files.
    pub entries: Vec<RawEntry>,
    /// Entries that could not be read.
    pub skipped: usize,
}

/// Filesystem capability used by the orchestrator.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Recursively list the regular files under `folder`.
    ///
    /// Fails with [`FsError::NotFound`] if `folder` is missing; unreadable
    /// entries below it are counted in [`Listing::skipped`].
    async fn list_files_recursive(&self, folder: &Path) -> Result<Listing, FsError>;

    /// Content digest of the file at `path`, lowercase hex.
    async fn compute_hash(&self, path: &Path) -> Result<String, FsError>;

    /// Write `bytes` to `destination/relative_path`, creating parent
    /// folders and replacing any existing file.
    async fn copy_into(
        &self,
        destination: &Path,
        relative_path: &str,
        bytes: &[u8],
    ) -> Result<(), FsError>;

    /// Remove the file at `path`.
    async fn delete(&self, path: &Path) -> Result<(), FsError>;
}

/// Join a peer-supplied relative path onto `root`.
///
/// Rejects absolute paths, `..` and empty paths so a peer cannot write
/// outside the session folder.
pub fn safe_join(root: &Path, relative_path: &str) -> Result<PathBuf, FsError> {
    let relative = Path::new(relative_path);
    let mut joined = root.to_path_buf();
    let mut depth = 0;

    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            _ => return Err(FsError::InvalidPath(relative_path.to_string())),
        }
    }

    if depth == 0 {
        return Err(FsError::InvalidPath(relative_path.to_string()));
    }
    Ok(joined)
}

/// Guess a MIME type from a file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("txt") | Some("log") => "text/plain",
        Some("md") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("csv") => "text/csv",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("toml") => "application/toml",
        Some("xml") => "application/xml",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("heic") => "image/heic",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}
