//! Real filesystem access.
//!
//! Directory walks and hashing are blocking work, so they run on tokio's
//! blocking pool.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use walkdir::WalkDir;

use super::{guess_content_type, safe_join, FileSystem, FsError, Listing, RawEntry};

/// [`FileSystem`] backed by the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Create a handle to the local disk.
    pub fn new() -> Self {
        Self
    }
}

fn join_error(path: &Path, e: tokio::task::JoinError) -> FsError {
    FsError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::Other, e),
    }
}

fn walk(folder: &Path) -> Result<Listing, FsError> {
    if !folder.is_dir() {
        return Err(FsError::NotFound(folder.to_path_buf()));
    }

    let mut listing = Listing::default();
    for entry in WalkDir::new(folder).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {}: {}", folder.display(), e);
                listing.skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() || is_partial(entry.path()) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", entry.path().display(), e);
                listing.skipped += 1;
                continue;
            }
        };

        let relative = match entry.path().strip_prefix(folder) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => continue,
        };

        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        listing.entries.push(RawEntry {
            content_type: guess_content_type(entry.path()).to_string(),
            relative_path: relative,
            absolute_path: entry.path().to_path_buf(),
            size_bytes: metadata.len(),
            modified_at,
        });
    }

    Ok(listing)
}

fn hash_file(path: &Path) -> Result<String, FsError> {
    let mut file = std::fs::File::open(path).map_err(|e| FsError::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher).map_err(|e| FsError::io(path, e))?;
    Ok(hasher.finalize().to_hex().to_string())
}

const PARTIAL_SUFFIX: &str = ".pairsync-part";

fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}{}", name, PARTIAL_SUFFIX))
}

/// Leftover from an interrupted write; never part of a catalog.
fn is_partial(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(PARTIAL_SUFFIX))
        .unwrap_or(false)
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn list_files_recursive(&self, folder: &Path) -> Result<Listing, FsError> {
        let owned = folder.to_path_buf();
        tokio::task::spawn_blocking(move || walk(&owned))
            .await
            .map_err(|e| join_error(folder, e))?
    }

    async fn compute_hash(&self, path: &Path) -> Result<String, FsError> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || hash_file(&owned))
            .await
            .map_err(|e| join_error(path, e))?
    }

    async fn copy_into(
        &self,
        destination: &Path,
        relative_path: &str,
        bytes: &[u8],
    ) -> Result<(), FsError> {
        let target = safe_join(destination, relative_path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FsError::io(parent, e))?;
        }

        // Write aside and rename so a failed write never leaves a truncated file.
        let partial = partial_path(&target);
        tokio::fs::write(&partial, bytes)
            .await
            .map_err(|e| FsError::io(&partial, e))?;
        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(FsError::io(&target, e));
        }
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<(), FsError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| FsError::io(path, e))
    }
}
