//! Building catalogs from a [`FileSystem`].

use std::path::Path;

use sync_core::FileCatalog;
use sync_types::FileRecord;
use thiserror::Error;

use crate::fs::{FileSystem, FsError};

/// Catalog building errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The folder to scan does not exist.
    #[error("folder not found: {}", .0.display())]
    NotFound(std::path::PathBuf),

    /// Some entries could not be read; the catalog omits them.
    #[error("{skipped} entries could not be read and were skipped")]
    PartialReadWarning {
        /// Number of skipped entries.
        skipped: usize,
    },

    /// Listing or hashing failed.
    #[error("filesystem error: {0}")]
    Io(#[from] FsError),
}

/// Scan `folder` into a catalog.
///
/// With `hash_contents`, every file gets a content hash; a file whose hash
/// cannot be computed is left without one and compared by size and mtime.
/// Unreadable entries are counted in [`FileCatalog::skipped`]; the caller
/// decides whether to surface a [`CatalogError::PartialReadWarning`].
pub async fn build<F>(fs: &F, folder: &Path, hash_contents: bool) -> Result<FileCatalog, CatalogError>
where
    F: FileSystem + ?Sized,
{
    let listing = fs.list_files_recursive(folder).await.map_err(|e| match e {
        FsError::NotFound(path) => CatalogError::NotFound(path),
        other => CatalogError::Io(other),
    })?;

    let mut records = Vec::with_capacity(listing.entries.len());
    for entry in listing.entries {
        let mut record = FileRecord::new(
            entry.relative_path,
            entry.absolute_path,
            entry.size_bytes,
            entry.modified_at,
            entry.content_type,
        );
        if hash_contents {
            match fs.compute_hash(&record.absolute_path).await {
                Ok(hash) => record = record.with_hash(hash),
                Err(e) => tracing::warn!("Could not hash {}: {}", record.relative_path, e),
            }
        }
        records.push(record);
    }

    let catalog = FileCatalog::from_records(folder, records).with_skipped(listing.skipped);
    tracing::debug!(
        "Cataloged {} files ({} bytes, {} skipped) in {}",
        catalog.len(),
        catalog.total_bytes(),
        catalog.skipped(),
        folder.display()
    );
    Ok(catalog)
}
