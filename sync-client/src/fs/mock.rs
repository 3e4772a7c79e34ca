//! In-memory filesystem for testing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{guess_content_type, safe_join, FileSystem, FsError, Listing, RawEntry};

/// In-memory [`FileSystem`].
///
/// Clones share the same tree, so a test can inspect what the
/// orchestrator wrote.
#[derive(Debug, Default)]
pub struct MockFileSystem {
    inner: Arc<Mutex<MockFsInner>>,
}

#[derive(Debug, Default)]
struct MockFsInner {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, MockFile>,
    unreadable: BTreeSet<PathBuf>,
    fail_next_write: Option<String>,
    deleted: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
struct MockFile {
    bytes: Vec<u8>,
    modified_at: u64,
}

impl MockFileSystem {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty folder.
    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        let mut inner = self.inner.lock().unwrap();
        inner.add_dir(path.into());
    }

    /// Add (or replace) a file, creating its parent folders.
    pub fn add_file(&self, path: impl Into<PathBuf>, bytes: &[u8], modified_at: u64) {
        let path = path.into();
        let mut inner = self.inner.lock().unwrap();
        if let Some(parent) = path.parent() {
            inner.add_dir(parent.to_path_buf());
        }
        inner.files.insert(
            path,
            MockFile {
                bytes: bytes.to_vec(),
                modified_at,
            },
        );
    }

    /// Make a file show up as unreadable in listings.
    pub fn mark_unreadable(&self, path: impl Into<PathBuf>) {
        let mut inner = self.inner.lock().unwrap();
        inner.unreadable.insert(path.into());
    }

    /// Cause the next copy_into() to fail with the given error.
    pub fn fail_next_write(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_write = Some(error.to_string());
    }

    /// Content of a file, if present.
    pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.files.get(path.as_ref()).map(|f| f.bytes.clone())
    }

    /// Whether a file exists.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.files.contains_key(path.as_ref())
    }

    /// Paths removed through `delete`, in order.
    pub fn deleted(&self) -> Vec<PathBuf> {
        let inner = self.inner.lock().unwrap();
        inner.deleted.clone()
    }
}

impl MockFsInner {
    fn add_dir(&mut self, path: PathBuf) {
        for ancestor in path.ancestors() {
            self.dirs.insert(ancestor.to_path_buf());
        }
    }
}

impl Clone for MockFileSystem {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl FileSystem for MockFileSystem {
    async fn list_files_recursive(&self, folder: &Path) -> Result<Listing, FsError> {
        let inner = self.inner.lock().unwrap();
        if !inner.dirs.contains(folder) {
            return Err(FsError::NotFound(folder.to_path_buf()));
        }

        let mut listing = Listing::default();
        for (path, file) in inner.files.range(folder.to_path_buf()..) {
            let relative = match path.strip_prefix(folder) {
                Ok(rel) => rel,
                Err(_) => break,
            };
            if inner.unreadable.contains(path) {
                listing.skipped += 1;
                continue;
            }
            listing.entries.push(RawEntry {
                relative_path: relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/"),
                absolute_path: path.clone(),
                size_bytes: file.bytes.len() as u64,
                modified_at: file.modified_at,
                content_type: guess_content_type(path).to_string(),
            });
        }
        Ok(listing)
    }

    async fn compute_hash(&self, path: &Path) -> Result<String, FsError> {
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .get(path)
            .map(|f| blake3::hash(&f.bytes).to_hex().to_string())
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
    }

    async fn copy_into(
        &self,
        destination: &Path,
        relative_path: &str,
        bytes: &[u8],
    ) -> Result<(), FsError> {
        let target = safe_join(destination, relative_path)?;
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_write.take() {
            return Err(FsError::Io {
                path: target,
                source: std::io::Error::new(std::io::ErrorKind::Other, error),
            });
        }

        if let Some(parent) = target.parent() {
            inner.add_dir(parent.to_path_buf());
        }
        inner.files.insert(
            target,
            MockFile {
                bytes: bytes.to_vec(),
                modified_at: sync_core::now_millis(),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<(), FsError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.files.remove(path) {
            Some(_) => {
                inner.deleted.push(path.to_path_buf());
                Ok(())
            }
            None => Err(FsError::NotFound(path.to_path_buf())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_only_the_requested_folder() {
        let fs = MockFileSystem::new();
        fs.add_file("/src/a.txt", b"a", 1);
        fs.add_file("/src/sub/b.txt", b"bb", 2);
        fs.add_file("/srcother/c.txt", b"c", 3);
        fs.add_file("/other/d.txt", b"d", 4);

        let listing = fs.list_files_recursive(Path::new("/src")).await.unwrap();
        let paths: Vec<_> = listing
            .entries
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["a.txt", "sub/b.txt"]);
    }

    #[tokio::test]
    async fn unreadable_files_are_skipped() {
        let fs = MockFileSystem::new();
        fs.add_file("/src/a.txt", b"a", 1);
        fs.add_file("/src/secret.txt", b"s", 1);
        fs.mark_unreadable("/src/secret.txt");

        let listing = fs.list_files_recursive(Path::new("/src")).await.unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.skipped, 1);
    }

    #[tokio::test]
    async fn missing_folder_is_not_found() {
        let fs = MockFileSystem::new();
        assert!(matches!(
            fs.list_files_recursive(Path::new("/nope")).await,
            Err(FsError::NotFound(_))
        ));

        fs.add_dir("/empty");
        let listing = fs.list_files_recursive(Path::new("/empty")).await.unwrap();
        assert!(listing.entries.is_empty());
    }

    #[tokio::test]
    async fn writes_and_deletes_are_visible() {
        let fs = MockFileSystem::new();
        fs.copy_into(Path::new("/dst"), "x/y.txt", b"hi").await.unwrap();
        assert_eq!(fs.read("/dst/x/y.txt").unwrap(), b"hi");

        fs.delete(Path::new("/dst/x/y.txt")).await.unwrap();
        assert!(!fs.exists("/dst/x/y.txt"));
        assert_eq!(fs.deleted(), vec![PathBuf::from("/dst/x/y.txt")]);
    }
}
