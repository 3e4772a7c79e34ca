//! Folder catalogs and catalog diffing.
//!
//! A [`FileCatalog`] is a point-in-time snapshot of one folder: an ordered
//! arena of [`FileRecord`]s plus a `relative_path → index` lookup. Catalogs
//! are built once per session (see `sync-client`) and never re-scanned.
//!
//! [`diff`] partitions the union of two catalogs' paths into
//! added-or-modified, unchanged and deleted-in-source.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use sync_types::FileRecord;

/// Snapshot listing of a folder's files.
///
/// Records are kept sorted by `relative_path`, so iteration order does not
/// depend on how the underlying filesystem enumerated them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCatalog {
    root: PathBuf,
    records: Vec<FileRecord>,
    index: HashMap<String, usize>,
    skipped: usize,
}

impl FileCatalog {
    /// Create an empty catalog rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Build a catalog from already-collected records.
    ///
    /// When two records share a `relative_path`, the later one wins.
    pub fn from_records(
        root: impl Into<PathBuf>,
        records: impl IntoIterator<Item = FileRecord>,
    ) -> Self {
        let by_path: BTreeMap<String, FileRecord> = records
            .into_iter()
            .map(|r| (r.relative_path.clone(), r))
            .collect();

        let records: Vec<FileRecord> = by_path.into_values().collect();
        let index = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.relative_path.clone(), i))
            .collect();

        Self {
            root: root.into(),
            records,
            index,
            skipped: 0,
        }
    }

    /// Record how many entries were unreadable while building.
    pub fn with_skipped(mut self, skipped: usize) -> Self {
        self.skipped = skipped;
        self
    }

    /// Folder this catalog describes.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of entries that could not be read during the scan.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the catalog has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in catalog order.
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Iterate records in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter()
    }

    /// Look up a record by relative path.
    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.index.get(path).map(|&i| &self.records[i])
    }

    /// Mutable lookup, for the session-owned fields.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut FileRecord> {
        match self.index.get(path) {
            Some(&i) => self.records.get_mut(i),
            None => None,
        }
    }

    /// Whether a record exists for `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Selected records in catalog order.
    pub fn selected(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter().filter(|r| r.selected)
    }

    /// Select exactly the records whose path is in `paths`.
    pub fn select_only(&mut self, paths: &BTreeSet<String>) {
        for record in &mut self.records {
            record.selected = paths.contains(&record.relative_path);
        }
    }

    /// Deselect every record.
    pub fn select_none(&mut self) {
        for record in &mut self.records {
            record.selected = false;
        }
    }

    /// Count and total size of the selected records.
    pub fn selected_totals(&self) -> (usize, u64) {
        self.selected()
            .fold((0, 0), |(n, bytes), r| (n + 1, bytes + r.size_bytes))
    }

    /// Sum of all record sizes.
    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size_bytes).sum()
    }

    /// Consume the catalog, returning its records in order.
    pub fn into_records(self) -> Vec<FileRecord> {
        self.records
    }
}

/// How one path compares between a source and a target catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Change {
    /// In source, and absent or different in target.
    AddedOrModified,
    /// Same content on both sides.
    Unchanged,
    /// Only in target.
    DeletedInSource,
}

/// Partition of `source ∪ target` paths.
///
/// The three sets are disjoint and together cover every path of both
/// catalogs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Present in source, absent or different in target.
    pub added_or_modified: BTreeSet<String>,
    /// Present on both sides with equal content.
    pub unchanged: BTreeSet<String>,
    /// Present in target only.
    pub deleted_in_source: BTreeSet<String>,
}

impl DiffResult {
    /// Whether the target already matches the source.
    pub fn is_clean(&self) -> bool {
        self.added_or_modified.is_empty() && self.deleted_in_source.is_empty()
    }

    /// Number of distinct paths covered.
    pub fn path_count(&self) -> usize {
        self.added_or_modified.len() + self.unchanged.len() + self.deleted_in_source.len()
    }

    /// Classification of a single path, if it appears in either catalog.
    pub fn change(&self, path: &str) -> Option<Change> {
        if self.added_or_modified.contains(path) {
            Some(Change::AddedOrModified)
        } else if self.unchanged.contains(path) {
            Some(Change::Unchanged)
        } else if self.deleted_in_source.contains(path) {
            Some(Change::DeletedInSource)
        } else {
            None
        }
    }
}

/// Compare `source` against `target`.
pub fn diff(source: &FileCatalog, target: &FileCatalog) -> DiffResult {
    let mut result = DiffResult::default();

    for record in source.iter() {
        let path = record.relative_path.clone();
        match target.get(&record.relative_path) {
            Some(other) if record.same_content(other) => {
                result.unchanged.insert(path);
            }
            _ => {
                result.added_or_modified.insert(path);
            }
        }
    }

    for record in target.iter() {
        if !source.contains(&record.relative_path) {
            result
                .deleted_in_source
                .insert(record.relative_path.clone());
        }
    }

    result
}
