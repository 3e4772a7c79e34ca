//! Conflict detection and resolution.
//!
//! A conflict exists when both peers hold a version of the same path and the
//! versions differ. There is no persisted sync history, so "changed on both
//! sides" degenerates to "present on both sides with different content" and
//! is only raised for two-way sessions.

use thiserror::Error;

use crate::catalog::{diff, FileCatalog};
use sync_types::{FileRecord, Resolution};

/// Error type for conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    /// The record was already settled with a different strategy.
    #[error("conflict on {path} already resolved as {existing:?}")]
    AlreadyResolved {
        /// Conflicting path.
        path: String,
        /// Strategy that settled it.
        existing: Resolution,
    },
    /// `Unresolved` is not a strategy.
    #[error("no resolution strategy given for {0}")]
    NoStrategy(String),
    /// No conflict is known for the path.
    #[error("no conflict recorded for {0}")]
    UnknownPath(String),
}

/// The side whose bytes survive a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Winner {
    /// This device's version.
    Local,
    /// The peer's version.
    Remote,
}

impl Winner {
    /// The concrete resolution that names this winner.
    pub fn as_resolution(self) -> Resolution {
        match self {
            Winner::Local => Resolution::KeepLocal,
            Winner::Remote => Resolution::KeepRemote,
        }
    }
}

/// Result of [`ConflictRecord::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Side that wins.
    pub winner: Winner,
    /// False when the record had already been settled the same way.
    pub newly_resolved: bool,
}

/// Competing versions of one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    /// Conflicting relative path.
    pub relative_path: String,
    /// This device's version.
    pub local_version: FileRecord,
    /// The peer's version.
    pub remote_version: FileRecord,
    resolution: Resolution,
    winner: Option<Winner>,
}

impl ConflictRecord {
    /// Create an unresolved conflict.
    pub fn new(local_version: FileRecord, remote_version: FileRecord) -> Self {
        Self {
            relative_path: local_version.relative_path.clone(),
            local_version,
            remote_version,
            resolution: Resolution::Unresolved,
            winner: None,
        }
    }

    /// Strategy the record was settled with.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Whether a strategy has been applied.
    pub fn is_resolved(&self) -> bool {
        self.winner.is_some()
    }

    /// Winning side, once resolved.
    pub fn winner(&self) -> Option<Winner> {
        self.winner
    }

    /// Winning version, once resolved.
    pub fn winning_version(&self) -> Option<&FileRecord> {
        self.winner.map(|w| match w {
            Winner::Local => &self.local_version,
            Winner::Remote => &self.remote_version,
        })
    }

    /// Settle the conflict with `strategy`.
    ///
    /// Applying the same strategy again returns the same winner with
    /// `newly_resolved == false`; a different strategy is rejected.
    pub fn resolve(&mut self, strategy: Resolution) -> Result<Outcome, ConflictError> {
        let candidate = match strategy {
            Resolution::Unresolved => {
                return Err(ConflictError::NoStrategy(self.relative_path.clone()))
            }
            Resolution::KeepLocal => Winner::Local,
            Resolution::KeepRemote => Winner::Remote,
            Resolution::KeepNewest => newest(&self.local_version, &self.remote_version),
        };

        if let Some(winner) = self.winner {
            if strategy == self.resolution {
                return Ok(Outcome {
                    winner,
                    newly_resolved: false,
                });
            }
            return Err(ConflictError::AlreadyResolved {
                path: self.relative_path.clone(),
                existing: self.resolution,
            });
        }

        let winner = candidate;
        self.resolution = strategy;
        self.winner = Some(winner);
        Ok(Outcome {
            winner,
            newly_resolved: true,
        })
    }
}

/// Newer `modified_at` wins; ties go to the local side.
pub fn newest(local: &FileRecord, remote: &FileRecord) -> Winner {
    if remote.modified_at > local.modified_at {
        Winner::Remote
    } else {
        Winner::Local
    }
}

/// Return a conflict if the two versions of a path differ.
pub fn detect(local: &FileRecord, remote: &FileRecord) -> Option<ConflictRecord> {
    if local.relative_path != remote.relative_path || local.same_content(remote) {
        return None;
    }
    Some(ConflictRecord::new(local.clone(), remote.clone()))
}

/// All conflicts between two catalogs, sorted by path.
///
/// A path conflicts when it is added-or-modified in both directions and
/// exists on both sides.
pub fn detect_all(local: &FileCatalog, remote: &FileCatalog) -> Vec<ConflictRecord> {
    let outgoing = diff(local, remote).added_or_modified;
    let incoming = diff(remote, local).added_or_modified;

    outgoing
        .intersection(&incoming)
        .filter_map(|path| match (local.get(path), remote.get(path)) {
            (Some(l), Some(r)) => detect(l, r),
            _ => None,
        })
        .collect()
}

/// Settle `record` with `strategy` and return the winning version.
pub fn resolve(
    record: &mut ConflictRecord,
    strategy: Resolution,
) -> Result<FileRecord, ConflictError> {
    let outcome = record.resolve(strategy)?;
    Ok(match outcome.winner {
        Winner::Local => record.local_version.clone(),
        Winner::Remote => record.remote_version.clone(),
    })
}
