//! Transfer planning.
//!
//! Given this device's catalog and the peer's, decide which paths each side
//! sends. Both peers run the same plan on the same two catalogs (with the
//! roles swapped), so they agree on the work without negotiating it.

use std::collections::BTreeSet;

use crate::catalog::{diff, FileCatalog};
use crate::conflict::{detect_all, ConflictRecord};

/// Which way files flow for this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// One-way session, this device is the source.
    Send,
    /// One-way session, this device is the target.
    Receive,
    /// Two-way session.
    Both,
}

/// Work for one session, from this device's point of view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Paths this device sends.
    pub outgoing: BTreeSet<String>,
    /// Paths the peer sends.
    pub incoming: BTreeSet<String>,
    /// Paths that differ on both sides; excluded from both sets until
    /// resolved.
    pub conflicts: Vec<ConflictRecord>,
    /// Local paths the source no longer has (receiving side only).
    pub deleted_in_source: BTreeSet<String>,
}

impl SyncPlan {
    /// Whether there is nothing to transfer or decide.
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.incoming.is_empty() && self.conflicts.is_empty()
    }
}

/// Plan a session between `local` and `remote`.
pub fn plan(local: &FileCatalog, remote: &FileCatalog, flow: Flow) -> SyncPlan {
    match flow {
        Flow::Send => SyncPlan {
            outgoing: diff(local, remote).added_or_modified,
            ..SyncPlan::default()
        },
        Flow::Receive => {
            let inbound = diff(remote, local);
            SyncPlan {
                incoming: inbound.added_or_modified,
                deleted_in_source: inbound.deleted_in_source,
                ..SyncPlan::default()
            }
        }
        Flow::Both => {
            let conflicts = detect_all(local, remote);
            let conflicted: BTreeSet<&str> =
                conflicts.iter().map(|c| c.relative_path.as_str()).collect();

            let outgoing = diff(local, remote)
                .added_or_modified
                .into_iter()
                .filter(|p| !conflicted.contains(p.as_str()))
                .collect();
            let incoming = diff(remote, local)
                .added_or_modified
                .into_iter()
                .filter(|p| !conflicted.contains(p.as_str()))
                .collect();

            SyncPlan {
                outgoing,
                incoming,
                conflicts,
                deleted_in_source: BTreeSet::new(),
            }
        }
    }
}
