//! Sync session state machine.
//!
//! This module owns the lifecycle of one sync session: status transitions,
//! progress counters and per-file transfer state. It performs no I/O; the
//! orchestrator in sync-client drives it and talks to the transport.
//!
//! ```text
//! idle → scanning → preparing → syncing ⇄ paused → completed | failed | cancelled
//! ```
//!
//! Terminal states never lead back to `idle`; a new session is created for
//! the next sync.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

use crate::catalog::FileCatalog;
use sync_types::{PeerId, SessionId, TransferStatus};

/// Status of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Created, nothing done yet.
    Idle,
    /// Building the local catalog.
    Scanning,
    /// Waiting for the peer (or conflict decisions) before transferring.
    Preparing,
    /// Transferring files.
    Syncing,
    /// Transfers suspended.
    Paused,
    /// Every planned file was processed.
    Completed,
    /// Aborted by an error such as peer disconnection.
    Failed,
    /// Cancelled by either side.
    Cancelled,
}

impl SyncStatus {
    /// Process an event and return the next status.
    ///
    /// Pure transition table; invalid combinations are reported as
    /// [`SessionError::InvalidTransition`] and the caller keeps the old
    /// status.
    pub fn on_event(self, event: &SessionEvent) -> Result<Self, SessionError> {
        use SessionEvent as E;
        use SyncStatus as S;

        match (self, event) {
            // From Idle
            (S::Idle, E::StartRequested) => Ok(S::Scanning),

            // From Scanning
            (S::Scanning, E::CatalogBuilt { empty: true }) => Err(SessionError::NothingToSync),
            (S::Scanning, E::CatalogBuilt { empty: false }) => Ok(S::Preparing),
            (S::Scanning, E::ScanFailed) => Ok(S::Idle),

            // From Preparing
            (S::Preparing, E::Accepted) => Ok(S::Syncing),
            (S::Preparing, E::Declined) => Ok(S::Cancelled),

            // From Syncing / Paused
            (S::Syncing, E::Pause) => Ok(S::Paused),
            (S::Paused, E::Resume) => Ok(S::Syncing),
            (S::Syncing, E::AllTransferred) => Ok(S::Completed),

            // Abandoning an active session
            (S::Preparing | S::Syncing | S::Paused, E::Cancel) => Ok(S::Cancelled),
            (S::Preparing | S::Syncing | S::Paused, E::PeerDisconnected | E::Aborted) => {
                Ok(S::Failed)
            }

            (from, event) => Err(SessionError::InvalidTransition {
                from,
                event: event.name(),
            }),
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the session occupies the orchestrator.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Scanning | Self::Preparing | Self::Syncing | Self::Paused
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Preparing => "preparing",
            Self::Syncing => "syncing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A sync was requested or accepted.
    StartRequested,
    /// The local catalog is ready.
    CatalogBuilt {
        /// Whether there is nothing at all to synchronize.
        empty: bool,
    },
    /// The local catalog could not be built.
    ScanFailed,
    /// Both sides agreed and transfers may begin.
    Accepted,
    /// The peer refused the session.
    Declined,
    /// Suspend transfers.
    Pause,
    /// Continue transfers.
    Resume,
    /// Abandon the session.
    Cancel,
    /// The transport lost the peer.
    PeerDisconnected,
    /// An unrecoverable local or transport error.
    Aborted,
    /// The last planned file was processed.
    AllTransferred,
}

impl SessionEvent {
    /// Short name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartRequested => "start",
            Self::CatalogBuilt { .. } => "catalog_built",
            Self::ScanFailed => "scan_failed",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::PeerDisconnected => "peer_disconnected",
            Self::Aborted => "aborted",
            Self::AllTransferred => "all_transferred",
        }
    }
}

/// Session-level errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No peer is connected.
    #[error("no connected peer")]
    NoPeer,
    /// Another session is still active.
    #[error("another sync session is already active")]
    Busy,
    /// The source catalog is empty.
    #[error("nothing to sync")]
    NothingToSync,
    /// The event is not valid in the current status.
    #[error("cannot {event} while {from}")]
    InvalidTransition {
        /// Status at the time of the attempt.
        from: SyncStatus,
        /// Event that was rejected.
        event: &'static str,
    },
}

/// Which side of the protocol this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Sent the `sync_request`.
    Initiator,
    /// Accepted the `sync_request`.
    Responder,
}

/// Snapshot of transfer progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Files planned, fixed when syncing starts.
    pub total_files: usize,
    /// Files attempted so far, in either direction.
    pub processed_files: usize,
    /// Files whose attempt failed.
    pub failed_files: usize,
    /// Bytes planned, fixed when syncing starts.
    pub total_bytes: u64,
    /// Bytes of successfully transferred files.
    pub transferred_bytes: u64,
}

impl Progress {
    /// `processed_files / total_files`, or 0.0 with nothing planned.
    pub fn file_progress(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            self.processed_files as f64 / self.total_files as f64
        }
    }

    /// `transferred_bytes / total_bytes`, or 0.0 with nothing planned.
    pub fn byte_progress(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.transferred_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// One synchronization attempt as seen from this side.
///
/// `files` is this device's catalog (selected = to send); `incoming` is the
/// peer's catalog (selected = expected from the peer).
#[derive(Debug, Clone)]
pub struct SyncSession {
    /// Session id shared with the peer.
    pub id: SessionId,
    /// Remote device.
    pub peer_id: PeerId,
    /// Remote device's display name.
    pub peer_display_name: String,
    /// Folder files are sent from.
    pub source_path: PathBuf,
    /// Folder files are written to.
    pub target_path: PathBuf,
    /// Whether both sides send changes.
    pub two_way: bool,
    /// Side of the protocol.
    pub role: Role,
    /// Creation time, ms since the epoch.
    pub started_at: u64,
    /// Time the session reached a terminal status.
    pub ended_at: Option<u64>,
    /// This device's catalog.
    pub files: FileCatalog,
    /// The peer's catalog.
    pub incoming: FileCatalog,
}

impl SyncSession {
    /// Create a session with empty catalogs.
    pub fn new(
        id: SessionId,
        peer_id: PeerId,
        peer_display_name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
        two_way: bool,
        role: Role,
    ) -> Self {
        let source_path = source_path.into();
        let target_path = target_path.into();
        Self {
            id,
            peer_id,
            peer_display_name: peer_display_name.into(),
            files: FileCatalog::new(source_path.clone()),
            incoming: FileCatalog::new(target_path.clone()),
            source_path,
            target_path,
            two_way,
            role,
            started_at: now_millis(),
            ended_at: None,
        }
    }
}

/// Drives a [`SyncSession`] through its lifecycle.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    session: SyncSession,
    status: SyncStatus,
    progress: Progress,
    /// Paths already counted, so duplicate completions are ignored.
    counted_out: BTreeSet<String>,
    counted_in: BTreeSet<String>,
}

impl SessionStateMachine {
    /// Wrap a new session in the `idle` status.
    pub fn new(session: SyncSession) -> Self {
        Self {
            session,
            status: SyncStatus::Idle,
            progress: Progress::default(),
            counted_out: BTreeSet::new(),
            counted_in: BTreeSet::new(),
        }
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.session.id
    }

    /// The wrapped session.
    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    /// Mutable access for planning (selection) before syncing starts.
    pub fn session_mut(&mut self) -> &mut SyncSession {
        &mut self.session
    }

    /// Progress snapshot.
    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Apply an event, returning the new status.
    ///
    /// On error the status is unchanged, except that an empty catalog sends
    /// a scanning session back to `idle`.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SyncStatus, SessionError> {
        let next = match self.status.on_event(&event) {
            Ok(next) => next,
            Err(SessionError::NothingToSync) => {
                self.status = SyncStatus::Idle;
                return Err(SessionError::NothingToSync);
            }
            Err(e) => return Err(e),
        };

        if event == SessionEvent::Accepted {
            self.fix_totals();
        }

        self.status = next;
        if next.is_terminal() {
            self.session.ended_at = Some(now_millis());
        }
        Ok(next)
    }

    /// `idle → scanning`.
    pub fn begin_scan(&mut self) -> Result<SyncStatus, SessionError> {
        self.apply(SessionEvent::StartRequested)
    }

    /// Install the local catalog: `scanning → preparing`.
    ///
    /// An empty catalog returns the session to `idle` with
    /// [`SessionError::NothingToSync`].
    pub fn catalog_built(&mut self, files: FileCatalog) -> Result<SyncStatus, SessionError> {
        let empty = files.is_empty();
        self.session.files = files;
        self.apply(SessionEvent::CatalogBuilt { empty })
    }

    /// Install the local catalog on the responder side.
    ///
    /// The responder has work as long as either side has files, so its own
    /// folder being empty is not an error.
    pub fn responder_catalog_built(
        &mut self,
        files: FileCatalog,
        incoming: FileCatalog,
    ) -> Result<SyncStatus, SessionError> {
        let empty = files.is_empty() && incoming.is_empty();
        self.session.files = files;
        self.session.incoming = incoming;
        self.apply(SessionEvent::CatalogBuilt { empty })
    }

    /// `preparing → syncing`; fixes the totals from the current selection.
    ///
    /// Completes immediately when nothing is planned.
    pub fn accepted(&mut self) -> Result<SyncStatus, SessionError> {
        self.apply(SessionEvent::Accepted)?;
        self.maybe_complete();
        Ok(self.status)
    }

    /// `syncing → paused`.
    pub fn pause(&mut self) -> Result<SyncStatus, SessionError> {
        self.apply(SessionEvent::Pause)
    }

    /// `paused → syncing`.
    pub fn resume(&mut self) -> Result<SyncStatus, SessionError> {
        self.apply(SessionEvent::Resume)?;
        self.maybe_complete();
        Ok(self.status)
    }

    /// `→ cancelled`.
    pub fn cancel(&mut self) -> Result<SyncStatus, SessionError> {
        self.apply(SessionEvent::Cancel)
    }

    /// `preparing → cancelled`: the peer refused the request.
    pub fn declined(&mut self) -> Result<SyncStatus, SessionError> {
        self.apply(SessionEvent::Declined)
    }

    /// `→ failed`.
    pub fn peer_disconnected(&mut self) -> Result<SyncStatus, SessionError> {
        self.apply(SessionEvent::PeerDisconnected)
    }

    /// `→ failed`, for errors other than a lost peer.
    pub fn abort(&mut self) -> Result<SyncStatus, SessionError> {
        self.apply(SessionEvent::Aborted)
    }

    /// `scanning → idle` after the catalog could not be built.
    pub fn scan_failed(&mut self) -> Result<SyncStatus, SessionError> {
        self.apply(SessionEvent::ScanFailed)
    }

    /// Next selected outgoing file that has not been attempted yet.
    pub fn next_outgoing(&self) -> Option<&sync_types::FileRecord> {
        self.session
            .files
            .selected()
            .find(|r| r.transfer_status == TransferStatus::Pending)
    }

    /// Mark an outgoing file as in progress.
    pub fn file_started(&mut self, path: &str) {
        if let Some(record) = self.session.files.get_mut(path) {
            record.transfer_status = TransferStatus::InProgress;
        }
    }

    /// Record the outcome of an outgoing file.
    ///
    /// Returns true if the file was counted (selected and not counted
    /// before).
    pub fn file_finished(&mut self, path: &str, success: bool) -> bool {
        let size = match self.session.files.get_mut(path) {
            Some(record) if record.selected => {
                record.transfer_status = if success {
                    TransferStatus::Done
                } else {
                    TransferStatus::Failed
                };
                record.size_bytes
            }
            _ => return false,
        };

        if !self.counted_out.insert(path.to_string()) {
            return false;
        }
        self.count(size, success);
        true
    }

    /// Mark an incoming file as in progress.
    pub fn incoming_started(&mut self, path: &str) {
        if let Some(record) = self.session.incoming.get_mut(path) {
            record.transfer_status = TransferStatus::InProgress;
        }
    }

    /// Whether the peer is expected to send `path`.
    pub fn expects_incoming(&self, path: &str) -> bool {
        self.session
            .incoming
            .get(path)
            .map(|r| r.selected)
            .unwrap_or(false)
    }

    /// Record the outcome of a file sent by the peer.
    ///
    /// Paths that were not selected from the peer's catalog are ignored.
    pub fn incoming_finished(&mut self, path: &str, success: bool) -> bool {
        let size = match self.session.incoming.get_mut(path) {
            Some(record) if record.selected => {
                record.transfer_status = if success {
                    TransferStatus::Done
                } else {
                    TransferStatus::Failed
                };
                record.size_bytes
            }
            _ => return false,
        };

        if !self.counted_in.insert(path.to_string()) {
            return false;
        }
        self.count(size, success);
        true
    }

    fn count(&mut self, size: u64, success: bool) {
        if self.progress.processed_files < self.progress.total_files {
            self.progress.processed_files += 1;
        }
        if success {
            self.progress.transferred_bytes =
                (self.progress.transferred_bytes + size).min(self.progress.total_bytes);
        } else {
            self.progress.failed_files += 1;
        }
        self.maybe_complete();
    }

    /// `syncing → completed` once every planned file has been processed.
    fn maybe_complete(&mut self) -> bool {
        if self.status == SyncStatus::Syncing
            && self.progress.processed_files >= self.progress.total_files
        {
            return self.apply(SessionEvent::AllTransferred).is_ok();
        }
        false
    }

    fn fix_totals(&mut self) {
        let (out_files, out_bytes) = self.session.files.selected_totals();
        let (in_files, in_bytes) = self.session.incoming.selected_totals();
        self.progress.total_files = out_files + in_files;
        self.progress.total_bytes = out_bytes + in_bytes;
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
