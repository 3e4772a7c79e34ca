//! Sync orchestrator.
//!
//! [`SyncOrchestrator`] ties the pure session machinery from sync-core to a
//! [`Transport`] and a [`FileSystem`]. One orchestrator runs per device and
//! holds at most one active session.
//!
//! # Flow
//!
//! ```text
//! initiator                              responder
//! start_sync ── sync_request ──────────▶ accept policy
//!            ◀───────────── sync_accepted (+ its catalog)
//! plan, conflicts ── conflict_detected ─▶
//!                 ── conflict_resolution ▶
//! run_transfers ── file_transfer_start ─▶
//!               ── <file payload> ──────▶ copy_into
//!               ── file_transfer_complete ▶ count
//! ```
//!
//! Inbound traffic is fed through [`SyncOrchestrator::run`] or the `on_*`
//! handlers. Outbound transfers run in [`SyncOrchestrator::run_transfers`],
//! one file per lock acquisition, so pause and cancel take effect between
//! files. Observers receive [`SyncEvent`]s on the channel returned when the
//! orchestrator is built.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sync_core::{
    plan, AcceptDecision, AcceptPolicy, AskUser, AutoAccept, ConflictError, ConflictPolicy,
    ConflictRecord, FileCatalog, Flow, IncomingRequest, Progress, Role, SessionError,
    SessionStateMachine, StrategyPolicy, SyncSession, SyncStatus, Winner,
};
use sync_types::{
    decode, CodecError, ConflictDetected, ConflictResolution, Decoded, FileRecord,
    FileTransferComplete, FileTransferStart, Message, PeerId, Resolution, SessionId, SessionRef,
    SyncAccepted, SyncRequest, TransferStatus,
};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::catalog::{self, CatalogError};
use crate::config::SyncConfig;
use crate::fs::{safe_join, FileSystem, FsError};
use crate::transport::{Inbound, Transport, TransportError};

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Session state error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Catalog could not be built.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Conflict resolution error.
    #[error("conflict error: {0}")]
    Conflict(#[from] ConflictError),

    /// Malformed inbound message.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Received file could not be written or removed.
    #[error("filesystem error: {0}")]
    FileSystem(#[from] FsError),

    /// No held request has this session id.
    #[error("no pending request for session {0}")]
    UnknownRequest(SessionId),
}

/// The device on the other end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Transport-level identity.
    pub id: PeerId,
    /// Human-readable name.
    pub display_name: String,
}

impl Peer {
    /// Describe a peer.
    pub fn new(id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Direction of a file transfer relative to this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// This device sends.
    Outgoing,
    /// The peer sends.
    Incoming,
}

/// Notifications for observers (UI, CLI, tests).
#[derive(Debug)]
pub enum SyncEvent {
    /// The session moved to a new status.
    StatusChanged {
        /// Session.
        session_id: SessionId,
        /// New status.
        status: SyncStatus,
    },
    /// Counters changed.
    Progress {
        /// Session.
        session_id: SessionId,
        /// Snapshot.
        progress: Progress,
    },
    /// A file transfer began.
    FileStarted {
        /// Session.
        session_id: SessionId,
        /// Relative path.
        path: String,
        /// Who sends it.
        direction: Direction,
    },
    /// A file transfer attempt finished.
    FileCompleted {
        /// Session.
        session_id: SessionId,
        /// Relative path.
        path: String,
        /// Who sent it.
        direction: Direction,
        /// Whether it arrived intact.
        success: bool,
    },
    /// A conflict was detected or resolved.
    Conflict {
        /// Session.
        session_id: SessionId,
        /// Current state of the conflict.
        conflict: ConflictRecord,
    },
    /// A request is waiting for `accept_incoming` or `decline_incoming`.
    IncomingRequest {
        /// Requested session.
        session_id: SessionId,
        /// Requesting device.
        peer: Peer,
        /// Source folder on the requesting device.
        source_path: String,
        /// Number of files offered.
        file_count: usize,
        /// Total size offered.
        total_bytes: u64,
    },
    /// Something worth surfacing that did not stop the session.
    Warning {
        /// Session, if any.
        session_id: Option<SessionId>,
        /// Description.
        message: String,
    },
    /// An error; fatal to the session if followed by a `failed` status.
    Error {
        /// Session, if any.
        session_id: Option<SessionId>,
        /// What went wrong.
        error: OrchestratorError,
    },
}

/// What handling an inbound frame led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Dropped: stale, unknown or malformed.
    Ignored,
    /// Processed.
    Handled,
    /// Processed, and outgoing files are ready for `run_transfers`.
    TransfersReady,
}

/// Summary of the current or most recent session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSnapshot {
    /// Session id.
    pub id: SessionId,
    /// Side of the protocol.
    pub role: Role,
    /// Status.
    pub status: SyncStatus,
    /// Counters.
    pub progress: Progress,
    /// Creation time, ms since the epoch.
    pub started_at: u64,
    /// End time, once terminal.
    pub ended_at: Option<u64>,
}

impl SessionSnapshot {
    fn of(machine: &SessionStateMachine) -> Self {
        let session = machine.session();
        Self {
            id: session.id,
            role: session.role,
            status: machine.status(),
            progress: machine.progress(),
            started_at: session.started_at,
            ended_at: session.ended_at,
        }
    }
}

struct ActiveSession {
    machine: SessionStateMachine,
    conflicts: BTreeMap<String, ConflictRecord>,
    receiving: Option<Receiving>,
    deleted_in_source: Vec<String>,
}

impl ActiveSession {
    fn new(machine: SessionStateMachine) -> Self {
        Self {
            machine,
            conflicts: BTreeMap::new(),
            receiving: None,
            deleted_in_source: Vec::new(),
        }
    }

    fn id(&self) -> SessionId {
        self.machine.id()
    }

    fn peer_id(&self) -> PeerId {
        self.machine.session().peer_id.clone()
    }

    fn all_resolved(&self) -> bool {
        self.conflicts.values().all(|c| c.is_resolved())
    }

    fn ready(&self) -> Dispatch {
        if self.machine.status() == SyncStatus::Syncing && self.machine.next_outgoing().is_some() {
            Dispatch::TransfersReady
        } else {
            Dispatch::Handled
        }
    }
}

/// Incoming file announced by `file_transfer_start`.
struct Receiving {
    path: String,
    size_bytes: u64,
    written: bool,
}

struct PendingRequest {
    peer: Peer,
    request: SyncRequest,
}

#[derive(Default)]
struct State {
    active: Option<ActiveSession>,
    pending: Option<PendingRequest>,
    last: Option<SessionSnapshot>,
}

impl State {
    fn is_busy(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| a.machine.status().is_active())
            .unwrap_or(false)
    }

    fn current_status(&self) -> SyncStatus {
        self.active
            .as_ref()
            .map(|a| a.machine.status())
            .or_else(|| self.last.map(|s| s.status))
            .unwrap_or(SyncStatus::Idle)
    }
}

struct Inner<T, F> {
    config: SyncConfig,
    transport: T,
    fs: F,
    accept_policy: Box<dyn AcceptPolicy>,
    conflict_policy: Box<dyn ConflictPolicy>,
    peer: Mutex<Option<Peer>>,
    state: Mutex<State>,
    events: mpsc::UnboundedSender<SyncEvent>,
}

/// Builder for [`SyncOrchestrator`].
pub struct OrchestratorBuilder<T, F> {
    config: SyncConfig,
    transport: T,
    fs: F,
    accept_policy: Option<Box<dyn AcceptPolicy>>,
    conflict_policy: Option<Box<dyn ConflictPolicy>>,
}

impl<T: Transport, F: FileSystem> OrchestratorBuilder<T, F> {
    /// Replace the accept policy derived from the config.
    pub fn accept_policy(mut self, policy: impl AcceptPolicy + 'static) -> Self {
        self.accept_policy = Some(Box::new(policy));
        self
    }

    /// Replace the conflict policy derived from the config.
    pub fn conflict_policy(mut self, policy: impl ConflictPolicy + 'static) -> Self {
        self.conflict_policy = Some(Box::new(policy));
        self
    }

    /// Build the orchestrator and its event stream.
    pub fn build(self) -> (SyncOrchestrator<T, F>, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, rx) = mpsc::unbounded_channel();

        let accept_policy: Box<dyn AcceptPolicy> = match self.accept_policy {
            Some(policy) => policy,
            None if self.config.receive.auto_accept => {
                Box::new(AutoAccept::new(self.config.receive.dir.clone()))
            }
            None => Box::new(AskUser),
        };
        let conflict_policy: Box<dyn ConflictPolicy> = match self.conflict_policy {
            Some(policy) => policy,
            None => Box::new(StrategyPolicy::new(self.config.sync.conflict_strategy)),
        };

        let inner = Inner {
            config: self.config,
            transport: self.transport,
            fs: self.fs,
            accept_policy,
            conflict_policy,
            peer: Mutex::new(None),
            state: Mutex::new(State::default()),
            events,
        };
        (
            SyncOrchestrator {
                inner: Arc::new(inner),
            },
            rx,
        )
    }
}

/// Drives sync sessions with one peer.
///
/// Cheap to clone; clones share the same state.
pub struct SyncOrchestrator<T, F> {
    inner: Arc<Inner<T, F>>,
}

impl<T, F> Clone for SyncOrchestrator<T, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Peer records arrive with the sender's transfer bookkeeping.
fn from_peer(mut record: FileRecord) -> FileRecord {
    record.selected = true;
    record.transfer_status = TransferStatus::Pending;
    record
}

impl<T: Transport, F: FileSystem> SyncOrchestrator<T, F> {
    /// Start building an orchestrator.
    pub fn builder(config: SyncConfig, transport: T, fs: F) -> OrchestratorBuilder<T, F> {
        OrchestratorBuilder {
            config,
            transport,
            fs,
            accept_policy: None,
            conflict_policy: None,
        }
    }

    /// Create an orchestrator with policies derived from `config`.
    pub fn new(
        config: SyncConfig,
        transport: T,
        fs: F,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        Self::builder(config, transport, fs).build()
    }

    /// Configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Record the peer future sessions are started with.
    pub async fn connect_peer(&self, peer: Peer) {
        tracing::info!("Peer connected: {} ({})", peer.display_name, peer.id);
        *self.inner.peer.lock().await = Some(peer);
    }

    /// The connected peer, if any.
    pub async fn peer(&self) -> Option<Peer> {
        self.inner.peer.lock().await.clone()
    }

    /// Status of the current session, else of the last one, else `idle`.
    pub async fn status(&self) -> SyncStatus {
        self.inner.state.lock().await.current_status()
    }

    /// Progress of the current or last session.
    pub async fn progress(&self) -> Progress {
        self.snapshot().await.map(|s| s.progress).unwrap_or_default()
    }

    /// Summary of the current or last session.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let state = self.inner.state.lock().await;
        state
            .active
            .as_ref()
            .map(|a| SessionSnapshot::of(&a.machine))
            .or(state.last)
    }

    /// Conflicts of the active session, sorted by path.
    pub async fn conflicts(&self) -> Vec<ConflictRecord> {
        let state = self.inner.state.lock().await;
        state
            .active
            .as_ref()
            .map(|a| a.conflicts.values().cloned().collect())
            .unwrap_or_default()
    }

    // ===========================================
    // Initiator
    // ===========================================

    /// Scan `source_path` and ask the connected peer to sync it.
    ///
    /// Returns once the `sync_request` is sent; the session then waits in
    /// `preparing` for the peer's answer.
    pub async fn start_sync(
        &self,
        source_path: impl AsRef<Path>,
        two_way: bool,
    ) -> Result<SessionId, OrchestratorError> {
        let source_path = source_path.as_ref();
        let peer = self.peer().await.ok_or(SessionError::NoPeer)?;

        let mut state = self.inner.state.lock().await;
        if state.is_busy() || state.pending.is_some() {
            return Err(SessionError::Busy.into());
        }

        let session = SyncSession::new(
            SessionId::new(),
            peer.id.clone(),
            peer.display_name.clone(),
            source_path,
            source_path,
            two_way,
            Role::Initiator,
        );
        let mut machine = SessionStateMachine::new(session);
        machine.begin_scan()?;
        let id = machine.id();
        tracing::info!(
            "Starting {} sync {:?} of {} with {}",
            if two_way { "two-way" } else { "one-way" },
            id,
            source_path.display(),
            peer.id
        );
        self.emit_status(&machine);

        let files =
            match catalog::build(&self.inner.fs, source_path, self.inner.config.sync.hash_contents)
                .await
            {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!("Scan of {} failed: {}", source_path.display(), e);
                    machine.scan_failed()?;
                    self.emit_status(&machine);
                    state.last = Some(SessionSnapshot::of(&machine));
                    return Err(e.into());
                }
            };
        self.warn_skipped(id, &files);

        if let Err(e) = machine.catalog_built(files) {
            tracing::info!("Nothing to sync in {}", source_path.display());
            self.emit_status(&machine);
            state.last = Some(SessionSnapshot::of(&machine));
            return Err(e.into());
        }
        self.emit_status(&machine);

        let request = Message::SyncRequest(SyncRequest {
            session_id: id,
            source_path: source_path.display().to_string(),
            two_way,
            files: machine.session().files.records().to_vec(),
            device_name: Some(self.inner.config.device.name.clone()),
        });

        if let Err(e) = self.send(&peer.id, &request).await {
            tracing::warn!("Could not send sync request: {}", e);
            if e.is_disconnect() {
                machine.peer_disconnected()?;
            } else {
                machine.abort()?;
            }
            self.emit_status(&machine);
            state.last = Some(SessionSnapshot::of(&machine));
            return Err(e.into());
        }

        state.active = Some(ActiveSession::new(machine));
        Ok(id)
    }

    // ===========================================
    // Responder
    // ===========================================

    /// Accept the request held for `session_id`, writing into `target_path`.
    pub async fn accept_incoming(
        &self,
        session_id: SessionId,
        target_path: impl Into<PathBuf>,
    ) -> Result<Dispatch, OrchestratorError> {
        let pending = self.take_pending(session_id).await?;
        self.accept_request(pending.peer, pending.request, target_path.into())
            .await
    }

    /// Decline the request held for `session_id`.
    pub async fn decline_incoming(&self, session_id: SessionId) -> Result<(), OrchestratorError> {
        let pending = self.take_pending(session_id).await?;
        tracing::info!("Declined sync request {:?}", session_id);
        self.decline(&pending.peer.id, session_id).await;
        Ok(())
    }

    async fn take_pending(&self, session_id: SessionId) -> Result<PendingRequest, OrchestratorError> {
        let mut state = self.inner.state.lock().await;
        match state.pending.take() {
            Some(p) if p.request.session_id == session_id => Ok(p),
            other => {
                state.pending = other;
                Err(OrchestratorError::UnknownRequest(session_id))
            }
        }
    }

    async fn handle_request(&self, from: &PeerId, request: SyncRequest) -> Dispatch {
        let id = request.session_id;
        let display_name = match &request.device_name {
            Some(name) => name.clone(),
            None => self.display_name_of(from).await,
        };
        let peer = Peer::new(from.clone(), display_name);

        let decision = {
            let mut state = self.inner.state.lock().await;
            let active_id = state.active.as_ref().map(|a| a.id());
            let pending_id = state.pending.as_ref().map(|p| p.request.session_id);
            let last_id = state.last.as_ref().map(|s| s.id);
            if [active_id, pending_id, last_id].contains(&Some(id)) {
                tracing::debug!("Ignoring duplicate or stale sync request {:?}", id);
                return Dispatch::Ignored;
            }

            if state.is_busy() || state.pending.is_some() {
                None
            } else {
                let total_bytes = request.files.iter().map(|f| f.size_bytes).sum();
                let decision = self.inner.accept_policy.decide(&IncomingRequest {
                    peer_id: &peer.id,
                    peer_display_name: &peer.display_name,
                    source_path: &request.source_path,
                    two_way: request.two_way,
                    file_count: request.files.len(),
                    total_bytes,
                });

                if decision == AcceptDecision::Defer {
                    tracing::info!("Holding sync request {:?} from {}", id, peer.id);
                    self.emit(SyncEvent::IncomingRequest {
                        session_id: id,
                        peer: peer.clone(),
                        source_path: request.source_path.clone(),
                        file_count: request.files.len(),
                        total_bytes,
                    });
                    state.pending = Some(PendingRequest { peer, request });
                    return Dispatch::Handled;
                }
                Some(decision)
            }
        };

        match decision {
            None => {
                tracing::warn!("Declining sync request {:?} from {}: busy", id, from);
                self.decline(from, id).await;
                Dispatch::Handled
            }
            Some(AcceptDecision::Accept { target_path }) => {
                match self.accept_request(peer, request, target_path).await {
                    Ok(dispatch) => dispatch,
                    Err(error) => {
                        self.emit(SyncEvent::Error {
                            session_id: Some(id),
                            error,
                        });
                        Dispatch::Handled
                    }
                }
            }
            Some(_) => {
                tracing::info!("Declined sync request {:?} from {}", id, from);
                self.decline(from, id).await;
                Dispatch::Handled
            }
        }
    }

    async fn accept_request(
        &self,
        peer: Peer,
        request: SyncRequest,
        target_path: PathBuf,
    ) -> Result<Dispatch, OrchestratorError> {
        let id = request.session_id;
        let mut state = self.inner.state.lock().await;
        if state.is_busy() {
            drop(state);
            self.decline(&peer.id, id).await;
            return Err(SessionError::Busy.into());
        }

        let session = SyncSession::new(
            id,
            peer.id.clone(),
            peer.display_name.clone(),
            &target_path,
            &target_path,
            request.two_way,
            Role::Responder,
        );
        let mut machine = SessionStateMachine::new(session);
        machine.begin_scan()?;
        tracing::info!(
            "Accepting {} sync {:?} from {} into {}",
            if request.two_way { "two-way" } else { "one-way" },
            id,
            peer.display_name,
            target_path.display()
        );
        self.emit_status(&machine);

        let local = match catalog::build(
            &self.inner.fs,
            &target_path,
            self.inner.config.sync.hash_contents,
        )
        .await
        {
            Ok(local) => local,
            // A target folder that does not exist yet is simply empty.
            Err(CatalogError::NotFound(_)) => FileCatalog::new(&target_path),
            Err(e) => {
                machine.scan_failed()?;
                self.emit_status(&machine);
                state.last = Some(SessionSnapshot::of(&machine));
                drop(state);
                self.decline(&peer.id, id).await;
                return Err(e.into());
            }
        };
        self.warn_skipped(id, &local);

        let offered = local.records().to_vec();
        let mut local = local;
        let mut remote = FileCatalog::from_records(
            &request.source_path,
            request.files.into_iter().map(from_peer),
        );
        let flow = if request.two_way {
            Flow::Both
        } else {
            Flow::Receive
        };
        let plan = plan(&local, &remote, flow);
        local.select_only(&plan.outgoing);
        remote.select_only(&plan.incoming);

        if let Err(e) = machine.responder_catalog_built(local, remote) {
            self.emit_status(&machine);
            state.last = Some(SessionSnapshot::of(&machine));
            drop(state);
            self.decline(&peer.id, id).await;
            return Err(e.into());
        }
        self.emit_status(&machine);

        let mut active = ActiveSession::new(machine);
        active.deleted_in_source = plan.deleted_in_source.into_iter().collect();
        for conflict in plan.conflicts {
            active
                .conflicts
                .insert(conflict.relative_path.clone(), conflict);
        }

        let accepted = Message::SyncAccepted(SyncAccepted {
            session_id: id,
            files: Some(offered),
        });
        if !self.notify(&mut active, accepted, true).await {
            state.active = Some(active);
            self.settle(&mut state).await;
            return Ok(Dispatch::Handled);
        }

        for conflict in active.conflicts.values() {
            self.emit(SyncEvent::Conflict {
                session_id: id,
                conflict: conflict.clone(),
            });
        }

        let dispatch = self.try_begin(&mut active);
        state.active = Some(active);
        self.settle(&mut state).await;
        Ok(dispatch)
    }

    async fn decline(&self, peer: &PeerId, session_id: SessionId) {
        let message = Message::SyncCancelled(SessionRef::new(session_id));
        if let Err(e) = self.send(peer, &message).await {
            tracing::warn!("Could not decline {:?}: {}", session_id, e);
        }
    }

    async fn display_name_of(&self, peer: &PeerId) -> String {
        match self.inner.peer.lock().await.as_ref() {
            Some(p) if &p.id == peer => p.display_name.clone(),
            _ => peer.to_string(),
        }
    }

    // ===========================================
    // Control
    // ===========================================

    /// Suspend transfers and tell the peer.
    pub async fn pause(&self) -> Result<(), OrchestratorError> {
        let mut state = self.inner.state.lock().await;
        let from = state.current_status();
        let active = state.active.as_mut().ok_or(SessionError::InvalidTransition {
            from,
            event: "pause",
        })?;

        active.machine.pause()?;
        tracing::info!("Paused session {:?}", active.id());
        self.emit_status(&active.machine);

        let message = Message::SyncPaused(SessionRef::new(active.id()));
        self.notify(active, message, false).await;
        self.settle(&mut state).await;
        Ok(())
    }

    /// Continue transfers and tell the peer.
    ///
    /// Returns [`Dispatch::TransfersReady`] when outgoing files remain; call
    /// [`SyncOrchestrator::run_transfers`] to send them.
    pub async fn resume(&self) -> Result<Dispatch, OrchestratorError> {
        let mut state = self.inner.state.lock().await;
        let from = state.current_status();
        let active = state.active.as_mut().ok_or(SessionError::InvalidTransition {
            from,
            event: "resume",
        })?;

        active.machine.resume()?;
        tracing::info!("Resumed session {:?}", active.id());
        self.emit_status(&active.machine);

        let message = Message::SyncResumed(SessionRef::new(active.id()));
        self.notify(active, message, false).await;
        let dispatch = active.ready();
        self.settle(&mut state).await;
        Ok(dispatch)
    }

    /// Abandon the active session and tell the peer.
    pub async fn cancel(&self) -> Result<(), OrchestratorError> {
        let mut state = self.inner.state.lock().await;
        let from = state.current_status();
        let active = state.active.as_mut().ok_or(SessionError::InvalidTransition {
            from,
            event: "cancel",
        })?;

        active.machine.cancel()?;
        tracing::info!("Cancelled session {:?}", active.id());
        self.emit_status(&active.machine);

        let message = Message::SyncCancelled(SessionRef::new(active.id()));
        self.notify(active, message, false).await;
        self.settle(&mut state).await;
        Ok(())
    }

    /// Settle the conflict on `path` and tell the peer.
    ///
    /// Only the initiator decides conflicts; the responder waits for its
    /// `conflict_resolution`. Resolving again with the same strategy is a
    /// no-op; a different strategy is rejected. Once every conflict is
    /// settled the session starts syncing.
    pub async fn resolve_conflict(
        &self,
        path: &str,
        resolution: Resolution,
    ) -> Result<Dispatch, OrchestratorError> {
        let mut state = self.inner.state.lock().await;
        let from = state.current_status();
        let active = match state.active.as_mut() {
            Some(active) if active.machine.session().role == Role::Initiator => active,
            _ => {
                return Err(SessionError::InvalidTransition {
                    from,
                    event: "resolve_conflict",
                }
                .into())
            }
        };

        if let Some(announcement) = self.apply_resolution(active, path, resolution)? {
            if !self.notify(active, announcement, true).await {
                self.settle(&mut state).await;
                return Ok(Dispatch::Handled);
            }
        }

        let dispatch = self.try_begin(active);
        self.settle(&mut state).await;
        Ok(dispatch)
    }

    /// Apply `strategy` to a conflict; returns the announcement to send if
    /// it was newly settled.
    fn apply_resolution(
        &self,
        active: &mut ActiveSession,
        path: &str,
        strategy: Resolution,
    ) -> Result<Option<Message>, ConflictError> {
        let id = active.id();
        let record = active
            .conflicts
            .get_mut(path)
            .ok_or_else(|| ConflictError::UnknownPath(path.to_string()))?;

        let outcome = record.resolve(strategy)?;
        if !outcome.newly_resolved {
            return Ok(None);
        }
        let conflict = record.clone();

        let session = active.machine.session_mut();
        let winner = match outcome.winner {
            Winner::Local => session.files.get_mut(path),
            Winner::Remote => session.incoming.get_mut(path),
        };
        if let Some(winner) = winner {
            winner.selected = true;
        }

        tracing::info!("Conflict on {} resolved: keep {:?}", path, outcome.winner);
        self.emit(SyncEvent::Conflict {
            session_id: id,
            conflict,
        });

        Ok(Some(Message::ConflictResolution(ConflictResolution {
            session_id: id,
            path: path.to_string(),
            resolution: outcome.winner.as_resolution(),
        })))
    }

    /// `preparing → syncing` once every conflict is settled.
    fn try_begin(&self, active: &mut ActiveSession) -> Dispatch {
        if active.machine.status() != SyncStatus::Preparing || !active.all_resolved() {
            return Dispatch::Handled;
        }
        if let Err(e) = active.machine.accepted() {
            tracing::warn!("Cannot start transfers: {}", e);
            return Dispatch::Handled;
        }
        self.emit_status(&active.machine);
        self.emit_progress(&active.machine);
        active.ready()
    }

    // ===========================================
    // Inbound
    // ===========================================

    /// Handle one encoded message from `from`.
    ///
    /// Malformed, unknown and stale messages are logged and dropped.
    pub async fn on_bytes_received(&self, from: &PeerId, bytes: &[u8]) -> Dispatch {
        let message = match decode(bytes) {
            Ok(Decoded::Known(message)) => message,
            Ok(Decoded::Unknown(kind)) => {
                tracing::warn!("Ignoring unknown message type {:?} from {}", kind, from);
                return Dispatch::Ignored;
            }
            Err(e) => {
                tracing::warn!("Dropping malformed message from {}: {}", from, e);
                return Dispatch::Ignored;
            }
        };
        tracing::debug!("Received {} for {:?} from {}", message.kind(), message.session_id(), from);

        if let Message::SyncRequest(request) = message {
            return self.handle_request(from, request).await;
        }

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let session_id = message.session_id();
        let dispatch = match state.active.as_mut() {
            Some(active) if active.id() == session_id && &active.peer_id() == from => {
                self.handle_session_message(active, message).await
            }
            _ => {
                let held = state.pending.as_ref().map(|p| p.request.session_id);
                if held == Some(session_id) && matches!(message, Message::SyncCancelled(_)) {
                    tracing::info!("Peer withdrew held request {:?}", session_id);
                    state.pending = None;
                    Dispatch::Handled
                } else {
                    tracing::debug!("Dropping stale {} for {:?}", message.kind(), session_id);
                    Dispatch::Ignored
                }
            }
        };
        self.settle(state).await;
        dispatch
    }

    async fn handle_session_message(&self, active: &mut ActiveSession, message: Message) -> Dispatch {
        match message {
            Message::SyncRequest(_) => Dispatch::Ignored,
            Message::SyncAccepted(accepted) => self.handle_accepted(active, accepted).await,
            Message::SyncPaused(_) => self.peer_transition(active, |m| m.pause()),
            Message::SyncResumed(_) => match self.peer_transition(active, |m| m.resume()) {
                Dispatch::Handled => active.ready(),
                other => other,
            },
            Message::SyncCancelled(_) => {
                let declined = active.machine.status() == SyncStatus::Preparing
                    && active.machine.session().role == Role::Initiator;
                if declined {
                    tracing::info!("Peer declined session {:?}", active.id());
                    self.peer_transition(active, |m| m.declined())
                } else {
                    self.peer_transition(active, |m| m.cancel())
                }
            }
            Message::ConflictDetected(detected) => self.handle_conflict_detected(active, detected),
            Message::ConflictResolution(resolution) => {
                self.handle_conflict_resolution(active, resolution).await
            }
            Message::FileTransferStart(start) => self.handle_transfer_start(active, start),
            Message::FileTransferComplete(complete) => {
                self.handle_transfer_complete(active, complete)
            }
        }
    }

    fn peer_transition(
        &self,
        active: &mut ActiveSession,
        transition: impl FnOnce(&mut SessionStateMachine) -> Result<SyncStatus, SessionError>,
    ) -> Dispatch {
        match transition(&mut active.machine) {
            Ok(status) => {
                tracing::info!("Peer moved session {:?} to {}", active.id(), status);
                self.emit_status(&active.machine);
                Dispatch::Handled
            }
            Err(e) => {
                tracing::warn!("Ignoring peer request: {}", e);
                Dispatch::Ignored
            }
        }
    }

    async fn handle_accepted(&self, active: &mut ActiveSession, accepted: SyncAccepted) -> Dispatch {
        let session = active.machine.session();
        if session.role != Role::Initiator || active.machine.status() != SyncStatus::Preparing {
            tracing::debug!("Ignoring unexpected sync_accepted");
            return Dispatch::Ignored;
        }
        let id = active.id();
        let two_way = session.two_way;

        let mut remote = match accepted.files {
            Some(files) => {
                FileCatalog::from_records(&session.target_path, files.into_iter().map(from_peer))
            }
            None => FileCatalog::new(&session.target_path),
        };
        let flow = if two_way { Flow::Both } else { Flow::Send };
        let plan = plan(&session.files, &remote, flow);
        tracing::info!(
            "Session {:?} accepted: {} to send, {} to receive, {} conflicts",
            id,
            plan.outgoing.len(),
            plan.incoming.len(),
            plan.conflicts.len()
        );

        remote.select_only(&plan.incoming);
        let session = active.machine.session_mut();
        session.files.select_only(&plan.outgoing);
        session.incoming = remote;

        for conflict in plan.conflicts {
            let detected = Message::ConflictDetected(ConflictDetected {
                session_id: id,
                path: conflict.relative_path.clone(),
                local_version: conflict.local_version.clone(),
                remote_version: conflict.remote_version.clone(),
            });
            self.emit(SyncEvent::Conflict {
                session_id: id,
                conflict: conflict.clone(),
            });
            active
                .conflicts
                .insert(conflict.relative_path.clone(), conflict);
            if !self.notify(active, detected, false).await && active.machine.status().is_terminal()
            {
                return Dispatch::Handled;
            }
        }

        let decisions: Vec<(String, Resolution)> = active
            .conflicts
            .values()
            .map(|c| (c.relative_path.clone(), self.inner.conflict_policy.choose(c)))
            .filter(|(_, r)| *r != Resolution::Unresolved)
            .collect();
        for (path, strategy) in decisions {
            match self.apply_resolution(active, &path, strategy) {
                Ok(Some(announcement)) => {
                    if !self.notify(active, announcement, true).await {
                        return Dispatch::Handled;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Policy could not resolve {}: {}", path, e),
            }
        }

        self.try_begin(active)
    }

    fn handle_conflict_detected(&self, active: &mut ActiveSession, detected: ConflictDetected) -> Dispatch {
        if active.conflicts.contains_key(&detected.path) {
            return Dispatch::Handled;
        }
        if active.machine.status() != SyncStatus::Preparing {
            tracing::warn!("Ignoring conflict on {} after planning", detected.path);
            return Dispatch::Ignored;
        }

        // The sender's local version is our remote one.
        let conflict = ConflictRecord::new(detected.remote_version, detected.local_version);
        self.emit(SyncEvent::Conflict {
            session_id: active.id(),
            conflict: conflict.clone(),
        });
        active.conflicts.insert(detected.path, conflict);
        Dispatch::Handled
    }

    async fn handle_conflict_resolution(
        &self,
        active: &mut ActiveSession,
        resolution: ConflictResolution,
    ) -> Dispatch {
        if active.machine.session().role != Role::Responder {
            tracing::warn!("Ignoring conflict_resolution for {} from the responder", resolution.path);
            return Dispatch::Ignored;
        }
        let strategy = resolution.resolution.mirrored();
        match self.apply_resolution(active, &resolution.path, strategy) {
            Ok(_) => self.try_begin(active),
            Err(e) => {
                tracing::warn!("Ignoring resolution from peer: {}", e);
                self.emit(SyncEvent::Warning {
                    session_id: Some(active.id()),
                    message: e.to_string(),
                });
                Dispatch::Ignored
            }
        }
    }

    fn handle_transfer_start(&self, active: &mut ActiveSession, start: FileTransferStart) -> Dispatch {
        if !matches!(
            active.machine.status(),
            SyncStatus::Syncing | SyncStatus::Paused
        ) {
            tracing::debug!("Ignoring file_transfer_start for {} while {}", start.path, active.machine.status());
            return Dispatch::Ignored;
        }

        active.machine.incoming_started(&start.path);
        self.emit(SyncEvent::FileStarted {
            session_id: active.id(),
            path: start.path.clone(),
            direction: Direction::Incoming,
        });
        active.receiving = Some(Receiving {
            path: start.path,
            size_bytes: start.size_bytes,
            written: false,
        });
        Dispatch::Handled
    }

    fn handle_transfer_complete(
        &self,
        active: &mut ActiveSession,
        complete: FileTransferComplete,
    ) -> Dispatch {
        let written = match active.receiving.take() {
            Some(r) if r.path == complete.path => r.written,
            other => {
                active.receiving = other;
                tracing::warn!("file_transfer_complete for {} without a start", complete.path);
                false
            }
        };

        let success = complete.success && written;
        let before = active.machine.status();
        if !active.machine.incoming_finished(&complete.path, success) {
            tracing::debug!("Not counting {}", complete.path);
            return Dispatch::Handled;
        }

        if success {
            tracing::debug!("Received {}", complete.path);
        } else {
            tracing::warn!("Receiving {} failed", complete.path);
        }
        self.emit(SyncEvent::FileCompleted {
            session_id: active.id(),
            path: complete.path,
            direction: Direction::Incoming,
            success,
        });
        self.emit_progress(&active.machine);
        if active.machine.status() != before {
            self.emit_status(&active.machine);
        }
        Dispatch::Handled
    }

    /// Handle the content of the file announced by the last
    /// `file_transfer_start` from `from`.
    pub async fn on_file_received(&self, from: &PeerId, bytes: Vec<u8>) -> Dispatch {
        let mut state = self.inner.state.lock().await;
        let active = match state.active.as_mut() {
            Some(active) if &active.peer_id() == from => active,
            _ => {
                tracing::debug!("Dropping file payload from {} outside a session", from);
                return Dispatch::Ignored;
            }
        };

        let path = match active.receiving.as_ref() {
            Some(r) if !r.written => {
                if r.size_bytes != bytes.len() as u64 {
                    tracing::warn!(
                        "{} announced {} bytes, received {}",
                        r.path,
                        r.size_bytes,
                        bytes.len()
                    );
                }
                r.path.clone()
            }
            _ => {
                tracing::warn!("Dropping file payload from {} with no announced file", from);
                return Dispatch::Ignored;
            }
        };
        if !active.machine.expects_incoming(&path) {
            tracing::warn!("Dropping unexpected file {} from {}", path, from);
            return Dispatch::Ignored;
        }

        let target = active.machine.session().target_path.clone();
        match self.inner.fs.copy_into(&target, &path, &bytes).await {
            Ok(()) => {
                if let Some(receiving) = active.receiving.as_mut() {
                    receiving.written = true;
                }
                Dispatch::Handled
            }
            Err(e) => {
                tracing::warn!("Could not write {}: {}", path, e);
                self.emit(SyncEvent::Error {
                    session_id: Some(active.id()),
                    error: e.into(),
                });
                Dispatch::Handled
            }
        }
    }

    /// The transport lost `peer`; fails any session with it.
    pub async fn on_peer_disconnected(&self, peer: &PeerId) {
        {
            let mut current = self.inner.peer.lock().await;
            if current.as_ref().map(|p| &p.id) == Some(peer) {
                tracing::info!("Peer disconnected: {}", peer);
                *current = None;
            }
        }

        let mut state = self.inner.state.lock().await;
        if state.pending.as_ref().map(|p| &p.peer.id) == Some(peer) {
            state.pending = None;
        }
        if let Some(active) = state.active.as_mut() {
            if &active.peer_id() == peer {
                self.fail(active, TransportError::PeerDisconnected(peer.clone()).into());
            }
        }
        self.settle(&mut state).await;
    }

    // ===========================================
    // Outbound transfers
    // ===========================================

    /// Send outgoing files until none remain or the session stops syncing.
    ///
    /// Returns the number of files attempted.
    pub async fn run_transfers(&self) -> usize {
        let mut attempted = 0;
        while self.transfer_next().await {
            attempted += 1;
        }
        attempted
    }

    /// Send the next outgoing file, if the session is syncing.
    ///
    /// Holds the session for the whole start/payload/complete exchange, so
    /// a pause or cancel lands between files. Returns false when there was
    /// nothing to do.
    pub async fn transfer_next(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        let attempted = match state.active.as_mut() {
            Some(active) => self.transfer_one(active).await,
            None => false,
        };
        self.settle(&mut state).await;
        attempted
    }

    async fn transfer_one(&self, active: &mut ActiveSession) -> bool {
        if active.machine.status() != SyncStatus::Syncing {
            return false;
        }
        let record = match active.machine.next_outgoing() {
            Some(record) => record.clone(),
            None => return false,
        };
        let id = active.id();
        let peer = active.peer_id();
        let path = record.relative_path.clone();

        active.machine.file_started(&path);
        self.emit(SyncEvent::FileStarted {
            session_id: id,
            path: path.clone(),
            direction: Direction::Outgoing,
        });

        let start = Message::FileTransferStart(FileTransferStart {
            session_id: id,
            path: path.clone(),
            size_bytes: record.size_bytes,
        });
        let sent = match self.send(&peer, &start).await {
            Ok(()) => self.inner.transport.send_file(&peer, &record.absolute_path).await,
            Err(e) => Err(e),
        };

        let success = match sent {
            Ok(()) => true,
            Err(e) if e.is_disconnect() => {
                self.fail(active, e.into());
                return false;
            }
            Err(e) => {
                tracing::warn!("Sending {} failed: {}", path, e);
                self.emit(SyncEvent::Error {
                    session_id: Some(id),
                    error: e.into(),
                });
                false
            }
        };

        let complete = Message::FileTransferComplete(FileTransferComplete {
            session_id: id,
            path: path.clone(),
            success,
        });
        if let Err(e) = self.send(&peer, &complete).await {
            if e.is_disconnect() {
                self.fail(active, e.into());
                return false;
            }
            tracing::warn!("Could not confirm {}: {}", path, e);
        }

        let before = active.machine.status();
        active.machine.file_finished(&path, success);
        if success {
            tracing::debug!("Sent {} ({} bytes)", path, record.size_bytes);
        }
        self.emit(SyncEvent::FileCompleted {
            session_id: id,
            path,
            direction: Direction::Outgoing,
            success,
        });
        self.emit_progress(&active.machine);
        if active.machine.status() != before {
            self.emit_status(&active.machine);
        }
        true
    }

    // ===========================================
    // Helpers
    // ===========================================

    async fn send(&self, peer: &PeerId, message: &Message) -> Result<(), TransportError> {
        tracing::debug!("Sending {} for {:?} to {}", message.kind(), message.session_id(), peer);
        self.inner.transport.send_message(peer, message).await
    }

    /// Send a session message; a lost peer always fails the session, other
    /// errors only when `required`. Returns whether it was sent.
    async fn notify(&self, active: &mut ActiveSession, message: Message, required: bool) -> bool {
        let peer = active.peer_id();
        match self.send(&peer, &message).await {
            Ok(()) => true,
            Err(e) if required || e.is_disconnect() => {
                self.fail(active, e.into());
                false
            }
            Err(e) => {
                tracing::warn!("Could not send {}: {}", message.kind(), e);
                self.emit(SyncEvent::Error {
                    session_id: Some(active.id()),
                    error: e.into(),
                });
                false
            }
        }
    }

    fn fail(&self, active: &mut ActiveSession, error: OrchestratorError) {
        let lost_peer = matches!(&error, OrchestratorError::Transport(e) if e.is_disconnect());
        let result = if lost_peer {
            active.machine.peer_disconnected()
        } else {
            active.machine.abort()
        };
        if result.is_ok() {
            tracing::warn!("Session {:?} failed: {}", active.id(), error);
            self.emit_status(&active.machine);
        }
        self.emit(SyncEvent::Error {
            session_id: Some(active.id()),
            error,
        });
    }

    /// Retire a terminal session, keeping only its summary.
    async fn settle(&self, state: &mut State) {
        let finished = state
            .active
            .as_ref()
            .map(|a| a.machine.status().is_terminal())
            .unwrap_or(false);
        if !finished {
            return;
        }
        let active = match state.active.take() {
            Some(active) => active,
            None => return,
        };

        let session = active.machine.session();
        if active.machine.status() == SyncStatus::Completed
            && session.role == Role::Responder
            && !session.two_way
            && self.inner.config.sync.mirror_deletions
        {
            self.mirror_deletions(&active).await;
        }

        let snapshot = SessionSnapshot::of(&active.machine);
        tracing::info!(
            "Session {:?} {}: {}/{} files, {} failed",
            snapshot.id,
            snapshot.status,
            snapshot.progress.processed_files,
            snapshot.progress.total_files,
            snapshot.progress.failed_files
        );
        state.last = Some(snapshot);
    }

    async fn mirror_deletions(&self, active: &ActiveSession) {
        let root = &active.machine.session().target_path;
        for path in &active.deleted_in_source {
            let result = match safe_join(root, path) {
                Ok(target) => self.inner.fs.delete(&target).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => tracing::debug!("Removed {} (deleted in source)", path),
                Err(e) => {
                    tracing::warn!("Could not remove {}: {}", path, e);
                    self.emit(SyncEvent::Warning {
                        session_id: Some(active.id()),
                        message: format!("could not remove {}: {}", path, e),
                    });
                }
            }
        }
    }

    fn warn_skipped(&self, session_id: SessionId, catalog: &FileCatalog) {
        if catalog.skipped() > 0 {
            let warning = CatalogError::PartialReadWarning {
                skipped: catalog.skipped(),
            };
            tracing::warn!("{}: {}", catalog.root().display(), warning);
            self.emit(SyncEvent::Warning {
                session_id: Some(session_id),
                message: warning.to_string(),
            });
        }
    }

    fn emit(&self, event: SyncEvent) {
        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
    }

    fn emit_status(&self, machine: &SessionStateMachine) {
        self.emit(SyncEvent::StatusChanged {
            session_id: machine.id(),
            status: machine.status(),
        });
    }

    fn emit_progress(&self, machine: &SessionStateMachine) {
        self.emit(SyncEvent::Progress {
            session_id: machine.id(),
            progress: machine.progress(),
        });
    }
}

impl<T: Transport + 'static, F: FileSystem + 'static> SyncOrchestrator<T, F> {
    /// Run [`SyncOrchestrator::run_transfers`] on a background task.
    pub fn spawn_transfers(&self) -> JoinHandle<usize> {
        let this = self.clone();
        tokio::spawn(async move { this.run_transfers().await })
    }

    /// Process inbound frames until the channel closes.
    ///
    /// Transfers are started on a background task whenever a frame makes
    /// outgoing files ready.
    pub async fn run(&self, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        tracing::info!("{} listening for peer traffic", self.inner.config.device.name);
        while let Some(frame) = inbound.recv().await {
            let dispatch = match frame {
                Inbound::Message { peer, bytes } => self.on_bytes_received(&peer, &bytes).await,
                Inbound::File { peer, bytes } => self.on_file_received(&peer, bytes).await,
                Inbound::Disconnected { peer } => {
                    self.on_peer_disconnected(&peer).await;
                    Dispatch::Handled
                }
            };
            if dispatch == Dispatch::TransfersReady {
                self.spawn_transfers();
            }
        }
        tracing::debug!("Inbound channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;
    use crate::transport::{MockTransport, Sent};
    use sync_core::DeclineAll;

    type TestOrchestrator = SyncOrchestrator<MockTransport, MockFileSystem>;

    fn phone() -> Peer {
        Peer::new(PeerId::new("phone"), "Phone")
    }

    fn tree(files: &[(&str, &[u8], u64)]) -> MockFileSystem {
        let fs = MockFileSystem::new();
        for (path, bytes, modified) in files {
            fs.add_file(*path, bytes, *modified);
        }
        fs
    }

    fn five_files() -> MockFileSystem {
        tree(&[
            ("/src/1.txt", b"one", 1),
            ("/src/2.txt", b"two", 1),
            ("/src/3.txt", b"three", 1),
            ("/src/4.txt", b"four", 1),
            ("/src/5.txt", b"five", 1),
        ])
    }

    async fn orchestrator(
        config: SyncConfig,
        fs: MockFileSystem,
    ) -> (TestOrchestrator, MockTransport, mpsc::UnboundedReceiver<SyncEvent>) {
        let transport = MockTransport::new();
        let (orch, rx) = SyncOrchestrator::new(config, transport.clone(), fs);
        orch.connect_peer(phone()).await;
        (orch, transport, rx)
    }

    fn wire(message: Message) -> Vec<u8> {
        message.to_bytes().unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn statuses(events: &[SyncEvent]) -> Vec<SyncStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::StatusChanged { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// Initiator session past `sync_accepted` (no peer catalog).
    async fn syncing(
        fs: MockFileSystem,
    ) -> (
        TestOrchestrator,
        MockTransport,
        mpsc::UnboundedReceiver<SyncEvent>,
        SessionId,
    ) {
        let (orch, transport, rx) = orchestrator(SyncConfig::default(), fs).await;
        let id = orch.start_sync("/src", false).await.unwrap();
        let accepted = wire(Message::SyncAccepted(SyncAccepted {
            session_id: id,
            files: None,
        }));
        assert_eq!(
            orch.on_bytes_received(&phone().id, &accepted).await,
            Dispatch::TransfersReady
        );
        (orch, transport, rx, id)
    }

    fn request(id: SessionId, two_way: bool, files: Vec<FileRecord>) -> Vec<u8> {
        wire(Message::SyncRequest(SyncRequest {
            session_id: id,
            source_path: "/laptop/photos".into(),
            two_way,
            files,
            device_name: Some("Laptop".into()),
        }))
    }

    fn offered(path: &str, size: u64, modified: u64) -> FileRecord {
        FileRecord::new(path, format!("/laptop/photos/{}", path), size, modified, "text/plain")
    }

    // ===========================================
    // Starting A Session
    // ===========================================

    #[tokio::test]
    async fn start_without_peer_fails() {
        let (orch, _rx) =
            SyncOrchestrator::new(SyncConfig::default(), MockTransport::new(), five_files());
        let err = orch.start_sync("/src", false).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Session(SessionError::NoPeer)
        ));
    }

    #[tokio::test]
    async fn start_sends_request_with_catalog() {
        let config = SyncConfig::default().with_device_name("Laptop");
        let (orch, transport, mut rx) = orchestrator(config, five_files()).await;

        let id = orch.start_sync("/src", false).await.unwrap();

        assert_eq!(orch.status().await, SyncStatus::Preparing);
        assert_eq!(
            statuses(&drain(&mut rx)),
            vec![SyncStatus::Scanning, SyncStatus::Preparing]
        );
        match transport.last_message().unwrap() {
            Message::SyncRequest(req) => {
                assert_eq!(req.session_id, id);
                assert_eq!(req.files.len(), 5);
                assert!(!req.two_way);
                assert_eq!(req.device_name.as_deref(), Some("Laptop"));
                assert!(req.files.iter().all(|f| f.hash().is_some()));
            }
            other => panic!("expected sync_request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn second_start_is_busy() {
        let (orch, _transport, _rx) = orchestrator(SyncConfig::default(), five_files()).await;
        orch.start_sync("/src", false).await.unwrap();

        let err = orch.start_sync("/src", false).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Session(SessionError::Busy)));
        assert_eq!(orch.status().await, SyncStatus::Preparing);
    }

    #[tokio::test]
    async fn empty_folder_is_nothing_to_sync() {
        let fs = MockFileSystem::new();
        fs.add_dir("/empty");
        let (orch, transport, _rx) = orchestrator(SyncConfig::default(), fs).await;

        let err = orch.start_sync("/empty", false).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Session(SessionError::NothingToSync)
        ));
        assert_eq!(orch.status().await, SyncStatus::Idle);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_folder_returns_to_idle() {
        let (orch, _transport, _rx) = orchestrator(SyncConfig::default(), five_files()).await;
        let err = orch.start_sync("/nope", false).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Catalog(CatalogError::NotFound(_))
        ));
        assert_eq!(orch.status().await, SyncStatus::Idle);

        // A failed scan does not block the next attempt.
        assert!(orch.start_sync("/src", false).await.is_ok());
    }

    #[tokio::test]
    async fn unreadable_files_raise_a_warning() {
        let fs = five_files();
        fs.mark_unreadable("/src/3.txt");
        let (orch, transport, mut rx) = orchestrator(SyncConfig::default(), fs).await;

        orch.start_sync("/src", false).await.unwrap();

        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SyncEvent::Warning { .. })));
        match transport.last_message().unwrap() {
            Message::SyncRequest(req) => assert_eq!(req.files.len(), 4),
            other => panic!("expected sync_request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn peer_decline_cancels() {
        let (orch, _transport, _rx) = orchestrator(SyncConfig::default(), five_files()).await;
        let id = orch.start_sync("/src", false).await.unwrap();

        let cancelled = wire(Message::SyncCancelled(SessionRef::new(id)));
        orch.on_bytes_received(&phone().id, &cancelled).await;

        assert_eq!(orch.status().await, SyncStatus::Cancelled);
        // The orchestrator is free again.
        assert!(orch.start_sync("/src", false).await.is_ok());
    }

    // ===========================================
    // Outgoing Transfers
    // ===========================================

    #[tokio::test]
    async fn transfers_every_file_then_completes() {
        let (orch, transport, mut rx, id) = syncing(five_files()).await;

        assert_eq!(orch.run_transfers().await, 5);

        assert_eq!(orch.status().await, SyncStatus::Completed);
        let progress = orch.progress().await;
        assert_eq!(progress.processed_files, 5);
        assert_eq!(progress.total_files, 5);
        assert_eq!(progress.file_progress(), 1.0);
        assert_eq!(transport.sent_files().len(), 5);

        // start, payload, complete per file, in that order
        let sent = transport.sent();
        assert!(matches!(&sent[1], Sent::Message(_, Message::FileTransferStart(s)) if s.path == "1.txt"));
        assert!(matches!(&sent[2], Sent::File(_, p) if p == Path::new("/src/1.txt")));
        assert!(matches!(
            &sent[3],
            Sent::Message(_, Message::FileTransferComplete(c)) if c.success && c.session_id == id
        ));

        let events = drain(&mut rx);
        assert_eq!(statuses(&events).last(), Some(&SyncStatus::Completed));
        let completed = events
            .iter()
            .filter(|e| matches!(e, SyncEvent::FileCompleted { direction: Direction::Outgoing, .. }))
            .count();
        assert_eq!(completed, 5);
    }

    #[tokio::test]
    async fn peer_catalog_limits_what_is_sent() {
        let fs = tree(&[("/src/same.txt", b"same", 1), ("/src/new.txt", b"new", 1)]);
        let (orch, transport, _rx) = orchestrator(SyncConfig::default(), fs).await;
        let id = orch.start_sync("/src", false).await.unwrap();

        let same = FileRecord::new("same.txt", "/dst/same.txt", 4, 99, "text/plain")
            .with_hash(blake3::hash(b"same").to_hex().to_string());
        let accepted = wire(Message::SyncAccepted(SyncAccepted {
            session_id: id,
            files: Some(vec![same]),
        }));
        orch.on_bytes_received(&phone().id, &accepted).await;

        assert_eq!(orch.run_transfers().await, 1);
        assert_eq!(transport.sent_files(), vec![PathBuf::from("/src/new.txt")]);
        assert_eq!(orch.status().await, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn up_to_date_peer_completes_immediately() {
        let fs = tree(&[("/src/same.txt", b"same", 1)]);
        let (orch, _transport, _rx) = orchestrator(SyncConfig::default(), fs).await;
        let id = orch.start_sync("/src", false).await.unwrap();

        let same = FileRecord::new("same.txt", "/dst/same.txt", 4, 1, "text/plain");
        let accepted = wire(Message::SyncAccepted(SyncAccepted {
            session_id: id,
            files: Some(vec![same]),
        }));
        assert_eq!(
            orch.on_bytes_received(&phone().id, &accepted).await,
            Dispatch::Handled
        );
        assert_eq!(orch.status().await, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_after_two_of_five() {
        let (orch, transport, _rx, id) = syncing(five_files()).await;

        assert!(orch.transfer_next().await);
        assert!(orch.transfer_next().await);
        orch.cancel().await.unwrap();

        assert_eq!(orch.run_transfers().await, 0);
        assert_eq!(orch.status().await, SyncStatus::Cancelled);
        assert_eq!(orch.progress().await.processed_files, 2);
        assert_eq!(transport.sent_files().len(), 2);
        assert_eq!(
            transport.last_message(),
            Some(Message::SyncCancelled(SessionRef::new(id)))
        );
    }

    #[tokio::test]
    async fn pause_holds_transfers_until_resume() {
        let (orch, transport, _rx, id) = syncing(five_files()).await;

        assert!(orch.transfer_next().await);
        orch.pause().await.unwrap();
        assert_eq!(orch.status().await, SyncStatus::Paused);
        assert!(!orch.transfer_next().await);
        assert_eq!(
            transport.last_message(),
            Some(Message::SyncPaused(SessionRef::new(id)))
        );

        assert_eq!(orch.resume().await.unwrap(), Dispatch::TransfersReady);
        assert_eq!(orch.run_transfers().await, 4);
        assert_eq!(orch.status().await, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn peer_pause_and_resume() {
        let (orch, _transport, _rx, id) = syncing(five_files()).await;

        let paused = wire(Message::SyncPaused(SessionRef::new(id)));
        assert_eq!(
            orch.on_bytes_received(&phone().id, &paused).await,
            Dispatch::Handled
        );
        assert_eq!(orch.status().await, SyncStatus::Paused);
        assert!(!orch.transfer_next().await);

        let resumed = wire(Message::SyncResumed(SessionRef::new(id)));
        assert_eq!(
            orch.on_bytes_received(&phone().id, &resumed).await,
            Dispatch::TransfersReady
        );
    }

    #[tokio::test]
    async fn control_without_session_is_invalid() {
        let (orch, _transport, _rx) = orchestrator(SyncConfig::default(), five_files()).await;
        for result in [orch.pause().await, orch.cancel().await] {
            assert!(matches!(
                result,
                Err(OrchestratorError::Session(SessionError::InvalidTransition {
                    from: SyncStatus::Idle,
                    ..
                }))
            ));
        }
        assert!(orch.resume().await.is_err());
    }

    #[tokio::test]
    async fn failed_file_is_counted_and_session_continues() {
        let fs = tree(&[("/src/a.txt", b"a", 1), ("/src/b.txt", b"b", 1)]);
        let (orch, transport, _rx, _id) = syncing(fs).await;
        transport.fail_next_file("disk read error");

        assert_eq!(orch.run_transfers().await, 2);

        let progress = orch.progress().await;
        assert_eq!(progress.processed_files, 2);
        assert_eq!(progress.failed_files, 1);
        assert_eq!(orch.status().await, SyncStatus::Completed);

        let outcomes: Vec<bool> = transport
            .sent_messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::FileTransferComplete(c) => Some(c.success),
                _ => None,
            })
            .collect();
        assert_eq!(outcomes, vec![false, true]);
    }

    #[tokio::test]
    async fn lost_transport_fails_session() {
        let (orch, transport, mut rx, _id) = syncing(five_files()).await;
        drain(&mut rx);
        transport.disconnect();

        assert!(!orch.transfer_next().await);
        assert_eq!(orch.status().await, SyncStatus::Failed);
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            SyncEvent::Error {
                error: OrchestratorError::Transport(TransportError::PeerDisconnected(_)),
                ..
            }
        )));
    }

    #[tokio::test]
    async fn peer_disconnect_fails_session() {
        let (orch, _transport, mut rx, _id) = syncing(five_files()).await;
        assert!(orch.transfer_next().await);
        drain(&mut rx);

        orch.on_peer_disconnected(&phone().id).await;

        assert_eq!(orch.status().await, SyncStatus::Failed);
        assert!(orch.peer().await.is_none());
        let events = drain(&mut rx);
        assert_eq!(statuses(&events), vec![SyncStatus::Failed]);
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::Error {
                error: OrchestratorError::Transport(TransportError::PeerDisconnected(_)),
                ..
            }
        )));
    }

    // ===========================================
    // Inbound Robustness
    // ===========================================

    #[tokio::test]
    async fn malformed_and_unknown_messages_are_dropped() {
        let (orch, _transport, _rx, id) = syncing(five_files()).await;
        let peer = phone().id;

        assert_eq!(
            orch.on_bytes_received(&peer, b"not json").await,
            Dispatch::Ignored
        );
        let future = format!(r#"{{"type":"sync_teleport","sessionId":"{}"}}"#, id);
        assert_eq!(
            orch.on_bytes_received(&peer, future.as_bytes()).await,
            Dispatch::Ignored
        );
        assert_eq!(orch.status().await, SyncStatus::Syncing);
    }

    #[tokio::test]
    async fn stale_session_messages_are_dropped() {
        let (orch, _transport, _rx, _id) = syncing(five_files()).await;

        let stale = wire(Message::SyncCancelled(SessionRef::new(SessionId::new())));
        assert_eq!(
            orch.on_bytes_received(&phone().id, &stale).await,
            Dispatch::Ignored
        );
        assert_eq!(orch.status().await, SyncStatus::Syncing);
    }

    #[tokio::test]
    async fn messages_from_other_peers_are_dropped() {
        let (orch, _transport, _rx, id) = syncing(five_files()).await;

        let cancel = wire(Message::SyncCancelled(SessionRef::new(id)));
        assert_eq!(
            orch.on_bytes_received(&PeerId::new("stranger"), &cancel)
                .await,
            Dispatch::Ignored
        );
        assert_eq!(orch.status().await, SyncStatus::Syncing);
    }

    // ===========================================
    // Responder
    // ===========================================

    fn responder_config() -> SyncConfig {
        SyncConfig::default().with_receive_dir("/dst")
    }

    #[tokio::test]
    async fn auto_accept_receives_files() {
        let fs = MockFileSystem::new();
        let (orch, transport, mut rx) = orchestrator(responder_config(), fs.clone()).await;
        let id = SessionId::new();
        let peer = phone().id;

        let dispatch = orch
            .on_bytes_received(&peer, &request(id, false, vec![offered("a/b.txt", 5, 10)]))
            .await;
        assert_eq!(dispatch, Dispatch::Handled);
        assert_eq!(orch.status().await, SyncStatus::Syncing);
        assert_eq!(
            transport.last_message(),
            Some(Message::SyncAccepted(SyncAccepted {
                session_id: id,
                files: Some(vec![]),
            }))
        );

        let start = wire(Message::FileTransferStart(FileTransferStart {
            session_id: id,
            path: "a/b.txt".into(),
            size_bytes: 5,
        }));
        orch.on_bytes_received(&peer, &start).await;
        orch.on_file_received(&peer, b"hello".to_vec()).await;
        let complete = wire(Message::FileTransferComplete(FileTransferComplete {
            session_id: id,
            path: "a/b.txt".into(),
            success: true,
        }));
        orch.on_bytes_received(&peer, &complete).await;

        assert_eq!(fs.read("/dst/a/b.txt").unwrap(), b"hello");
        assert_eq!(orch.status().await, SyncStatus::Completed);
        let progress = orch.progress().await;
        assert_eq!(progress.transferred_bytes, 5);
        assert_eq!(
            statuses(&drain(&mut rx)),
            vec![
                SyncStatus::Scanning,
                SyncStatus::Preparing,
                SyncStatus::Syncing,
                SyncStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn write_failure_counts_as_failed_file() {
        let fs = MockFileSystem::new();
        let (orch, _transport, mut rx) = orchestrator(responder_config(), fs.clone()).await;
        let id = SessionId::new();
        let peer = phone().id;
        orch.on_bytes_received(&peer, &request(id, false, vec![offered("a.txt", 1, 1)]))
            .await;

        fs.fail_next_write("disk full");
        let start = wire(Message::FileTransferStart(FileTransferStart {
            session_id: id,
            path: "a.txt".into(),
            size_bytes: 1,
        }));
        orch.on_bytes_received(&peer, &start).await;
        orch.on_file_received(&peer, b"x".to_vec()).await;
        let complete = wire(Message::FileTransferComplete(FileTransferComplete {
            session_id: id,
            path: "a.txt".into(),
            success: true,
        }));
        orch.on_bytes_received(&peer, &complete).await;

        assert!(!fs.exists("/dst/a.txt"));
        assert_eq!(orch.progress().await.failed_files, 1);
        assert_eq!(orch.status().await, SyncStatus::Completed);
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            SyncEvent::Error {
                error: OrchestratorError::FileSystem(_),
                ..
            }
        )));
    }

    #[tokio::test]
    async fn escaping_paths_are_never_written() {
        let fs = MockFileSystem::new();
        let (orch, _transport, _rx) = orchestrator(responder_config(), fs.clone()).await;
        let id = SessionId::new();
        let peer = phone().id;
        orch.on_bytes_received(&peer, &request(id, false, vec![offered("../evil", 1, 1)]))
            .await;

        let start = wire(Message::FileTransferStart(FileTransferStart {
            session_id: id,
            path: "../evil".into(),
            size_bytes: 1,
        }));
        orch.on_bytes_received(&peer, &start).await;
        orch.on_file_received(&peer, b"x".to_vec()).await;

        assert!(!fs.exists("/evil"));
    }

    #[tokio::test]
    async fn unannounced_payload_is_dropped() {
        let fs = MockFileSystem::new();
        let (orch, _transport, _rx) = orchestrator(responder_config(), fs).await;
        let id = SessionId::new();
        let peer = phone().id;
        orch.on_bytes_received(&peer, &request(id, false, vec![offered("a.txt", 1, 1)]))
            .await;

        assert_eq!(
            orch.on_file_received(&peer, b"x".to_vec()).await,
            Dispatch::Ignored
        );
    }

    #[tokio::test]
    async fn decline_policy_answers_cancelled() {
        let transport = MockTransport::new();
        let (orch, _rx) =
            SyncOrchestrator::builder(responder_config(), transport.clone(), MockFileSystem::new())
                .accept_policy(DeclineAll)
                .build();
        let id = SessionId::new();

        orch.on_bytes_received(&phone().id, &request(id, false, vec![offered("a", 1, 1)]))
            .await;

        assert_eq!(
            transport.last_message(),
            Some(Message::SyncCancelled(SessionRef::new(id)))
        );
        assert_eq!(orch.status().await, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn busy_device_declines_new_request() {
        let (orch, transport, _rx) = orchestrator(SyncConfig::default(), five_files()).await;
        orch.start_sync("/src", false).await.unwrap();

        let other = SessionId::new();
        orch.on_bytes_received(&phone().id, &request(other, false, vec![offered("a", 1, 1)]))
            .await;

        assert_eq!(
            transport.last_message(),
            Some(Message::SyncCancelled(SessionRef::new(other)))
        );
        assert_eq!(orch.status().await, SyncStatus::Preparing);
    }

    #[tokio::test]
    async fn held_request_waits_for_decision() {
        let config = responder_config().with_auto_accept(false);
        let (orch, transport, mut rx) = orchestrator(config, MockFileSystem::new()).await;
        let id = SessionId::new();

        orch.on_bytes_received(&phone().id, &request(id, false, vec![offered("a", 3, 1)]))
            .await;
        assert!(transport.sent().is_empty());
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            SyncEvent::IncomingRequest { session_id, file_count: 1, total_bytes: 3, .. }
                if *session_id == id
        )));

        assert!(matches!(
            orch.accept_incoming(SessionId::new(), "/dst").await,
            Err(OrchestratorError::UnknownRequest(_))
        ));
        orch.accept_incoming(id, "/elsewhere").await.unwrap();
        assert_eq!(orch.status().await, SyncStatus::Syncing);
        assert!(matches!(
            transport.last_message(),
            Some(Message::SyncAccepted(_))
        ));
    }

    #[tokio::test]
    async fn held_request_can_be_declined() {
        let config = responder_config().with_auto_accept(false);
        let (orch, transport, _rx) = orchestrator(config, MockFileSystem::new()).await;
        let id = SessionId::new();
        orch.on_bytes_received(&phone().id, &request(id, false, vec![offered("a", 3, 1)]))
            .await;

        orch.decline_incoming(id).await.unwrap();
        assert_eq!(
            transport.last_message(),
            Some(Message::SyncCancelled(SessionRef::new(id)))
        );
        assert!(orch.decline_incoming(id).await.is_err());
    }

    #[tokio::test]
    async fn mirror_deletions_removes_files_missing_at_source() {
        let fs = tree(&[("/dst/old.txt", b"old", 1)]);
        let config = responder_config().with_mirror_deletions(true);
        let (orch, _transport, _rx) = orchestrator(config, fs.clone()).await;
        let id = SessionId::new();
        let peer = phone().id;
        orch.on_bytes_received(&peer, &request(id, false, vec![offered("new.txt", 3, 1)]))
            .await;

        let start = wire(Message::FileTransferStart(FileTransferStart {
            session_id: id,
            path: "new.txt".into(),
            size_bytes: 3,
        }));
        orch.on_bytes_received(&peer, &start).await;
        orch.on_file_received(&peer, b"new".to_vec()).await;
        let complete = wire(Message::FileTransferComplete(FileTransferComplete {
            session_id: id,
            path: "new.txt".into(),
            success: true,
        }));
        orch.on_bytes_received(&peer, &complete).await;

        assert_eq!(orch.status().await, SyncStatus::Completed);
        assert!(fs.exists("/dst/new.txt"));
        assert!(!fs.exists("/dst/old.txt"));
    }

    #[tokio::test]
    async fn deletions_are_kept_by_default() {
        let fs = tree(&[("/dst/old.txt", b"old", 1)]);
        let (orch, _transport, _rx) = orchestrator(responder_config(), fs.clone()).await;
        let id = SessionId::new();
        let peer = phone().id;
        let same = offered("old.txt", 3, 1);
        orch.on_bytes_received(&peer, &request(id, false, vec![same]))
            .await;

        // Nothing differs, so the session is already complete.
        assert_eq!(orch.status().await, SyncStatus::Completed);
        assert!(fs.exists("/dst/old.txt"));
    }

    #[tokio::test]
    async fn replayed_request_after_session_end_is_ignored() {
        let fs = tree(&[("/dst/old.txt", b"old", 1)]);
        let (orch, transport, _rx) = orchestrator(responder_config(), fs).await;
        let id = SessionId::new();
        let peer = phone().id;
        let frame = request(id, false, vec![offered("old.txt", 3, 1)]);

        orch.on_bytes_received(&peer, &frame).await;
        assert_eq!(orch.status().await, SyncStatus::Completed);
        let sent_before = transport.sent_messages().len();

        assert_eq!(
            orch.on_bytes_received(&peer, &frame).await,
            Dispatch::Ignored
        );
        assert_eq!(transport.sent_messages().len(), sent_before);
        assert_eq!(orch.snapshot().await.unwrap().id, id);
    }

    #[tokio::test]
    async fn completion_for_unknown_path_is_not_counted() {
        let (orch, _transport, _rx) =
            orchestrator(responder_config(), MockFileSystem::new()).await;
        let id = SessionId::new();
        let peer = phone().id;
        let files = vec![offered("a.txt", 1, 1), offered("b.txt", 1, 1)];
        orch.on_bytes_received(&peer, &request(id, false, files)).await;
        assert_eq!(orch.status().await, SyncStatus::Syncing);

        let stray = wire(Message::FileTransferComplete(FileTransferComplete {
            session_id: id,
            path: "zzz-not-in-catalog".into(),
            success: true,
        }));
        orch.on_bytes_received(&peer, &stray).await;
        assert_eq!(orch.progress().await.processed_files, 0);

        let start = wire(Message::FileTransferStart(FileTransferStart {
            session_id: id,
            path: "a.txt".into(),
            size_bytes: 1,
        }));
        orch.on_bytes_received(&peer, &start).await;
        orch.on_file_received(&peer, b"a".to_vec()).await;
        let complete = wire(Message::FileTransferComplete(FileTransferComplete {
            session_id: id,
            path: "a.txt".into(),
            success: true,
        }));
        orch.on_bytes_received(&peer, &complete).await;

        assert_eq!(orch.status().await, SyncStatus::Syncing);
        assert_eq!(orch.progress().await.processed_files, 1);
    }

    // ===========================================
    // Two-Way And Conflicts
    // ===========================================

    fn two_way_tree() -> MockFileSystem {
        tree(&[("/src/a.txt", b"local", 10), ("/src/b.txt", b"mine", 10)])
    }

    fn peer_catalog() -> Vec<FileRecord> {
        vec![
            FileRecord::new("a.txt", "/dst/a.txt", 6, 20, "text/plain"),
            FileRecord::new("c.txt", "/dst/c.txt", 6, 20, "text/plain"),
        ]
    }

    #[tokio::test]
    async fn keep_newest_resolves_conflicts_automatically() {
        let (orch, transport, mut rx) = orchestrator(SyncConfig::default(), two_way_tree()).await;
        let id = orch.start_sync("/src", true).await.unwrap();

        let accepted = wire(Message::SyncAccepted(SyncAccepted {
            session_id: id,
            files: Some(peer_catalog()),
        }));
        assert_eq!(
            orch.on_bytes_received(&phone().id, &accepted).await,
            Dispatch::TransfersReady
        );
        assert_eq!(orch.status().await, SyncStatus::Syncing);

        let messages = transport.sent_messages();
        assert!(messages.iter().any(|m| matches!(
            m,
            Message::ConflictDetected(c) if c.path == "a.txt"
        )));
        assert!(messages.iter().any(|m| matches!(
            m,
            Message::ConflictResolution(r) if r.path == "a.txt" && r.resolution == Resolution::KeepRemote
        )));

        // b.txt goes out; a.txt and c.txt come in.
        assert_eq!(orch.progress().await.total_files, 3);
        assert_eq!(orch.run_transfers().await, 1);
        assert_eq!(transport.sent_files(), vec![PathBuf::from("/src/b.txt")]);
        assert_eq!(orch.status().await, SyncStatus::Syncing);

        let conflict_events = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::Conflict { .. }))
            .count();
        assert_eq!(conflict_events, 2);
    }

    #[tokio::test]
    async fn deferred_conflict_waits_for_user() {
        let transport = MockTransport::new();
        let (orch, _rx) =
            SyncOrchestrator::builder(SyncConfig::default(), transport.clone(), two_way_tree())
                .conflict_policy(StrategyPolicy::deferred())
                .build();
        orch.connect_peer(phone()).await;
        let id = orch.start_sync("/src", true).await.unwrap();

        let accepted = wire(Message::SyncAccepted(SyncAccepted {
            session_id: id,
            files: Some(peer_catalog()),
        }));
        assert_eq!(
            orch.on_bytes_received(&phone().id, &accepted).await,
            Dispatch::Handled
        );
        assert_eq!(orch.status().await, SyncStatus::Preparing);
        let conflicts = orch.conflicts().await;
        assert_eq!(conflicts.len(), 1);
        assert!(!conflicts[0].is_resolved());

        assert_eq!(
            orch.resolve_conflict("a.txt", Resolution::KeepLocal)
                .await
                .unwrap(),
            Dispatch::TransfersReady
        );
        assert_eq!(orch.status().await, SyncStatus::Syncing);
        assert!(matches!(
            transport.last_message(),
            Some(Message::ConflictResolution(r)) if r.resolution == Resolution::KeepLocal
        ));

        // Idempotent with the same strategy, rejected with another.
        assert!(orch
            .resolve_conflict("a.txt", Resolution::KeepLocal)
            .await
            .is_ok());
        assert!(matches!(
            orch.resolve_conflict("a.txt", Resolution::KeepRemote).await,
            Err(OrchestratorError::Conflict(ConflictError::AlreadyResolved { .. }))
        ));

        // a.txt (kept local) and b.txt go out.
        assert_eq!(orch.run_transfers().await, 2);
    }

    #[tokio::test]
    async fn responder_applies_mirrored_resolution() {
        let fs = tree(&[("/dst/a.txt", b"local", 10)]);
        let (orch, _transport, _rx) = orchestrator(responder_config(), fs).await;
        let id = SessionId::new();
        let peer = phone().id;

        orch.on_bytes_received(&peer, &request(id, true, vec![offered("a.txt", 6, 20)]))
            .await;
        assert_eq!(orch.status().await, SyncStatus::Preparing);
        assert_eq!(orch.conflicts().await.len(), 1);

        // The initiator keeps its own version, which is remote to us.
        let resolution = wire(Message::ConflictResolution(ConflictResolution {
            session_id: id,
            path: "a.txt".into(),
            resolution: Resolution::KeepLocal,
        }));
        orch.on_bytes_received(&peer, &resolution).await;

        assert_eq!(orch.status().await, SyncStatus::Syncing);
        let conflicts = orch.conflicts().await;
        assert_eq!(conflicts[0].winner(), Some(Winner::Remote));
        assert_eq!(orch.progress().await.total_files, 1);
    }

    #[tokio::test]
    async fn responder_leaves_conflicts_to_initiator() {
        let fs = tree(&[("/dst/a.txt", b"local", 10)]);
        let (orch, transport, _rx) = orchestrator(responder_config(), fs).await;
        let id = SessionId::new();
        let peer = phone().id;

        orch.on_bytes_received(&peer, &request(id, true, vec![offered("a.txt", 6, 20)]))
            .await;
        assert_eq!(orch.status().await, SyncStatus::Preparing);
        let sent_before = transport.sent_messages().len();

        assert!(matches!(
            orch.resolve_conflict("a.txt", Resolution::KeepLocal).await,
            Err(OrchestratorError::Session(SessionError::InvalidTransition {
                event: "resolve_conflict",
                ..
            }))
        ));
        assert_eq!(orch.status().await, SyncStatus::Preparing);
        assert!(!orch.conflicts().await[0].is_resolved());
        assert_eq!(transport.sent_messages().len(), sent_before);

        // The initiator's choice still lands afterwards.
        let resolution = wire(Message::ConflictResolution(ConflictResolution {
            session_id: id,
            path: "a.txt".into(),
            resolution: Resolution::KeepLocal,
        }));
        assert_ne!(
            orch.on_bytes_received(&peer, &resolution).await,
            Dispatch::Ignored
        );
        assert_eq!(orch.conflicts().await[0].winner(), Some(Winner::Remote));
        assert_eq!(orch.status().await, SyncStatus::Syncing);
    }

    #[tokio::test]
    async fn initiator_ignores_resolution_from_responder() {
        let transport = MockTransport::new();
        let (orch, _rx) =
            SyncOrchestrator::builder(SyncConfig::default(), transport.clone(), two_way_tree())
                .conflict_policy(StrategyPolicy::deferred())
                .build();
        orch.connect_peer(phone()).await;
        let id = orch.start_sync("/src", true).await.unwrap();
        let accepted = wire(Message::SyncAccepted(SyncAccepted {
            session_id: id,
            files: Some(peer_catalog()),
        }));
        orch.on_bytes_received(&phone().id, &accepted).await;

        let resolution = wire(Message::ConflictResolution(ConflictResolution {
            session_id: id,
            path: "a.txt".into(),
            resolution: Resolution::KeepLocal,
        }));
        assert_eq!(
            orch.on_bytes_received(&phone().id, &resolution).await,
            Dispatch::Ignored
        );
        assert!(!orch.conflicts().await[0].is_resolved());
        assert_eq!(orch.status().await, SyncStatus::Preparing);
    }
}
