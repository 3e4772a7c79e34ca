//! Pluggable decision points.
//!
//! Accepting an incoming session and settling conflicts are policy, not
//! protocol. The defaults (auto-accept, keep-newest) can be swapped for
//! interactive implementations without touching the state machine.

use std::path::PathBuf;

use crate::conflict::ConflictRecord;
use sync_types::{PeerId, Resolution};

/// What the responder knows about an incoming `sync_request`.
#[derive(Debug, Clone, Copy)]
pub struct IncomingRequest<'a> {
    /// Requesting device.
    pub peer_id: &'a PeerId,
    /// Requesting device's display name.
    pub peer_display_name: &'a str,
    /// Source folder on the requesting device.
    pub source_path: &'a str,
    /// Whether the request is two-way.
    pub two_way: bool,
    /// Number of files offered.
    pub file_count: usize,
    /// Total size of the files offered.
    pub total_bytes: u64,
}

/// Answer to an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptDecision {
    /// Take part, writing received files into `target_path`.
    Accept {
        /// Local folder for this session.
        target_path: PathBuf,
    },
    /// Refuse the session.
    Decline,
    /// Hold the request until `accept_incoming` or `decline_incoming` is
    /// called, e.g. after asking the user.
    Defer,
}

/// Decides whether to accept incoming sessions.
pub trait AcceptPolicy: Send + Sync {
    /// Decide on a request.
    fn decide(&self, request: &IncomingRequest<'_>) -> AcceptDecision;
}

/// Accept everything into one folder.
#[derive(Debug, Clone)]
pub struct AutoAccept {
    target_path: PathBuf,
}

impl AutoAccept {
    /// Accept every request into `target_path`.
    pub fn new(target_path: impl Into<PathBuf>) -> Self {
        Self {
            target_path: target_path.into(),
        }
    }
}

impl AcceptPolicy for AutoAccept {
    fn decide(&self, _request: &IncomingRequest<'_>) -> AcceptDecision {
        AcceptDecision::Accept {
            target_path: self.target_path.clone(),
        }
    }
}

/// Refuse every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclineAll;

impl AcceptPolicy for DeclineAll {
    fn decide(&self, _request: &IncomingRequest<'_>) -> AcceptDecision {
        AcceptDecision::Decline
    }
}

/// Leave every request for an explicit decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct AskUser;

impl AcceptPolicy for AskUser {
    fn decide(&self, _request: &IncomingRequest<'_>) -> AcceptDecision {
        AcceptDecision::Defer
    }
}

/// Chooses a strategy for each detected conflict.
pub trait ConflictPolicy: Send + Sync {
    /// Strategy for `conflict`; `Resolution::Unresolved` defers to the user.
    fn choose(&self, conflict: &ConflictRecord) -> Resolution;
}

/// Apply one fixed strategy to every conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyPolicy {
    strategy: Resolution,
}

impl StrategyPolicy {
    /// Use `strategy` for every conflict.
    pub fn new(strategy: Resolution) -> Self {
        Self { strategy }
    }

    /// Newest modification wins.
    pub fn keep_newest() -> Self {
        Self::new(Resolution::KeepNewest)
    }

    /// Leave every conflict for an explicit `resolve_conflict` call.
    pub fn deferred() -> Self {
        Self::new(Resolution::Unresolved)
    }
}

impl Default for StrategyPolicy {
    fn default() -> Self {
        Self::keep_newest()
    }
}

impl ConflictPolicy for StrategyPolicy {
    fn choose(&self, _conflict: &ConflictRecord) -> Resolution {
        self.strategy
    }
}
