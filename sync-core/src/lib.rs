//! # sync-core
//!
//! Pure logic for pairsync (no I/O, instant tests).
//!
//! This crate implements the catalog diff, transfer planning, conflict
//! resolution and the session state machine without any network or disk
//! I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (transport, filesystem) is performed by `sync-client`,
//! which drives these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod conflict;
pub mod plan;
pub mod policy;
pub mod session;

pub use catalog::{diff, Change, DiffResult, FileCatalog};
pub use conflict::{detect, detect_all, resolve, ConflictError, ConflictRecord, Outcome, Winner};
pub use plan::{plan, Flow, SyncPlan};
pub use policy::{
    AcceptDecision, AcceptPolicy, AskUser, AutoAccept, ConflictPolicy, DeclineAll, IncomingRequest,
    StrategyPolicy,
};
pub use session::{
    now_millis, Progress, Role, SessionError, SessionEvent, SessionStateMachine, SyncSession,
    SyncStatus,
};
