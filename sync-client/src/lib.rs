//! # sync-client
//!
//! Sync orchestrator for pairsync two-peer folder synchronization.
//!
//! This is the library applications embed to sync a folder with a paired
//! device.
//!
//! ## Features
//!
//! - **Session orchestration**: request, accept, plan, transfer, settle
//! - **Two-way sync**: conflicts detected on both sides, decided once
//! - **Capability seams**: pluggable [`Transport`] and [`FileSystem`]
//! - **Pure State Machine**: Uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use pairsync_client::{ChannelTransport, LocalFileSystem, Peer, SyncConfig, SyncOrchestrator};
//! use sync_types::PeerId;
//!
//! let ((link, inbound), _phone_end) =
//!     ChannelTransport::pair(PeerId::new("laptop"), PeerId::new("phone"));
//! let (laptop, mut events) =
//!     SyncOrchestrator::new(SyncConfig::default(), link, LocalFileSystem::new());
//! tokio::spawn({
//!     let laptop = laptop.clone();
//!     async move { laptop.run(inbound).await }
//! });
//!
//! laptop.connect_peer(Peer::new(PeerId::new("phone"), "Phone")).await;
//! laptop.start_sync("/home/me/Photos", false).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod config;
pub mod fs;
pub mod orchestrator;
pub mod transport;

pub use catalog::CatalogError;
pub use config::{ConfigError, SyncConfig};
pub use fs::{safe_join, FileSystem, FsError, Listing, LocalFileSystem, MockFileSystem, RawEntry};
pub use orchestrator::{
    Direction, Dispatch, OrchestratorBuilder, OrchestratorError, Peer, SessionSnapshot,
    SyncEvent, SyncOrchestrator,
};
pub use transport::{ChannelTransport, Inbound, MockTransport, Sent, Transport, TransportError};
