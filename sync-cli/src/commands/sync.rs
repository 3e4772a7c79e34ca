//! Sync two local folders through a full protocol session.
//!
//! Both ends run in this process and talk over an in-process channel, so
//! the session goes through the same request, planning, conflict and
//! transfer steps as a sync between two devices.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use sync_client::{
    ChannelTransport, Direction, LocalFileSystem, Peer, SessionSnapshot, SyncConfig, SyncEvent,
    SyncOrchestrator,
};
use sync_core::SyncStatus;
use sync_types::PeerId;
use tokio::sync::mpsc;

type Orchestrator = SyncOrchestrator<ChannelTransport, LocalFileSystem>;

/// How long the target may take to settle after the source finished.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the sync command; returns the source side's summary.
pub async fn run(
    config: SyncConfig,
    source: &Path,
    target: &Path,
    two_way: bool,
) -> Result<SessionSnapshot> {
    let source_id = PeerId::new("source");
    let target_id = PeerId::new("target");
    let ((source_link, source_inbound), (target_link, target_inbound)) =
        ChannelTransport::pair(source_id.clone(), target_id.clone());
    let source_link = source_link.with_send_timeout(config.send_timeout());
    let target_link = target_link.with_send_timeout(config.send_timeout());

    let target_config = config
        .clone()
        .with_receive_dir(target)
        .with_auto_accept(true)
        .with_device_name(&target.display().to_string());
    let source_config = config.with_device_name(&source.display().to_string());

    let (initiator, mut source_events) =
        SyncOrchestrator::new(source_config, source_link, LocalFileSystem::new());
    let (responder, mut target_events) =
        SyncOrchestrator::new(target_config, target_link, LocalFileSystem::new());
    let listeners = [
        listen(&initiator, source_inbound),
        listen(&responder, target_inbound),
    ];

    initiator
        .connect_peer(Peer::new(target_id, target.display().to_string()))
        .await;
    initiator
        .start_sync(source, two_way)
        .await
        .with_context(|| format!("Could not start syncing {}", source.display()))?;

    println!(
        "Syncing {} {} {}",
        source.display(),
        if two_way { "<->" } else { "->" },
        target.display()
    );
    let status = follow(&initiator, &mut source_events).await;

    let target_status = tokio::time::timeout(SETTLE_TIMEOUT, terminal(&mut target_events))
        .await
        .ok()
        .flatten();
    for listener in listeners {
        listener.abort();
    }

    let snapshot = initiator
        .snapshot()
        .await
        .context("Session vanished before finishing")?;
    println!();
    println!(
        "{}: {}/{} files, {} failed, {} bytes",
        status,
        snapshot.progress.processed_files,
        snapshot.progress.total_files,
        snapshot.progress.failed_files,
        snapshot.progress.transferred_bytes
    );

    if status != SyncStatus::Completed {
        anyhow::bail!("Sync {}", status);
    }
    if target_status != Some(SyncStatus::Completed) {
        anyhow::bail!("Target did not finish cleanly ({:?})", target_status);
    }
    Ok(snapshot)
}

fn listen(
    orchestrator: &Orchestrator,
    inbound: mpsc::UnboundedReceiver<sync_client::Inbound>,
) -> tokio::task::JoinHandle<()> {
    let orchestrator = orchestrator.clone();
    tokio::spawn(async move { orchestrator.run(inbound).await })
}

/// Print the source side's events until its session ends. Ctrl+C cancels.
async fn follow(
    initiator: &Orchestrator,
    events: &mut mpsc::UnboundedReceiver<SyncEvent>,
) -> SyncStatus {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                println!();
                println!("Cancelling...");
                if let Err(e) = initiator.cancel().await {
                    tracing::warn!("Cancel failed: {}", e);
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    return initiator.status().await;
                };
                if let Some(status) = report(&event) {
                    return status;
                }
            }
        }
    }
}

/// Print one event; returns the status once it is terminal.
fn report(event: &SyncEvent) -> Option<SyncStatus> {
    match event {
        SyncEvent::StatusChanged { status, .. } => {
            tracing::debug!("Status: {}", status);
            if status.is_terminal() {
                return Some(*status);
            }
        }
        SyncEvent::FileCompleted {
            path,
            direction,
            success,
            ..
        } => {
            let arrow = match direction {
                Direction::Outgoing => "->",
                Direction::Incoming => "<-",
            };
            let mark = if *success { "" } else { "  FAILED" };
            println!("  {} {}{}", arrow, path, mark);
        }
        SyncEvent::Conflict { conflict, .. } => match conflict.winner() {
            Some(winner) => println!("  conflict {}: keeping {:?}", conflict.relative_path, winner),
            None => println!("  conflict {}: unresolved", conflict.relative_path),
        },
        SyncEvent::Warning { message, .. } => println!("  warning: {}", message),
        SyncEvent::Error { error, .. } => println!("  error: {}", error),
        _ => {}
    }
    None
}

async fn terminal(events: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Option<SyncStatus> {
    while let Some(event) = events.recv().await {
        if let SyncEvent::StatusChanged { status, .. } = event {
            if status.is_terminal() {
                return Some(status);
            }
        }
    }
    None
}
