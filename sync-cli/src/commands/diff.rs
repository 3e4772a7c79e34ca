//! Preview what a sync between two folders would transfer.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::{catalog, CatalogError, LocalFileSystem};
use sync_core::{plan, FileCatalog, Flow, SyncPlan};

/// Compute the plan `source` would follow against `target`.
pub async fn preview(
    source: &Path,
    target: &Path,
    two_way: bool,
    hash_contents: bool,
) -> Result<SyncPlan> {
    let fs = LocalFileSystem::new();
    let local = catalog::build(&fs, source, hash_contents)
        .await
        .with_context(|| format!("Failed to scan {}", source.display()))?;
    let remote = match catalog::build(&fs, target, hash_contents).await {
        Ok(remote) => remote,
        Err(CatalogError::NotFound(_)) => FileCatalog::new(target),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to scan {}", target.display()))
        }
    };

    let flow = if two_way { Flow::Both } else { Flow::Send };
    let mut preview = plan(&local, &remote, flow);
    if !two_way {
        // A one-way target also learns what the source no longer has.
        preview.deleted_in_source = plan(&remote, &local, Flow::Receive).deleted_in_source;
    }
    Ok(preview)
}

/// Run the diff command.
pub async fn run(
    source: &Path,
    target: &Path,
    two_way: bool,
    hash_contents: bool,
    json: bool,
) -> Result<()> {
    let preview = preview(source, target, two_way, hash_contents).await?;

    if json {
        let conflicts: Vec<&str> = preview
            .conflicts
            .iter()
            .map(|c| c.relative_path.as_str())
            .collect();
        let out = serde_json::json!({
            "send": preview.outgoing,
            "receive": preview.incoming,
            "conflicts": conflicts,
            "deletedInSource": preview.deleted_in_source,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("=== {} -> {} ===", source.display(), target.display());
    print_section("Send", preview.outgoing.iter().map(String::as_str));
    if two_way {
        print_section("Receive", preview.incoming.iter().map(String::as_str));
        print_section(
            "Conflicts",
            preview.conflicts.iter().map(|c| c.relative_path.as_str()),
        );
    } else {
        print_section(
            "Only in target",
            preview.deleted_in_source.iter().map(String::as_str),
        );
    }
    if preview.is_empty() {
        println!();
        println!("Folders are in sync.");
    }

    Ok(())
}

fn print_section<'a>(title: &str, paths: impl Iterator<Item = &'a str>) {
    let paths: Vec<&str> = paths.collect();
    if paths.is_empty() {
        return;
    }
    println!();
    println!("{} ({}):", title, paths.len());
    for path in paths {
        println!("  {}", path);
    }
}
