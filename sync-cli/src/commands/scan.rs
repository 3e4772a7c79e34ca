//! List a folder the way a sync session would catalog it.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::{catalog, LocalFileSystem};

/// Run the scan command.
pub async fn run(folder: &Path, hash_contents: bool, json: bool) -> Result<()> {
    let catalog = catalog::build(&LocalFileSystem::new(), folder, hash_contents)
        .await
        .with_context(|| format!("Failed to scan {}", folder.display()))?;

    if json {
        let out = serde_json::to_string_pretty(catalog.records())?;
        println!("{}", out);
        return Ok(());
    }

    println!("=== {} ===", folder.display());
    for record in catalog.iter() {
        let hash = record.hash().map(|h| &h[..12.min(h.len())]).unwrap_or("-");
        println!(
            "  {:>10}  {:<12}  {:<24}  {}",
            record.size_bytes, hash, record.content_type, record.relative_path
        );
    }
    println!();
    println!(
        "{} files, {} bytes",
        catalog.len(),
        catalog.total_bytes()
    );
    if catalog.skipped() > 0 {
        println!("{} entries could not be read", catalog.skipped());
    }

    Ok(())
}
