//! Write a starter configuration file.

use anyhow::Result;
use std::path::Path;

use crate::config;

/// Run the init command.
pub async fn run(path: &Path, force: bool) -> Result<()> {
    config::write_template(path, force).await?;

    println!("Configuration written to {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set [device] name and [receive] dir");
    println!("  2. Preview a sync: pairsync diff <source> <target>");

    Ok(())
}
