//! Configuration file handling for the pairsync CLI.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use sync_client::SyncConfig;

/// File name of the configuration inside the config directory.
pub const CONFIG_FILE: &str = "pairsync.toml";

/// Starting point written by `pairsync init`.
pub const TEMPLATE: &str = r#"# pairsync configuration. Every key is optional.

[device]
name = "pairsync device"

[sync]
two_way = false
hash_contents = true
mirror_deletions = false
# keep_local | keep_remote | keep_newest | unresolved
conflict_strategy = "keep_newest"

[receive]
dir = "pairsync-inbox"
auto_accept = true

[transport]
send_timeout_secs = 30
"#;

/// Default location of the configuration file.
pub fn default_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "pairsync", "pairsync")
        .context("Could not determine home directory")?;
    Ok(dirs.config_dir().join(CONFIG_FILE))
}

/// Load the configuration.
///
/// An explicit path must exist. Without one, the default location is used
/// when present and built-in defaults otherwise.
pub fn load(explicit: Option<&Path>) -> Result<SyncConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_path() {
            Ok(path) if path.exists() => path,
            _ => {
                tracing::debug!("No config file, using defaults");
                return Ok(SyncConfig::default());
            }
        },
    };

    tracing::debug!("Loading config from {}", path.display());
    SyncConfig::from_file(&path).with_context(|| format!("Invalid config {}", path.display()))
}

/// Write [`TEMPLATE`] to `path`, creating parent directories.
pub async fn write_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists. Pass --force to overwrite it.",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create config directory")?;
    }
    tokio::fs::write(path, TEMPLATE)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
