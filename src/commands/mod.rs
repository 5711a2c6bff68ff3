// ABOUTME: Command implementations behind each CLI subcommand
// ABOUTME: Exports device, replicate, poll, backup, compare and config commands

pub mod backup;
pub mod compare;
pub mod config;
pub mod device;
pub mod poll;
pub mod replicate;

pub use compare::compare;
pub use device::{fetch, probe, push};
pub use poll::poll;
pub use replicate::replicate;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::catalog::BackupCatalog;
use crate::config::AppConfig;
use crate::error::{ReplicatorError, Result};

/// Where a command reads a snapshot from.
///
/// Parsed from `staging`, `backup:<id>`, or any other text as a file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    Staging,
    Backup(i64),
    File(PathBuf),
}

impl FromStr for SnapshotSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("staging") {
            return Ok(SnapshotSource::Staging);
        }
        if let Some(id) = s.strip_prefix("backup:") {
            return id
                .parse()
                .map(SnapshotSource::Backup)
                .map_err(|_| format!("'{}' is not a backup id", id));
        }
        if s.is_empty() {
            return Err("snapshot path is empty".to_string());
        }
        Ok(SnapshotSource::File(PathBuf::from(s)))
    }
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotSource::Staging => f.write_str("staging"),
            SnapshotSource::Backup(id) => write!(f, "backup:{}", id),
            SnapshotSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl SnapshotSource {
    /// Resolve to a file that exists right now.
    pub fn resolve(&self, config: &AppConfig) -> Result<PathBuf> {
        let path = match self {
            SnapshotSource::Staging => config.device.staging_path.clone(),
            SnapshotSource::File(path) => path.clone(),
            SnapshotSource::Backup(id) => {
                let catalog = open_catalog(config)?;
                return Ok(catalog.open_entry(*id)?.path);
            }
        };
        if !path.is_file() {
            return Err(ReplicatorError::NotFound(format!(
                "snapshot {} ({})",
                self,
                path.display()
            )));
        }
        Ok(path)
    }
}

pub(crate) fn open_catalog(config: &AppConfig) -> Result<BackupCatalog> {
    BackupCatalog::open(&config.backups.directory, &config.backups.index_path)
}
