// ABOUTME: Device side of replication: file bridge, change probe, snapshot fetch
// ABOUTME: The staging file is single-slot and replaced only by complete pulls

pub mod bridge;
pub mod detector;
pub mod fetcher;

pub use bridge::{AdbBridge, Bridge, DeviceBridge, FilesystemBridge};
pub use detector::{ChangeCheck, ChangeDetector};
pub use fetcher::SnapshotFetcher;

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque freshness value reported by the device. Only ever compared for
/// inequality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeMarker(String);

impl ChangeMarker {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A complete copy of the device database at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub retrieved_at: DateTime<Utc>,
    /// Hex SHA-256 of the file contents
    pub sha256: String,
}

impl Snapshot {
    /// Describe an existing file as a snapshot, hashing its contents.
    pub fn from_file(path: impl AsRef<Path>, retrieved_at: DateTime<Utc>) -> std::io::Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            path: path.to_path_buf(),
            retrieved_at,
            sha256: file_sha256(path)?,
        })
    }
}

/// Hex SHA-256 of a file, streamed.
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
