// ABOUTME: Pulls the device database into the single-slot staging file
// ABOUTME: A failed pull leaves staging absent, never stale or half-written

use std::path::{Path, PathBuf};

use chrono::Utc;

use super::{DeviceBridge, Snapshot};
use crate::error::{ReplicatorError, Result};

/// First 16 bytes of every SQLite 3 database file.
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

pub struct SnapshotFetcher<'a, B: DeviceBridge> {
    bridge: &'a B,
    remote_path: String,
    staging_path: PathBuf,
}

impl<'a, B: DeviceBridge> SnapshotFetcher<'a, B> {
    pub fn new(bridge: &'a B, remote_path: impl Into<String>, staging_path: impl Into<PathBuf>) -> Self {
        Self {
            bridge,
            remote_path: remote_path.into(),
            staging_path: staging_path.into(),
        }
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Sibling file the pull writes into before it is renamed into place.
    fn partial_path(&self) -> PathBuf {
        let mut name = self
            .staging_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "staging.db".into());
        name.push(".partial");
        self.staging_path.with_file_name(name)
    }

    /// Retrieve a full copy of the device database into staging.
    ///
    /// The existing staging copy is removed first. The pull lands in a
    /// `.partial` sibling and is renamed over the staging path only after
    /// it completed and looks like a SQLite database.
    pub async fn fetch(&self) -> Result<Snapshot> {
        if let Some(parent) = self.staging_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        remove_if_exists(&self.staging_path).await?;
        let partial = self.partial_path();
        remove_if_exists(&partial).await?;

        tracing::info!(
            "Fetching {} into {}",
            self.remote_path,
            self.staging_path.display()
        );

        let pulled = async {
            self.bridge.pull(&self.remote_path, &partial).await?;
            verify_sqlite_file(&partial).await?;
            tokio::fs::rename(&partial, &self.staging_path).await?;
            Ok::<_, ReplicatorError>(())
        }
        .await;

        if let Err(e) = pulled {
            if let Err(cleanup) = remove_if_exists(&partial).await {
                tracing::warn!(
                    "Failed to remove partial download {}: {}",
                    partial.display(),
                    cleanup
                );
            }
            tracing::error!("Fetch of {} failed: {}", self.remote_path, e);
            return Err(e);
        }

        let staging = self.staging_path.clone();
        let snapshot = tokio::task::spawn_blocking(move || Snapshot::from_file(staging, Utc::now()))
            .await
            .map_err(|e| anyhow::anyhow!("digest task failed: {e}"))??;

        tracing::info!(
            "Fetched snapshot {} (sha256 {})",
            snapshot.path.display(),
            snapshot.sha256
        );
        Ok(snapshot)
    }

    /// Send the staging copy back to the device.
    pub async fn push(&self) -> Result<()> {
        if !tokio::fs::try_exists(&self.staging_path).await? {
            return Err(ReplicatorError::NotFound(format!(
                "staging database {}",
                self.staging_path.display()
            )));
        }
        tracing::info!(
            "Pushing {} to {}",
            self.staging_path.display(),
            self.remote_path
        );
        self.bridge.push(&self.staging_path, &self.remote_path).await
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn verify_sqlite_file(path: &Path) -> Result<()> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        ReplicatorError::transport("fetch", format!("pulled file missing: {e}"))
    })?;
    let mut header = [0u8; 16];
    let read = file.read(&mut header).await?;
    if read < header.len() || &header != SQLITE_HEADER {
        return Err(ReplicatorError::transport(
            "fetch",
            format!("{} is not a SQLite database", path.display()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::bridge::FilesystemBridge;
    use std::time::Duration;

    fn make_device_db(path: &Path, rows: &[(&str, &str)]) {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch("CREATE TABLE IF NOT EXISTS DWVVEH (dwvKey TEXT PRIMARY KEY, dwvModDes TEXT)")
            .unwrap();
        for (key, model) in rows {
            conn.execute(
                "INSERT OR REPLACE INTO DWVVEH VALUES (?1, ?2)",
                rusqlite::params![key, model],
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_fetch_is_byte_identical_without_remote_change() {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("device.db");
        let staging = dir.path().join("staging").join("temp.db");
        make_device_db(&remote, &[("V1", "Ford")]);

        let bridge = FilesystemBridge::new(Duration::from_secs(5));
        let fetcher = SnapshotFetcher::new(&bridge, remote.to_str().unwrap(), &staging);

        let first = fetcher.fetch().await.unwrap();
        let first_bytes = std::fs::read(&staging).unwrap();
        let second = fetcher.fetch().await.unwrap();
        let second_bytes = std::fs::read(&staging).unwrap();

        assert_eq!(first.sha256, second.sha256);
        assert_eq!(first_bytes, second_bytes);
        assert!(!fetcher.partial_path().exists());
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_staging_absent() {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("device.db");
        let staging = dir.path().join("temp.db");
        make_device_db(&remote, &[("V1", "Ford")]);

        let bridge = FilesystemBridge::new(Duration::from_secs(5));
        let fetcher = SnapshotFetcher::new(&bridge, remote.to_str().unwrap(), &staging);
        fetcher.fetch().await.unwrap();
        assert!(staging.exists());

        std::fs::remove_file(&remote).unwrap();
        let err = fetcher.fetch().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!staging.exists(), "stale staging copy must not survive");
        assert!(!fetcher.partial_path().exists());
    }

    #[tokio::test]
    async fn test_non_database_pull_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("device.db");
        let staging = dir.path().join("temp.db");
        std::fs::write(&remote, b"<html>device locked</html>").unwrap();

        let bridge = FilesystemBridge::new(Duration::from_secs(5));
        let fetcher = SnapshotFetcher::new(&bridge, remote.to_str().unwrap(), &staging);
        let err = fetcher.fetch().await.unwrap_err();
        assert!(err.to_string().contains("not a SQLite database"));
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_push_requires_staging() {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("device.db");
        let staging = dir.path().join("temp.db");
        let bridge = FilesystemBridge::new(Duration::from_secs(5));
        let fetcher = SnapshotFetcher::new(&bridge, remote.to_str().unwrap(), &staging);
        assert!(matches!(
            fetcher.push().await.unwrap_err(),
            ReplicatorError::NotFound(_)
        ));

        make_device_db(&staging, &[("V9", "Kia")]);
        fetcher.push().await.unwrap();
        assert_eq!(std::fs::read(&remote).unwrap(), std::fs::read(&staging).unwrap());
    }
}
