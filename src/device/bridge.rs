// ABOUTME: Device file transfer channel: pull, push, and modification-marker probe
// ABOUTME: adb-backed bridge with bounded commands, plus a mounted-filesystem bridge

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, UNIX_EPOCH};

use tokio::process::Command;
use tokio::time::timeout;

use super::ChangeMarker;
use crate::config::{DeviceConfig, TransportKind};
use crate::error::{ReplicatorError, Result};
use crate::utils::shell_quote;

/// Black-box channel to the device holding the source database.
///
/// Every operation is bounded in time; success is decided solely by the
/// underlying command's exit status.
pub trait DeviceBridge: Send + Sync {
    /// Copy `remote` on the device to `local`.
    fn pull(&self, remote: &str, local: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Copy `local` to `remote` on the device.
    fn push(&self, local: &Path, remote: &str) -> impl Future<Output = Result<()>> + Send;

    /// Cheap freshness probe for `remote`; never transfers the file.
    fn modification_marker(
        &self,
        remote: &str,
    ) -> impl Future<Output = Result<ChangeMarker>> + Send;
}

/// Talks to an Android device through the `adb` executable.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb: PathBuf,
    serial: Option<String>,
    timeout: Duration,
}

impl AdbBridge {
    pub fn new(adb: impl Into<PathBuf>, serial: Option<String>, timeout: Duration) -> Self {
        Self {
            adb: adb.into(),
            serial,
            timeout,
        }
    }

    /// Resolve `adb_path` through `PATH` and build a bridge from config.
    pub fn locate(config: &DeviceConfig) -> Result<Self> {
        let adb = which::which(&config.adb_path).map_err(|e| {
            ReplicatorError::Config(format!(
                "adb executable '{}' not found: {}",
                config.adb_path, e
            ))
        })?;
        tracing::debug!("Using adb at {}", adb.display());
        Ok(Self::new(adb, config.serial.clone(), config.command_timeout()))
    }

    async fn run(&self, operation: &str, args: &[String]) -> Result<String> {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("Executing: {} {}", self.adb.display(), args.join(" "));

        let output = match timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(ReplicatorError::Timeout {
                    operation: operation.to_string(),
                    timeout: self.timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(ReplicatorError::transport(
                    operation,
                    format!("could not run {}: {}", self.adb.display(), e),
                ))
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReplicatorError::transport(
                operation,
                format!(
                    "exit code {}: {}",
                    output
                        .status
                        .code()
                        .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    stderr.trim()
                ),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DeviceBridge for AdbBridge {
    async fn pull(&self, remote: &str, local: &Path) -> Result<()> {
        let args = vec![
            "pull".to_string(),
            remote.to_string(),
            local.display().to_string(),
        ];
        self.run("adb pull", &args).await.map(|_| ())
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<()> {
        let args = vec![
            "push".to_string(),
            local.display().to_string(),
            remote.to_string(),
        ];
        self.run("adb push", &args).await.map(|_| ())
    }

    async fn modification_marker(&self, remote: &str) -> Result<ChangeMarker> {
        // adb joins shell arguments into one command line, so quote the path.
        let args = vec![
            "shell".to_string(),
            format!("stat -c %Y {}", shell_quote(remote)),
        ];
        let stdout = self.run("adb stat", &args).await?;
        let marker = stdout.trim();
        if marker.is_empty() {
            return Err(ReplicatorError::transport(
                "adb stat",
                "device returned an empty modification time",
            ));
        }
        Ok(ChangeMarker::new(marker))
    }
}

/// Treats a locally mounted directory (MTP/SSHFS mount, shared folder) as the
/// device. The marker combines modification time and size.
#[derive(Debug, Clone)]
pub struct FilesystemBridge {
    timeout: Duration,
}

impl FilesystemBridge {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn copy(&self, operation: &str, from: &Path, to: &Path) -> Result<()> {
        match timeout(self.timeout, tokio::fs::copy(from, to)).await {
            Err(_) => Err(ReplicatorError::Timeout {
                operation: operation.to_string(),
                timeout: self.timeout,
            }),
            Ok(Err(e)) => Err(ReplicatorError::transport(
                operation,
                format!("{} -> {}: {}", from.display(), to.display(), e),
            )),
            Ok(Ok(_)) => Ok(()),
        }
    }
}

impl DeviceBridge for FilesystemBridge {
    async fn pull(&self, remote: &str, local: &Path) -> Result<()> {
        self.copy("copy from device", Path::new(remote), local).await
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<()> {
        self.copy("copy to device", local, Path::new(remote)).await
    }

    async fn modification_marker(&self, remote: &str) -> Result<ChangeMarker> {
        let metadata = match timeout(self.timeout, tokio::fs::metadata(remote)).await {
            Err(_) => {
                return Err(ReplicatorError::Timeout {
                    operation: "stat".to_string(),
                    timeout: self.timeout,
                })
            }
            Ok(Err(e)) => return Err(ReplicatorError::transport("stat", format!("{remote}: {e}"))),
            Ok(Ok(metadata)) => metadata,
        };
        let modified = metadata
            .modified()
            .map_err(|e| ReplicatorError::transport("stat", e.to_string()))?;
        let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
        Ok(ChangeMarker::new(format!(
            "{}.{:09}-{}",
            since_epoch.as_secs(),
            since_epoch.subsec_nanos(),
            metadata.len()
        )))
    }
}

/// Bridge selected by `device.transport`.
#[derive(Debug, Clone)]
pub enum Bridge {
    Adb(AdbBridge),
    Filesystem(FilesystemBridge),
}

impl Bridge {
    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        match config.transport {
            TransportKind::Adb => Ok(Bridge::Adb(AdbBridge::locate(config)?)),
            TransportKind::Filesystem => Ok(Bridge::Filesystem(FilesystemBridge::new(
                config.command_timeout(),
            ))),
        }
    }
}

impl DeviceBridge for Bridge {
    async fn pull(&self, remote: &str, local: &Path) -> Result<()> {
        match self {
            Bridge::Adb(b) => b.pull(remote, local).await,
            Bridge::Filesystem(b) => b.pull(remote, local).await,
        }
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<()> {
        match self {
            Bridge::Adb(b) => b.push(local, remote).await,
            Bridge::Filesystem(b) => b.push(local, remote).await,
        }
    }

    async fn modification_marker(&self, remote: &str) -> Result<ChangeMarker> {
        match self {
            Bridge::Adb(b) => b.modification_marker(remote).await,
            Bridge::Filesystem(b) => b.modification_marker(remote).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filesystem_bridge_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("device.db");
        let local = dir.path().join("local.db");
        std::fs::write(&remote, b"payload").unwrap();

        let bridge = FilesystemBridge::new(Duration::from_secs(5));
        bridge
            .pull(remote.to_str().unwrap(), &local)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"payload");

        std::fs::write(&local, b"edited").unwrap();
        bridge.push(&local, remote.to_str().unwrap()).await.unwrap();
        assert_eq!(std::fs::read(&remote).unwrap(), b"edited");
    }

    #[tokio::test]
    async fn test_filesystem_marker_tracks_modification() {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("device.db");
        std::fs::write(&remote, b"v1").unwrap();
        let bridge = FilesystemBridge::new(Duration::from_secs(5));
        let path = remote.to_str().unwrap();

        let first = bridge.modification_marker(path).await.unwrap();
        let again = bridge.modification_marker(path).await.unwrap();
        assert_eq!(first, again);

        let file = std::fs::OpenOptions::new().write(true).open(&remote).unwrap();
        file.set_modified(UNIX_EPOCH + Duration::from_secs(1_000))
            .unwrap();
        let changed = bridge.modification_marker(path).await.unwrap();
        assert_ne!(first, changed);
    }

    #[tokio::test]
    async fn test_filesystem_missing_remote_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = FilesystemBridge::new(Duration::from_secs(5));
        let missing = dir.path().join("nope.db");
        let err = bridge
            .modification_marker(missing.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_adb_bridge_reports_nonzero_exit() {
        // `false` ignores its arguments and exits 1, standing in for adb.
        let bridge = AdbBridge::new("false", None, Duration::from_secs(5));
        let err = bridge.modification_marker("/sdcard/x.db").await.unwrap_err();
        assert!(matches!(err, ReplicatorError::Transport { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_adb_bridge_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-adb");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&script).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script, perms).unwrap();
        }

        let bridge = AdbBridge::new(&script, None, Duration::from_millis(200));
        let err = bridge.modification_marker("/sdcard/x.db").await.unwrap_err();
        assert!(matches!(err, ReplicatorError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_adb_bridge_reads_marker_from_stdout() {
        let bridge = AdbBridge::new("echo", None, Duration::from_secs(5));
        // `echo shell stat -c %Y '/x'` prints its arguments back.
        let marker = bridge.modification_marker("/x").await.unwrap();
        assert!(marker.as_str().starts_with("shell stat -c %Y"));
    }
}
