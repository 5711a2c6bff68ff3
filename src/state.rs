// ABOUTME: PollState - what the poller last adopted from the device
// ABOUTME: Persisted as JSON so restarts don't refetch an unchanged database

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::device::{ChangeMarker, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollState {
    /// Marker of the last snapshot that was fetched completely
    pub last_marker: Option<ChangeMarker>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// SHA-256 of the last fetched snapshot
    pub last_sha256: Option<String>,
    pub last_replicated_at: Option<DateTime<Utc>>,
    /// SHA-256 of a fetched snapshot whose replication has not succeeded yet
    #[serde(default)]
    pub replication_pending: Option<String>,
    /// Version of the state format for future migrations
    pub version: u32,
    pub updated_at: DateTime<Utc>,
}

impl Default for PollState {
    fn default() -> Self {
        Self {
            last_marker: None,
            last_fetch_at: None,
            last_sha256: None,
            last_replicated_at: None,
            replication_pending: None,
            version: 1,
            updated_at: Utc::now(),
        }
    }
}

impl PollState {
    /// Adopt a marker only once its snapshot is fully in place.
    pub fn record_fetch(&mut self, marker: ChangeMarker, snapshot: &Snapshot) {
        if let Some(previous) = &self.last_sha256 {
            if previous == &snapshot.sha256 {
                tracing::info!(
                    "Fetched snapshot content is unchanged ({})",
                    previous.get(..12).unwrap_or(previous)
                );
            }
        }
        self.last_marker = Some(marker);
        self.last_fetch_at = Some(snapshot.retrieved_at);
        self.last_sha256 = Some(snapshot.sha256.clone());
        self.updated_at = Utc::now();
    }

    /// Note that the staging copy `sha256` still has to reach the destination.
    pub fn mark_replication_pending(&mut self, sha256: &str) {
        self.replication_pending = Some(sha256.to_string());
        self.updated_at = Utc::now();
    }

    pub fn record_replication(&mut self) {
        let now = Utc::now();
        self.last_replicated_at = Some(now);
        self.replication_pending = None;
        self.updated_at = now;
    }

    /// Load state, or start fresh when the file doesn't exist yet.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            tracing::debug!("No poll state at {}, starting fresh", path.display());
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read poll state from {:?}", path))?;
        let state: PollState = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse poll state from {:?}", path))?;
        Ok(state)
    }

    /// Write to a sibling temp file and rename over `path`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize poll state")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write poll state to {:?}", tmp))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to move poll state into {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(sha: &str) -> Snapshot {
        Snapshot {
            path: "temp.db".into(),
            retrieved_at: Utc::now(),
            sha256: sha.to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = PollState::load_or_default(&dir.path().join("none.json"))
            .await
            .unwrap();
        assert!(state.last_marker.is_none());
        assert_eq!(state.version, 1);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("poll-state.json");

        let mut state = PollState::default();
        state.record_fetch(ChangeMarker::new("1700000000"), &snapshot(&"ab".repeat(32)));
        state.save(&path).await.unwrap();

        let loaded = PollState::load(&path).await.unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.last_marker.unwrap().as_str(), "1700000000");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poll-state.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(PollState::load_or_default(&path).await.is_err());
    }

    #[test]
    fn test_replication_pending_cleared_by_replication() {
        let mut state = PollState::default();
        state.record_fetch(ChangeMarker::new("7"), &snapshot(&"cd".repeat(32)));
        state.mark_replication_pending(&"cd".repeat(32));
        assert_eq!(state.replication_pending.as_deref(), Some("cd".repeat(32).as_str()));

        state.record_replication();
        assert!(state.replication_pending.is_none());
        assert!(state.last_replicated_at.is_some());
    }

    #[test]
    fn test_state_without_pending_field_still_loads() {
        let json = r#"{
            "last_marker": "42",
            "last_fetch_at": null,
            "last_sha256": null,
            "last_replicated_at": null,
            "version": 1,
            "updated_at": "2026-01-01T00:00:00Z"
        }"#;
        let state: PollState = serde_json::from_str(json).unwrap();
        assert!(state.replication_pending.is_none());
        assert_eq!(state.last_marker.unwrap().as_str(), "42");
    }

    #[test]
    fn test_marker_serializes_as_plain_string() {
        let mut state = PollState::default();
        state.record_fetch(ChangeMarker::new("42"), &snapshot(&"00".repeat(32)));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["last_marker"], "42");
    }
}
