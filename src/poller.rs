// ABOUTME: Background polling worker: probe, fetch on change, optionally replicate, sleep
// ABOUTME: Shares only atomic status flags with the front end; stopping is cooperative

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::config::{AppConfig, DestinationConfig};
use crate::device::{ChangeCheck, ChangeDetector, DeviceBridge, Snapshot, SnapshotFetcher};
use crate::error::{ReplicatorError, Result};
use crate::replicate::{ReplicationEngine, ReplicationReport, TableMapping};
use crate::state::PollState;

/// Poller configuration, taken from [`AppConfig`] at startup.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub remote_path: String,
    pub staging_path: PathBuf,
    pub state_path: PathBuf,
    pub tables: Vec<TableMapping>,
    /// Replicate into the destination after each successful fetch
    pub replicate: bool,
    pub destination: DestinationConfig,
}

impl PollerConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            remote_path: config.device.remote_path.clone(),
            staging_path: config.device.staging_path.clone(),
            state_path: config.state_path.clone(),
            tables: config.tables.clone(),
            replicate: config.destination.is_configured(),
            destination: config.destination.clone(),
        }
    }
}

/// Flags observed by the front end while the worker runs.
#[derive(Debug)]
pub struct PollerStatus {
    enabled: AtomicBool,
    busy: AtomicBool,
    cycles: AtomicU64,
    last_cycle_ok: AtomicBool,
    wake: Notify,
}

impl Default for PollerStatus {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            last_cycle_ok: AtomicBool::new(true),
            wake: Notify::new(),
        }
    }
}

impl PollerStatus {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Ask the worker to stop. An in-flight probe, fetch or replication
    /// finishes (or times out) first; a pending sleep ends immediately.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn last_cycle_ok(&self) -> bool {
        self.last_cycle_ok.load(Ordering::SeqCst)
    }
}

/// What one iteration did.
#[derive(Debug, Default)]
pub struct CycleStats {
    pub changed: bool,
    pub snapshot: Option<Snapshot>,
    pub replication: Option<ReplicationReport>,
    /// Probe, fetch, connect or state failure that ended the cycle early
    pub failure: Option<(&'static str, ReplicatorError)>,
    pub duration_ms: u64,
}

impl CycleStats {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
            && self
                .replication
                .as_ref()
                .map_or(true, ReplicationReport::is_success)
    }

    /// One line per failure, each naming the step and its outcome class.
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some((step, e)) = &self.failure {
            errors.push(format!("{} ({}): {:#}", step, e.outcome().as_str(), e));
        }
        if let Some(report) = &self.replication {
            for (table, e) in report.failures() {
                errors.push(format!(
                    "replicate {} ({}): {:#}",
                    table,
                    e.outcome().as_str(),
                    e
                ));
            }
        }
        errors
    }

    /// The first error of the cycle, if any.
    pub fn into_error(self) -> Option<ReplicatorError> {
        if let Some((_, e)) = self.failure {
            return Some(e);
        }
        self.replication?
            .tables
            .into_iter()
            .find_map(|t| t.result.err())
    }
}

pub struct Poller<B: DeviceBridge> {
    bridge: B,
    config: PollerConfig,
    state: PollState,
    status: Arc<PollerStatus>,
}

impl<B: DeviceBridge> Poller<B> {
    /// Create a poller, resuming from persisted state when present.
    pub async fn new(bridge: B, config: PollerConfig) -> Result<Self> {
        let state = PollState::load_or_default(&config.state_path).await?;
        if let Some(marker) = &state.last_marker {
            tracing::info!("Resuming from adopted marker {}", marker);
        }
        Ok(Self {
            bridge,
            config,
            state,
            status: Arc::new(PollerStatus::default()),
        })
    }

    pub fn status(&self) -> Arc<PollerStatus> {
        Arc::clone(&self.status)
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// One iteration: probe, then fetch and replicate when the device
    /// reports a change.
    ///
    /// The new marker is adopted as soon as the fetch succeeds, so one device
    /// change is fetched once. A replication that fails leaves the snapshot
    /// marked pending and later cycles replicate it from staging without
    /// fetching again.
    pub async fn run_cycle(&mut self) -> CycleStats {
        let start = Instant::now();
        let mut stats = CycleStats::default();

        if !self.status.is_enabled() {
            return stats;
        }

        let detector = ChangeDetector::new(&self.bridge, self.config.remote_path.as_str());
        let marker = match detector.has_changed(self.state.last_marker.as_ref()).await {
            ChangeCheck::Changed(marker) => marker,
            ChangeCheck::Unchanged(_) => {
                self.retry_pending(&mut stats).await;
                stats.duration_ms = start.elapsed().as_millis() as u64;
                return stats;
            }
            ChangeCheck::ProbeFailed(e) => {
                stats.failure = Some(("probe", e));
                stats.duration_ms = start.elapsed().as_millis() as u64;
                return stats;
            }
        };
        stats.changed = true;

        if !self.status.is_enabled() {
            return stats;
        }

        let fetcher = SnapshotFetcher::new(
            &self.bridge,
            self.config.remote_path.as_str(),
            self.config.staging_path.clone(),
        );
        let snapshot = match fetcher.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Keeping previous marker so the next cycle refetches");
                stats.failure = Some(("fetch", e));
                stats.duration_ms = start.elapsed().as_millis() as u64;
                return stats;
            }
        };

        self.state.record_fetch(marker, &snapshot);
        if self.config.replicate {
            self.state.mark_replication_pending(&snapshot.sha256);
        }
        if let Err(e) = self.save_state().await {
            stats.failure = Some(("save poll state", e));
            stats.snapshot = Some(snapshot);
            stats.duration_ms = start.elapsed().as_millis() as u64;
            return stats;
        }

        if self.config.replicate && self.status.is_enabled() {
            self.replicate_and_record(&snapshot, &mut stats).await;
        }

        stats.snapshot = Some(snapshot);
        stats.duration_ms = start.elapsed().as_millis() as u64;
        stats
    }

    /// Replicate the staging copy left pending by an earlier cycle.
    async fn retry_pending(&mut self, stats: &mut CycleStats) {
        if !self.config.replicate || !self.status.is_enabled() {
            return;
        }
        let Some(sha256) = self.state.replication_pending.clone() else {
            return;
        };
        if !self.config.staging_path.is_file() {
            tracing::warn!(
                "Staging copy {} is gone; dropping pending replication",
                self.config.staging_path.display()
            );
            self.state.replication_pending = None;
            if let Err(e) = self.save_state().await {
                stats.failure = Some(("save poll state", e));
            }
            return;
        }

        tracing::info!("Retrying replication of unchanged staging copy");
        let snapshot = Snapshot {
            path: self.config.staging_path.clone(),
            retrieved_at: self.state.last_fetch_at.unwrap_or_else(chrono::Utc::now),
            sha256,
        };
        self.replicate_and_record(&snapshot, stats).await;
    }

    async fn replicate_and_record(&mut self, snapshot: &Snapshot, stats: &mut CycleStats) {
        match self.replicate(snapshot).await {
            Ok(report) => stats.replication = Some(report),
            Err(e) => stats.failure = Some(("replicate", e)),
        }

        if stats.is_success() {
            self.state.record_replication();
            if let Err(e) = self.save_state().await {
                stats.failure = Some(("save poll state", e));
            }
        } else {
            tracing::warn!("Replication still pending; the next cycle retries from staging");
        }
    }

    async fn save_state(&self) -> Result<()> {
        self.state.save(&self.config.state_path).await.map_err(|e| {
            tracing::error!("Failed to save poll state: {:?}", e);
            e.into()
        })
    }

    async fn replicate(&self, snapshot: &Snapshot) -> Result<ReplicationReport> {
        let mut engine =
            ReplicationEngine::connect(&self.config.destination, snapshot.path.clone()).await?;
        let report = engine.replicate_all(&self.config.tables).await;
        tracing::info!(
            "Replicated {} rows across {}/{} tables in {}ms",
            report.rows_replicated(),
            report.tables_succeeded(),
            report.tables.len(),
            report.duration_ms
        );
        Ok(report)
    }

    /// Loop until stopped. Returns the number of completed cycles.
    pub async fn run(mut self) -> u64 {
        let status = self.status();
        tracing::info!(
            "Polling {} every {:?}",
            self.config.remote_path,
            self.config.interval
        );

        while status.is_enabled() {
            status.busy.store(true, Ordering::SeqCst);
            let stats = self.run_cycle().await;
            status.busy.store(false, Ordering::SeqCst);
            status.last_cycle_ok.store(stats.is_success(), Ordering::SeqCst);
            let cycles = status.cycles.fetch_add(1, Ordering::SeqCst) + 1;

            if stats.is_success() {
                tracing::debug!("Cycle {} finished in {}ms", cycles, stats.duration_ms);
            } else {
                for error in stats.errors() {
                    tracing::error!("Cycle {}: {}", cycles, error);
                }
            }

            if !status.is_enabled() {
                break;
            }

            tokio::select! {
                biased;
                _ = status.wake.notified() => {}
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        tracing::info!("Poller stopped after {} cycles", status.cycles());
        status.cycles()
    }
}
