// ABOUTME: Poll command: run the background worker until Ctrl-C, or a single cycle
// ABOUTME: Ctrl-C clears the enabled flag; the in-flight step finishes first

use crate::config::AppConfig;
use crate::device::Bridge;
use crate::error::{ReplicatorError, Result};
use crate::poller::{Poller, PollerConfig};

pub async fn poll(config: &AppConfig, once: bool, no_replicate: bool) -> Result<()> {
    let bridge = Bridge::from_config(&config.device)?;
    let mut poller_config = PollerConfig::from_app(config);
    if no_replicate {
        poller_config.replicate = false;
    } else if !poller_config.replicate {
        tracing::warn!("No [destination] configured; polling will only fetch");
    }

    let mut poller = Poller::new(bridge, poller_config).await?;

    if once {
        let stats = poller.run_cycle().await;
        if !stats.changed && stats.is_success() {
            println!("Device database unchanged");
        }
        if let Some(snapshot) = &stats.snapshot {
            println!(
                "Fetched {} (sha256 {})",
                snapshot.path.display(),
                snapshot.sha256
            );
        }
        if let Some(report) = &stats.replication {
            println!(
                "Replicated {} rows, {}/{} tables succeeded",
                report.rows_replicated(),
                report.tables_succeeded(),
                report.tables.len()
            );
        }
        return match stats.into_error() {
            Some(e) => Err(e),
            None => Ok(()),
        };
    }

    let status = poller.status();
    let worker = tokio::spawn(poller.run());

    let stopper = {
        let status = status.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, stopping after the current step");
                status.stop();
            }
        })
    };

    let cycles = worker
        .await
        .map_err(|e| ReplicatorError::Other(anyhow::anyhow!("poller task failed: {e}")))?;
    stopper.abort();

    println!(
        "Stopped after {} cycle(s); last cycle {}",
        cycles,
        if status.last_cycle_ok() { "succeeded" } else { "failed" }
    );
    Ok(())
}
