// ABOUTME: One-shot device commands: probe the marker, fetch into staging, push back
// ABOUTME: A manual fetch adopts the probed marker so the poller won't refetch it

use crate::config::AppConfig;
use crate::device::{Bridge, ChangeCheck, ChangeDetector, SnapshotFetcher};
use crate::error::Result;
use crate::state::PollState;

/// Report the device's current change marker and whether it differs from
/// the last adopted one.
pub async fn probe(config: &AppConfig) -> Result<()> {
    let bridge = Bridge::from_config(&config.device)?;
    let state = PollState::load_or_default(&config.state_path).await?;
    let detector = ChangeDetector::new(&bridge, config.device.remote_path.as_str());

    match detector.has_changed(state.last_marker.as_ref()).await {
        ChangeCheck::Changed(marker) => {
            println!("Device database changed (marker {})", marker);
        }
        ChangeCheck::Unchanged(marker) => {
            println!("Device database unchanged (marker {})", marker);
        }
        ChangeCheck::ProbeFailed(e) => return Err(e),
    }
    Ok(())
}

/// Fetch the device database into staging, optionally archiving the copy.
pub async fn fetch(config: &AppConfig, archive_note: Option<String>) -> Result<()> {
    let bridge = Bridge::from_config(&config.device)?;
    let mut state = PollState::load_or_default(&config.state_path).await?;

    let detector = ChangeDetector::new(&bridge, config.device.remote_path.as_str());
    let marker = match detector.has_changed(state.last_marker.as_ref()).await {
        ChangeCheck::ProbeFailed(e) => return Err(e),
        check => check.marker().cloned(),
    };

    let fetcher = SnapshotFetcher::new(
        &bridge,
        config.device.remote_path.as_str(),
        config.device.staging_path.clone(),
    );
    let snapshot = fetcher.fetch().await?;
    println!(
        "Fetched {} into {} (sha256 {})",
        config.device.remote_path,
        snapshot.path.display(),
        snapshot.sha256
    );

    if let Some(marker) = marker {
        state.record_fetch(marker, &snapshot);
        state.save(&config.state_path).await?;
    }

    if let Some(note) = archive_note {
        let catalog = super::open_catalog(config)?;
        let note = if note.is_empty() { None } else { Some(note) };
        let entry = catalog.archive(&snapshot.path, note.as_deref())?;
        println!("Archived as backup #{} ({})", entry.id, entry.filename);
    }
    Ok(())
}

/// Send the staging database back to the device.
pub async fn push(config: &AppConfig) -> Result<()> {
    let bridge = Bridge::from_config(&config.device)?;
    let fetcher = SnapshotFetcher::new(
        &bridge,
        config.device.remote_path.as_str(),
        config.device.staging_path.clone(),
    );
    fetcher.push().await?;
    println!(
        "Pushed {} to {}",
        config.device.staging_path.display(),
        config.device.remote_path
    );
    Ok(())
}
