// ABOUTME: Compare command: diff two snapshots table by table
// ABOUTME: Either side may be staging, a catalog backup, or any database file

use super::SnapshotSource;
use crate::compare::IdentityColumn;
use crate::config::AppConfig;
use crate::error::{ReplicatorError, Result};

pub async fn compare(
    config: &AppConfig,
    first: &SnapshotSource,
    second: &SnapshotSource,
    tables: &[String],
    identity: Option<String>,
) -> Result<()> {
    let a = first.resolve(config)?;
    let b = second.resolve(config)?;
    let tables = if tables.is_empty() {
        config.compare.tables.clone()
    } else {
        tables.to_vec()
    };
    let identity = match identity {
        Some(column) => IdentityColumn::Named(column),
        None => config.compare.identity(),
    };

    let report = tokio::task::spawn_blocking(move || {
        crate::compare::compare(&a, &b, &tables, &identity)
    })
    .await
    .map_err(|e| ReplicatorError::Other(anyhow::anyhow!("comparison task failed: {e}")))??;

    print!("{}", report);
    Ok(())
}
