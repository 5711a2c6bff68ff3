// ABOUTME: One-shot replication of a snapshot's mapped tables into PostgreSQL
// ABOUTME: Each table commits on its own; the first table failure sets the exit status

use super::SnapshotSource;
use crate::config::AppConfig;
use crate::error::{ReplicatorError, Result};
use crate::replicate::ReplicationEngine;

/// Replicate `tables` (all mapped tables when empty) from `source`.
pub async fn replicate(config: &AppConfig, source: &SnapshotSource, tables: &[String]) -> Result<()> {
    let mappings = config.selected_tables(tables)?;
    if mappings.is_empty() {
        return Err(ReplicatorError::Config(
            "no [[tables]] mappings configured".to_string(),
        ));
    }
    let snapshot = source.resolve(config)?;
    tracing::info!(
        "Replicating {} table(s) from {} ({})",
        mappings.len(),
        source,
        snapshot.display()
    );

    let mut engine = ReplicationEngine::connect(&config.destination, snapshot).await?;
    let report = engine.replicate_all(&mappings).await;

    for table in &report.tables {
        match &table.result {
            Ok(rows) => println!("  {} -> {}: {} rows", table.source, table.target, rows),
            Err(e) => println!(
                "  {} -> {}: FAILED ({}) {}",
                table.source,
                table.target,
                e.outcome().as_str(),
                e
            ),
        }
    }
    println!(
        "Replicated {} rows, {}/{} tables succeeded in {}ms",
        report.rows_replicated(),
        report.tables_succeeded(),
        report.tables.len(),
        report.duration_ms
    );

    match report.tables.into_iter().find_map(|t| t.result.err()) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
