// ABOUTME: Replication engine: introspect, ensure/grow the mirror table, upsert all rows
// ABOUTME: One transaction per table; source values always win on key conflict

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::time::timeout;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use super::sql::{build_add_column, build_create_table, build_upsert, rows_per_statement};
use super::{ReplicationReport, TableMapping, TableReport};
use crate::config::DestinationConfig;
use crate::error::{ReplicatorError, Result};
use crate::sqlite::{RowRecord, SchemaIntrospector, TableSchema};
use crate::utils::validate_identifier;

/// A source table checked and shaped for the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTable {
    pub target: String,
    /// Destination column names, lower-cased, in source order
    pub columns: Vec<String>,
    pub primary_key: String,
    /// Rows with unique, non-null keys
    pub rows: Vec<RowRecord>,
}

/// Validate a source table against its mapping and shape it for upsert.
///
/// Fails fast on an invalid name, a key column missing from the schema, a
/// row whose width differs from the schema, or a NULL key. Duplicate keys
/// collapse to the last occurrence so one statement never touches a row
/// twice.
pub fn prepare_table(
    mapping: &TableMapping,
    schema: &TableSchema,
    rows: Vec<RowRecord>,
) -> Result<PreparedTable> {
    let target = mapping.target_table();
    validate_identifier(&target)?;
    validate_identifier(&mapping.primary_key)?;

    let mut columns = Vec::with_capacity(schema.len());
    for column in &schema.columns {
        validate_identifier(column)?;
        let lowered = column.to_ascii_lowercase();
        if columns.contains(&lowered) {
            return Err(ReplicatorError::InvalidIdentifier(format!(
                "table '{}' has columns that differ only by case ('{}')",
                schema.table, column
            )));
        }
        columns.push(lowered);
    }

    let key_index = schema.position(&mapping.primary_key).ok_or_else(|| {
        ReplicatorError::RowShape {
            table: schema.table.clone(),
            message: format!(
                "primary key column '{}' is not among the source columns {:?}",
                mapping.primary_key, schema.columns
            ),
        }
    })?;
    let primary_key = columns[key_index].clone();

    let mut unique: Vec<RowRecord> = Vec::with_capacity(rows.len());
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut duplicates = 0usize;

    for (row_number, row) in rows.into_iter().enumerate() {
        schema.check_arity(&row)?;
        let key = row
            .get(key_index)
            .ok_or_else(|| ReplicatorError::RowShape {
                table: schema.table.clone(),
                message: format!(
                    "row {} has a NULL primary key ('{}')",
                    row_number + 1,
                    mapping.primary_key
                ),
            })?
            .to_string();

        match seen.get(&key) {
            Some(&slot) => {
                unique[slot] = row;
                duplicates += 1;
            }
            None => {
                seen.insert(key, unique.len());
                unique.push(row);
            }
        }
    }

    if duplicates > 0 {
        tracing::warn!(
            "Table '{}' has {} rows with repeated keys; the last occurrence wins",
            schema.table,
            duplicates
        );
    }

    Ok(PreparedTable {
        target,
        columns,
        primary_key,
        rows: unique,
    })
}

/// Mirrors snapshot tables into the destination database.
pub struct ReplicationEngine {
    client: Client,
    snapshot: PathBuf,
    statement_timeout: Duration,
}

impl ReplicationEngine {
    pub fn new(client: Client, snapshot: impl Into<PathBuf>, statement_timeout: Duration) -> Self {
        Self {
            client,
            snapshot: snapshot.into(),
            statement_timeout,
        }
    }

    pub async fn connect(dest: &DestinationConfig, snapshot: impl Into<PathBuf>) -> Result<Self> {
        let client = crate::postgres::connect(dest).await?;
        Ok(Self::new(client, snapshot, dest.statement_timeout()))
    }

    pub fn snapshot(&self) -> &Path {
        &self.snapshot
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Replicate one table; returns rows inserted or updated.
    ///
    /// Nothing is written unless the schema read and row validation
    /// succeeded. Any destination error rolls the whole table back.
    pub async fn replicate(&mut self, mapping: &TableMapping) -> Result<u64> {
        let (schema, rows) = self.load_source(&mapping.source).await?;
        let prepared = prepare_table(mapping, &schema, rows)?;
        let target = prepared.target.clone();

        tracing::info!(
            "Replicating {} rows from '{}' into '{}' ({} columns, key '{}')",
            prepared.rows.len(),
            mapping.source,
            target,
            prepared.columns.len(),
            prepared.primary_key
        );

        let limit = self.statement_timeout;
        match timeout(limit, self.write_table(&prepared)).await {
            Err(_) => Err(ReplicatorError::destination_write(
                target,
                anyhow::anyhow!("timed out after {:?}", limit),
            )),
            Ok(Err(e)) => {
                tracing::error!("Replication of '{}' rolled back: {:?}", target, e);
                Err(ReplicatorError::destination_write(target, e))
            }
            Ok(Ok(affected)) => {
                tracing::info!("Committed {} rows into '{}'", affected, target);
                Ok(affected)
            }
        }
    }

    /// Replicate each mapping in turn. A failed table doesn't stop the rest.
    pub async fn replicate_all(&mut self, mappings: &[TableMapping]) -> ReplicationReport {
        let start = Instant::now();
        let mut report = ReplicationReport::default();

        for mapping in mappings {
            let result = self.replicate(mapping).await;
            if let Err(e) = &result {
                tracing::error!("Failed to replicate '{}': {:#}", mapping.source, e);
            }
            report.tables.push(TableReport {
                source: mapping.source.clone(),
                target: mapping.target_table(),
                result,
            });
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }

    async fn load_source(&self, table: &str) -> Result<(TableSchema, Vec<RowRecord>)> {
        let snapshot = self.snapshot.clone();
        let table = table.to_string();
        tokio::task::spawn_blocking(move || -> Result<(TableSchema, Vec<RowRecord>)> {
            let introspector = SchemaIntrospector::open(&snapshot)?;
            let schema = introspector.columns(&table)?;
            let rows = introspector.read_rows(&schema)?;
            Ok((schema, rows))
        })
        .await
        .map_err(|e| anyhow::anyhow!("snapshot reader task failed: {e}"))?
    }

    async fn write_table(&mut self, table: &PreparedTable) -> anyhow::Result<u64> {
        let tx = self
            .client
            .transaction()
            .await
            .context("Failed to begin transaction")?;

        let create = build_create_table(&table.target, &table.columns, &table.primary_key);
        tracing::debug!("{}", create);
        tx.batch_execute(&create)
            .await
            .with_context(|| format!("Failed to create table '{}'", table.target))?;

        let existing = crate::postgres::existing_columns(&tx, &table.target).await?;
        for column in &table.columns {
            if !existing.iter().any(|c| c == column) {
                tracing::info!(
                    "Adding newly observed column '{}' to '{}'",
                    column,
                    table.target
                );
                tx.batch_execute(&build_add_column(&table.target, column))
                    .await
                    .with_context(|| {
                        format!("Failed to add column '{}' to '{}'", column, table.target)
                    })?;
            }
        }

        let mut affected = 0u64;
        for chunk in table.rows.chunks(rows_per_statement(table.columns.len())) {
            let query = build_upsert(
                &table.target,
                &table.columns,
                &table.primary_key,
                chunk.len(),
            );
            let params: Vec<&(dyn ToSql + Sync)> = chunk
                .iter()
                .flat_map(|row| row.values.iter().map(|v| v as &(dyn ToSql + Sync)))
                .collect();

            affected += tx
                .execute(query.as_str(), &params)
                .await
                .with_context(|| format!("Failed to upsert batch into '{}'", table.target))?;
            tracing::debug!("Upserted {} rows into '{}'", chunk.len(), table.target);
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit '{}'", table.target))?;
        Ok(affected)
    }
}
