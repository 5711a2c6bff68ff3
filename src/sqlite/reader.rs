// ABOUTME: Schema introspection and row reading over a snapshot file
// ABOUTME: Column order comes from the store and is never rearranged

use std::path::{Path, PathBuf};

use anyhow::Context;
use rusqlite::Connection;

use super::{open_snapshot, RowRecord, TableSchema};
use crate::error::{ReplicatorError, Result};
use crate::utils::{quote_ident, render_value};

/// Reads table schemas and rows from one snapshot.
///
/// Holds a single connection so the schema and the rows of a table come from
/// the same file even if the staging slot is replaced mid-run.
#[derive(Debug)]
pub struct SchemaIntrospector {
    path: PathBuf,
    conn: Connection,
}

impl SchemaIntrospector {
    /// Open `path` read-only.
    ///
    /// # Errors
    ///
    /// `SchemaUnavailable` when the file is missing, unreadable, or not a
    /// SQLite database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let label = path.display().to_string();
        if !path.is_file() {
            return Err(ReplicatorError::schema_unavailable(
                label,
                "snapshot file does not exist",
            ));
        }
        let conn = open_snapshot(path)
            .map_err(|e| ReplicatorError::schema_unavailable(label.clone(), e))?;

        // Opening is lazy; touch the header so a non-database file fails here.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| ReplicatorError::schema_unavailable(label, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// User tables in the snapshot, sorted by name.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type='table' \
                 AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )
            .context("Failed to prepare statement to list tables")?;

        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query table list")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to collect table names")?;

        tracing::debug!(
            "Found {} user tables in {}",
            tables.len(),
            self.path.display()
        );
        Ok(tables)
    }

    /// Ordered column names of `table`.
    ///
    /// # Errors
    ///
    /// `SchemaUnavailable` when the table does not exist.
    pub fn columns(&self, table: &str) -> Result<TableSchema> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(|e| ReplicatorError::schema_unavailable(table, e))?;

        let columns = stmt
            .query_map([table], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<Result<Vec<String>, _>>())
            .map_err(|e| ReplicatorError::schema_unavailable(table, e))?;

        if columns.is_empty() {
            return Err(ReplicatorError::schema_unavailable(
                table,
                "table does not exist in snapshot",
            ));
        }

        tracing::debug!("Table '{}' has columns {:?}", table, columns);
        Ok(TableSchema::new(table, columns))
    }

    /// Every row of `schema.table`, selected in schema column order.
    ///
    /// Names are quoted, not allow-listed: snapshot columns such as `Job No`
    /// are readable here and rejected only when written to the destination.
    pub fn read_rows(&self, schema: &TableSchema) -> Result<Vec<RowRecord>> {
        let column_list: Vec<String> = schema.columns.iter().map(|c| quote_ident(c)).collect();
        let query = format!(
            "SELECT {} FROM {}",
            column_list.join(", "),
            quote_ident(&schema.table)
        );

        let mut stmt = self
            .conn
            .prepare(&query)
            .map_err(|e| ReplicatorError::schema_unavailable(schema.table.clone(), e))?;

        let width = schema.columns.len();
        let rows = stmt
            .query_map([], |row| {
                let mut values = Vec::with_capacity(width);
                for idx in 0..width {
                    values.push(render_value(row.get_ref(idx)?));
                }
                Ok(RowRecord::new(values))
            })
            .with_context(|| format!("Failed to query rows from table '{}'", schema.table))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to collect rows from table '{}'", schema.table))?;

        tracing::info!("Read {} rows from table '{}'", rows.len(), schema.table);
        Ok(rows)
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let query = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self
            .conn
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| ReplicatorError::schema_unavailable(table, e))?;
        Ok(count as usize)
    }
}
