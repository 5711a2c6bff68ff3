// ABOUTME: Offline comparison of two snapshot files, table by table
// ABOUTME: Rows are matched on an identity column; differences are reported per cell

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ReplicatorError, Result};
use crate::sqlite::{RowRecord, SchemaIntrospector, TableSchema};

/// Which column identifies a row when matching the two sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityColumn {
    /// The first column each table reports.
    #[default]
    First,
    /// A named column, matched case-insensitively.
    Named(String),
}

impl IdentityColumn {
    fn resolve(&self, schema: &TableSchema) -> Result<usize> {
        match self {
            IdentityColumn::First if schema.is_empty() => Err(ReplicatorError::RowShape {
                table: schema.table.clone(),
                message: "table has no columns".to_string(),
            }),
            IdentityColumn::First => Ok(0),
            IdentityColumn::Named(name) => {
                schema
                    .position(name)
                    .ok_or_else(|| ReplicatorError::RowShape {
                        table: schema.table.clone(),
                        message: format!("identity column '{}' not found", name),
                    })
            }
        }
    }
}

/// One cell that differs between matched rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellChange {
    pub key: Option<String>,
    pub column_index: usize,
    pub column_name: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDiff {
    /// Identities present only in the second snapshot
    pub added: BTreeSet<Option<String>>,
    /// Identities present only in the first snapshot
    pub removed: BTreeSet<Option<String>>,
    pub changes: Vec<CellChange>,
    pub columns_only_in_a: Vec<String>,
    pub columns_only_in_b: Vec<String>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changes.is_empty()
            && self.columns_only_in_a.is_empty()
            && self.columns_only_in_b.is_empty()
    }
}

#[derive(Debug)]
pub struct TableComparison {
    pub table: String,
    /// `Err` when the table could not be compared; other tables are unaffected.
    pub outcome: Result<TableDiff>,
}

#[derive(Debug)]
pub struct ComparisonReport {
    pub snapshot_a: PathBuf,
    pub snapshot_b: PathBuf,
    pub tables: Vec<TableComparison>,
}

impl ComparisonReport {
    pub fn has_differences(&self) -> bool {
        self.tables
            .iter()
            .any(|t| t.outcome.as_ref().map(|d| !d.is_empty()).unwrap_or(false))
    }

    pub fn diff(&self, table: &str) -> Option<&TableDiff> {
        self.tables
            .iter()
            .find(|t| t.table.eq_ignore_ascii_case(table))
            .and_then(|t| t.outcome.as_ref().ok())
    }
}

/// Compare `tables` between two snapshot files.
///
/// Fails only when a snapshot cannot be opened at all. A table missing from
/// either side is recorded as an error for that table and skipped.
pub fn compare(
    snapshot_a: &Path,
    snapshot_b: &Path,
    tables: &[String],
    identity: &IdentityColumn,
) -> Result<ComparisonReport> {
    let a = SchemaIntrospector::open(snapshot_a)?;
    let b = SchemaIntrospector::open(snapshot_b)?;

    let mut report = ComparisonReport {
        snapshot_a: snapshot_a.to_path_buf(),
        snapshot_b: snapshot_b.to_path_buf(),
        tables: Vec::with_capacity(tables.len()),
    };

    for table in tables {
        let outcome = compare_table(&a, &b, table, identity);
        if let Err(e) = &outcome {
            tracing::warn!("Skipping table '{}' in comparison: {}", table, e);
        }
        report.tables.push(TableComparison {
            table: table.clone(),
            outcome,
        });
    }

    Ok(report)
}

fn compare_table(
    a: &SchemaIntrospector,
    b: &SchemaIntrospector,
    table: &str,
    identity: &IdentityColumn,
) -> Result<TableDiff> {
    let schema_a = a.columns(table)?;
    let schema_b = b.columns(table)?;
    let key_a = identity.resolve(&schema_a)?;
    let key_b = identity.resolve(&schema_b)?;

    let rows_a = index_rows(a.read_rows(&schema_a)?, key_a);
    let rows_b = index_rows(b.read_rows(&schema_b)?, key_b);

    let mut diff = TableDiff {
        columns_only_in_a: missing_from(&schema_a, &schema_b),
        columns_only_in_b: missing_from(&schema_b, &schema_a),
        ..TableDiff::default()
    };

    for (key, row_a) in &rows_a {
        match rows_b.get(key) {
            None => {
                diff.removed.insert(key.clone());
            }
            Some(row_b) => {
                let shared = row_a.values.len().min(row_b.values.len());
                for index in 0..shared {
                    if row_a.values[index] != row_b.values[index] {
                        diff.changes.push(CellChange {
                            key: key.clone(),
                            column_index: index,
                            column_name: schema_a.columns[index].clone(),
                            old: row_a.values[index].clone(),
                            new: row_b.values[index].clone(),
                        });
                    }
                }
            }
        }
    }
    diff.added = rows_b
        .keys()
        .filter(|key| !rows_a.contains_key(*key))
        .cloned()
        .collect();

    tracing::debug!(
        "Compared '{}': {} added, {} removed, {} changed cells",
        table,
        diff.added.len(),
        diff.removed.len(),
        diff.changes.len()
    );
    Ok(diff)
}

/// Map identity to row; a repeated identity keeps the last row.
fn index_rows(rows: Vec<RowRecord>, key: usize) -> BTreeMap<Option<String>, RowRecord> {
    rows.into_iter()
        .map(|row| (row.get(key).map(str::to_string), row))
        .collect()
}

fn missing_from(schema: &TableSchema, other: &TableSchema) -> Vec<String> {
    schema
        .columns
        .iter()
        .filter(|c| other.position(c).is_none())
        .cloned()
        .collect()
}

fn show(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("NULL")
}

fn show_keys(keys: &BTreeSet<Option<String>>) -> String {
    keys.iter().map(show).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Comparing {} -> {}",
            self.snapshot_a.display(),
            self.snapshot_b.display()
        )?;
        for table in &self.tables {
            writeln!(f)?;
            writeln!(f, "--- Comparing table {} ---", table.table)?;
            let diff = match &table.outcome {
                Ok(diff) => diff,
                Err(e) => {
                    writeln!(f, "Error during comparison: {}", e)?;
                    continue;
                }
            };
            if diff.is_empty() {
                writeln!(f, "No differences")?;
                continue;
            }
            if !diff.columns_only_in_a.is_empty() {
                writeln!(f, "Columns only in first: {}", diff.columns_only_in_a.join(", "))?;
            }
            if !diff.columns_only_in_b.is_empty() {
                writeln!(f, "Columns only in second: {}", diff.columns_only_in_b.join(", "))?;
            }
            if !diff.added.is_empty() {
                writeln!(f, "Rows added: {}", show_keys(&diff.added))?;
            }
            if !diff.removed.is_empty() {
                writeln!(f, "Rows removed: {}", show_keys(&diff.removed))?;
            }
            for change in &diff.changes {
                writeln!(
                    f,
                    "Table {}, Row {}, Column {} ({}) changed from '{}' to '{}'",
                    table.table,
                    show(&change.key),
                    change.column_index,
                    change.column_name,
                    show(&change.old),
                    show(&change.new)
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn db(dir: &Path, name: &str, sql: &str) -> PathBuf {
        let path = dir.join(name);
        Connection::open(&path).unwrap().execute_batch(sql).unwrap();
        path
    }

    #[test]
    fn test_named_identity_missing_skips_table() {
        let dir = tempfile::tempdir().unwrap();
        let a = db(dir.path(), "a.db", "CREATE TABLE t (id TEXT, v TEXT);");
        let b = db(dir.path(), "b.db", "CREATE TABLE t (id TEXT, v TEXT);");
        let report = compare(
            &a,
            &b,
            &["t".to_string()],
            &IdentityColumn::Named("nope".to_string()),
        )
        .unwrap();
        assert!(report.tables[0].outcome.is_err());
    }

    #[test]
    fn test_named_identity_matches_rows() {
        let dir = tempfile::tempdir().unwrap();
        let a = db(
            dir.path(),
            "a.db",
            "CREATE TABLE t (seq INTEGER, code TEXT, v TEXT);
             INSERT INTO t VALUES (1, 'A', 'x'), (2, 'B', 'y');",
        );
        let b = db(
            dir.path(),
            "b.db",
            "CREATE TABLE t (seq INTEGER, code TEXT, v TEXT);
             INSERT INTO t VALUES (7, 'B', 'y'), (8, 'A', 'x');",
        );
        let report = compare(&a, &b, &["t".to_string()], &IdentityColumn::Named("CODE".into()))
            .unwrap();
        let diff = report.diff("t").unwrap();
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        // Only the sequence numbers moved
        assert_eq!(diff.changes.len(), 2);
        assert!(diff.changes.iter().all(|c| c.column_name == "seq"));
    }

    #[test]
    fn test_textual_comparison_has_no_coercion() {
        let dir = tempfile::tempdir().unwrap();
        let a = db(
            dir.path(),
            "a.db",
            "CREATE TABLE t (id TEXT, n); INSERT INTO t VALUES ('k', '1');",
        );
        let b = db(
            dir.path(),
            "b.db",
            "CREATE TABLE t (id TEXT, n); INSERT INTO t VALUES ('k', 1.0);",
        );
        let report = compare(&a, &b, &["t".to_string()], &IdentityColumn::First).unwrap();
        let diff = report.diff("t").unwrap();
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].old.as_deref(), Some("1"));
        assert_eq!(diff.changes[0].new.as_deref(), Some("1.0"));
    }

    #[test]
    fn test_column_differences_reported() {
        let dir = tempfile::tempdir().unwrap();
        let a = db(dir.path(), "a.db", "CREATE TABLE t (id TEXT, old_col TEXT);");
        let b = db(dir.path(), "b.db", "CREATE TABLE t (id TEXT, old_col TEXT, extra TEXT);");
        let report = compare(&a, &b, &["t".to_string()], &IdentityColumn::First).unwrap();
        let diff = report.diff("t").unwrap();
        assert!(diff.columns_only_in_a.is_empty());
        assert_eq!(diff.columns_only_in_b, vec!["extra".to_string()]);
        assert!(report.to_string().contains("Columns only in second: extra"));
    }

    #[test]
    fn test_unreadable_snapshot_fails_whole_comparison() {
        let dir = tempfile::tempdir().unwrap();
        let a = db(dir.path(), "a.db", "CREATE TABLE t (id TEXT);");
        let err = compare(
            &a,
            &dir.path().join("missing.db"),
            &["t".to_string()],
            &IdentityColumn::First,
        )
        .unwrap_err();
        assert!(matches!(err, ReplicatorError::SchemaUnavailable { .. }));
    }
}
