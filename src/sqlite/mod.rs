// ABOUTME: SQLite snapshot access: read-only open, table schemas, row records
// ABOUTME: Schemas are discovered at runtime and passed explicitly to consumers

pub mod reader;

pub use reader::SchemaIntrospector;

use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::error::{ReplicatorError, Result};

/// Open a snapshot file read-only. Never creates a file: a missing snapshot
/// is an error, not an empty database.
pub fn open_snapshot(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

/// Ordered column names of one table, exactly as the store reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of `column`, compared case-insensitively (SQLite and
    /// unquoted PostgreSQL names both ignore case).
    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }

    /// Fail fast when a row doesn't line up with this schema.
    pub fn check_arity(&self, row: &RowRecord) -> Result<()> {
        if row.values.len() != self.columns.len() {
            return Err(ReplicatorError::RowShape {
                table: self.table.clone(),
                message: format!(
                    "row has {} values but the schema has {} columns",
                    row.values.len(),
                    self.columns.len()
                ),
            });
        }
        Ok(())
    }
}

/// One source row as text, positionally paired with its [`TableSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRecord {
    pub values: Vec<Option<String>>,
}

impl RowRecord {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }
}
