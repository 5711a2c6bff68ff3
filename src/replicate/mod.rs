// ABOUTME: Schema-driven replication of snapshot tables into PostgreSQL
// ABOUTME: Table mappings, per-run reports, and the upsert engine

pub mod engine;
pub mod sql;

pub use engine::{prepare_table, PreparedTable, ReplicationEngine};

use serde::{Deserialize, Serialize};

use crate::error::{ReplicatorError, Result};
use crate::utils::validate_identifier;

/// Which source table feeds which destination table, and its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    /// Table name in the snapshot
    pub source: String,
    /// Destination table name; defaults to the source name
    #[serde(default)]
    pub target: String,
    /// Column declared as the destination primary key
    pub primary_key: String,
}

impl TableMapping {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            primary_key: primary_key.into(),
        }
    }

    /// Mirror `source` under its own name.
    pub fn same_name(source: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let source = source.into();
        Self::new(source.clone(), source, primary_key)
    }

    /// Destination table name as created in PostgreSQL (lower-cased, the
    /// way unquoted identifiers fold).
    pub fn target_table(&self) -> String {
        if self.target.is_empty() {
            self.source.to_ascii_lowercase()
        } else {
            self.target.to_ascii_lowercase()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.source)?;
        if !self.target.is_empty() {
            validate_identifier(&self.target)?;
        }
        validate_identifier(&self.primary_key)?;
        Ok(())
    }
}

/// Outcome of one table within a multi-table run.
#[derive(Debug)]
pub struct TableReport {
    pub source: String,
    pub target: String,
    pub result: Result<u64>,
}

/// Summary of a multi-table run; each table was its own transaction.
#[derive(Debug, Default)]
pub struct ReplicationReport {
    pub tables: Vec<TableReport>,
    pub duration_ms: u64,
}

impl ReplicationReport {
    pub fn is_success(&self) -> bool {
        self.tables.iter().all(|t| t.result.is_ok())
    }

    pub fn rows_replicated(&self) -> u64 {
        self.tables
            .iter()
            .filter_map(|t| t.result.as_ref().ok())
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ReplicatorError)> {
        self.tables
            .iter()
            .filter_map(|t| t.result.as_ref().err().map(|e| (t.source.as_str(), e)))
    }

    pub fn tables_succeeded(&self) -> usize {
        self.tables.iter().filter(|t| t.result.is_ok()).count()
    }
}
