// ABOUTME: Error taxonomy shared by every component of the replicator
// ABOUTME: Maps low-level transport/store failures onto transient vs fatal outcomes

use std::path::PathBuf;
use std::time::Duration;

/// Coarse classification callers use to decide between retry and report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Worth retrying on the next poll cycle; no state was changed.
    TransientFailure,
    /// Retrying without operator intervention will fail the same way.
    FatalFailure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::TransientFailure => "transient failure",
            Outcome::FatalFailure => "fatal failure",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicatorError {
    /// Device bridge command failed (non-zero exit, device missing, spawn error).
    #[error("{operation} failed: {message}")]
    Transport { operation: String, message: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// Staging store missing or unreadable, or the requested table is absent.
    #[error("schema unavailable for table '{table}': {reason}")]
    SchemaUnavailable { table: String, reason: String },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A row does not line up with its table schema.
    #[error("table '{table}': {message}")]
    RowShape { table: String, message: String },

    #[error("failed to connect to destination {endpoint}")]
    DestinationConnect {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    /// The table's batch was rolled back in full.
    #[error("replication of table '{table}' rolled back")]
    DestinationWrite {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    /// Catalog row exists but its backup file does not.
    #[error("backup #{id} is listed in the catalog but {} is missing", path.display())]
    CatalogInconsistency { id: i64, path: PathBuf },

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReplicatorError {
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        ReplicatorError::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn schema_unavailable(table: impl Into<String>, reason: impl ToString) -> Self {
        ReplicatorError::SchemaUnavailable {
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    pub fn destination_write(table: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        ReplicatorError::DestinationWrite {
            table: table.into(),
            source: source.into(),
        }
    }

    /// Classify this error for uniform retry/report handling.
    pub fn outcome(&self) -> Outcome {
        match self {
            ReplicatorError::Transport { .. }
            | ReplicatorError::Timeout { .. }
            | ReplicatorError::DestinationConnect { .. }
            | ReplicatorError::DestinationWrite { .. }
            | ReplicatorError::CatalogInconsistency { .. }
            | ReplicatorError::Io(_) => Outcome::TransientFailure,
            ReplicatorError::SchemaUnavailable { .. }
            | ReplicatorError::InvalidIdentifier(_)
            | ReplicatorError::RowShape { .. }
            | ReplicatorError::NotFound(_)
            | ReplicatorError::Config(_)
            | ReplicatorError::Other(_) => Outcome::FatalFailure,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.outcome() == Outcome::TransientFailure
    }
}

pub type Result<T, E = ReplicatorError> = std::result::Result<T, E>;
