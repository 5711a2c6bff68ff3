// ABOUTME: Startup configuration loaded once from TOML and passed to components
// ABOUTME: Device bridge, destination PostgreSQL, backup catalog, and table mappings

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::compare::IdentityColumn;
use crate::error::{ReplicatorError, Result};
use crate::replicate::TableMapping;

/// Environment variable that overrides `destination.password`.
pub const PASSWORD_ENV: &str = "DEVICE_REPLICATOR_PG_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Seconds between polling iterations
    pub poll_interval_seconds: u64,
    /// Where the poller remembers the last adopted change marker
    pub state_path: PathBuf,
    pub device: DeviceConfig,
    pub destination: DestinationConfig,
    pub backups: BackupConfig,
    pub tables: Vec<TableMapping>,
    pub compare: CompareConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            state_path: PathBuf::from(".device-replicator/poll-state.json"),
            device: DeviceConfig::default(),
            destination: DestinationConfig::default(),
            backups: BackupConfig::default(),
            tables: vec![
                TableMapping::new("DWJJOB", "jobs", "dwjkey"),
                TableMapping::new("DWVVEH", "vehicles", "dwvkey"),
            ],
            compare: CompareConfig::default(),
        }
    }
}

/// How the device database is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// `adb pull`/`adb push` against an attached Android device
    #[default]
    Adb,
    /// The device storage is mounted locally; `remote_path` is a local path
    Filesystem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub transport: TransportKind,
    /// adb executable, resolved through PATH when not absolute
    pub adb_path: String,
    /// Target a specific device when several are attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Database location on the device
    pub remote_path: String,
    /// Single-slot local staging copy
    pub staging_path: PathBuf,
    pub command_timeout_seconds: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Adb,
            adb_path: "adb".to_string(),
            serial: None,
            remote_path: "/sdcard/BCAApp/database.db".to_string(),
            staging_path: PathBuf::from("temp.db"),
            command_timeout_seconds: 30,
        }
    }
}

impl DeviceConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Negotiate TLS through native-tls
    pub tls: bool,
    pub connect_timeout_seconds: u64,
    /// Upper bound for one table's whole transaction
    pub statement_timeout_seconds: u64,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            tls: false,
            connect_timeout_seconds: 10,
            statement_timeout_seconds: 120,
        }
    }
}

impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("tls", &self.tls)
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .field("statement_timeout_seconds", &self.statement_timeout_seconds)
            .finish()
    }
}

impl DestinationConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.database.is_empty()
    }

    /// `user@host:port/database`, safe to log.
    pub fn endpoint(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub directory: PathBuf,
    pub index_path: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("backups"),
            index_path: PathBuf::from("backup_metadata.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// Tables compared when none are given on the command line
    pub tables: Vec<String>,
    /// Column holding row identity; the first column when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_column: Option<String>,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            tables: vec!["DWJJOB".to_string(), "DWVVEH".to_string()],
            identity_column: None,
        }
    }
}

impl CompareConfig {
    pub fn identity(&self) -> IdentityColumn {
        match &self.identity_column {
            Some(column) => IdentityColumn::Named(column.clone()),
            None => IdentityColumn::First,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist. The password may be supplied through [`PASSWORD_ENV`].
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_toml(&contents)?
        } else {
            tracing::debug!("Config file {} not found, using defaults", path.display());
            Self::default()
        };

        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.destination.password = password;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ReplicatorError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ReplicatorError::Config(e.to_string()))
    }

    /// Same config with the password blanked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.destination.password.is_empty() {
            copy.destination.password = "***".to_string();
        }
        copy
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(ReplicatorError::Config(
                "poll_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.device.command_timeout_seconds == 0 {
            return Err(ReplicatorError::Config(
                "device.command_timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.device.remote_path.trim().is_empty() {
            return Err(ReplicatorError::Config(
                "device.remote_path cannot be empty".to_string(),
            ));
        }
        if self.destination.port == 0 {
            return Err(ReplicatorError::Config(
                "destination.port cannot be 0".to_string(),
            ));
        }
        if self.destination.connect_timeout_seconds == 0 {
            return Err(ReplicatorError::Config(
                "destination.connect_timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.destination.statement_timeout_seconds == 0 {
            return Err(ReplicatorError::Config(
                "destination.statement_timeout_seconds must be at least 1".to_string(),
            ));
        }
        for mapping in &self.tables {
            mapping
                .validate()
                .map_err(|e| ReplicatorError::Config(format!("[[tables]] entry: {e}")))?;
        }
        Ok(())
    }

    /// Resolve the table mappings to replicate, optionally narrowed to the
    /// given source table names.
    pub fn selected_tables(&self, only: &[String]) -> Result<Vec<TableMapping>> {
        if only.is_empty() {
            return Ok(self.tables.clone());
        }
        only.iter()
            .map(|name| {
                self.tables
                    .iter()
                    .find(|m| m.source.eq_ignore_ascii_case(name))
                    .cloned()
                    .ok_or_else(|| {
                        ReplicatorError::Config(format!(
                            "table '{}' has no [[tables]] mapping",
                            crate::utils::sanitize_identifier(name)
                        ))
                    })
            })
            .collect()
    }
}
