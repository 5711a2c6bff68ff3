// ABOUTME: CLI entry point for device-replicator
// ABOUTME: Parses commands, sets up logging, and reports failures with their outcome class

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use device_replicator::commands::{self, SnapshotSource};
use device_replicator::config::AppConfig;
use device_replicator::{Outcome, ReplicatorError};

#[derive(Parser)]
#[command(name = "device-replicator")]
#[command(
    about = "Mirror an on-device SQLite database into PostgreSQL, with backups and snapshot diffs",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(
        long,
        global = true,
        env = "DEVICE_REPLICATOR_CONFIG",
        default_value = "replicator.toml"
    )]
    config: PathBuf,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Write logs to this file instead of stderr
    #[arg(long = "log-file", global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the device's change marker and compare it with the last adopted one
    Probe,
    /// Pull the device database into the staging file
    Fetch {
        /// Also archive the fetched copy with this note
        #[arg(long)]
        archive: Option<String>,
    },
    /// Push the staging database back to the device
    Push,
    /// Mirror mapped tables from a snapshot into PostgreSQL
    Replicate {
        /// Snapshot to read: `staging`, `backup:<id>`, or a file path
        #[arg(long, default_value = "staging")]
        from: SnapshotSource,
        /// Only these source tables (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },
    /// Watch the device and fetch (and replicate) whenever it changes
    Poll {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Fetch only; skip replication
        #[arg(long)]
        no_replicate: bool,
    },
    /// Manage point-in-time backups of the staging database
    Backup {
        #[command(flatten)]
        args: commands::backup::BackupArgs,
    },
    /// Show row and cell differences between two snapshots
    Compare {
        /// First snapshot: `staging`, `backup:<id>`, or a file path
        first: SnapshotSource,
        /// Second snapshot
        second: SnapshotSource,
        /// Tables to compare (comma-separated; defaults to [compare].tables)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        /// Column identifying a row (defaults to the first column)
        #[arg(long)]
        identity: Option<String>,
    },
    /// Create or inspect the configuration file
    Config {
        #[command(flatten)]
        args: commands::config::ConfigArgs,
    },
}

impl Commands {
    fn operation(&self) -> &'static str {
        match self {
            Commands::Probe => "probe",
            Commands::Fetch { .. } => "fetch",
            Commands::Push => "push",
            Commands::Replicate { .. } => "replicate",
            Commands::Poll { .. } => "poll",
            Commands::Backup { .. } => "backup",
            Commands::Compare { .. } => "compare",
            Commands::Config { .. } => "config",
        }
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    // RUST_LOG wins over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log, cli.log_file.as_deref()) {
        eprintln!(
            "Cannot open log file {}: {}",
            cli.log_file.as_deref().unwrap_or(Path::new("")).display(),
            e
        );
        return ExitCode::from(2);
    }

    let operation = cli.command.operation();
    match run(cli.command, &cli.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{} failed: {:?}", operation, e);
            let log_location = match &cli.log_file {
                Some(path) => path.display().to_string(),
                None => "stderr (rerun with --log debug for more detail)".to_string(),
            };
            eprintln!("{} failed ({}): {:#}", operation, e.outcome().as_str(), e);
            eprintln!("See the log at {}", log_location);
            match e.outcome() {
                Outcome::TransientFailure => ExitCode::from(1),
                Outcome::FatalFailure => ExitCode::from(2),
            }
        }
    }
}

async fn run(command: Commands, config_path: &Path) -> Result<(), ReplicatorError> {
    // `config init` must work before a valid file exists, so load lazily
    let load = || -> Result<AppConfig, ReplicatorError> {
        let config = AppConfig::load(config_path)?;
        tracing::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    };

    match command {
        Commands::Config { args } => commands::config::command(args, config_path),
        Commands::Probe => commands::probe(&load()?).await,
        Commands::Fetch { archive } => commands::fetch(&load()?, archive).await,
        Commands::Push => commands::push(&load()?).await,
        Commands::Replicate { from, tables } => {
            commands::replicate(&load()?, &from, &tables).await
        }
        Commands::Poll { once, no_replicate } => {
            commands::poll(&load()?, once, no_replicate).await
        }
        Commands::Backup { args } => commands::backup::command(args, &load()?),
        Commands::Compare {
            first,
            second,
            tables,
            identity,
        } => commands::compare(&load()?, &first, &second, &tables, identity).await,
    }
}
