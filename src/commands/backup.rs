// ABOUTME: Backup catalog commands: create, import, list, open, delete
// ABOUTME: Create archives the current staging copy; open reports a backup's contents

use std::path::PathBuf;

use clap::{Args, Subcommand};

use super::open_catalog;
use crate::config::AppConfig;
use crate::error::{ReplicatorError, Result};
use crate::sqlite::SchemaIntrospector;

#[derive(Args)]
pub struct BackupArgs {
    #[command(subcommand)]
    command: BackupCommands,
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Archive the current staging database
    Create {
        /// Free-text note stored with the backup
        #[arg(long)]
        note: Option<String>,
    },
    /// Copy an external database file into the catalog
    Import {
        path: PathBuf,
        #[arg(long)]
        note: Option<String>,
    },
    /// List backups, newest first
    List,
    /// Show where a backup lives and what it contains
    Open { id: i64 },
    /// Remove a backup and its file
    Delete { id: i64 },
}

pub fn command(args: BackupArgs, config: &AppConfig) -> Result<()> {
    let catalog = open_catalog(config)?;

    match args.command {
        BackupCommands::Create { note } => {
            let staging = &config.device.staging_path;
            if !staging.is_file() {
                return Err(ReplicatorError::NotFound(format!(
                    "staging database {} (run `fetch` first)",
                    staging.display()
                )));
            }
            let entry = catalog.archive(staging, note.as_deref())?;
            println!("Created backup #{} ({})", entry.id, entry.filename);
        }
        BackupCommands::Import { path, note } => {
            let entry = catalog.import(&path, note.as_deref())?;
            println!(
                "Imported {} as backup #{} ({})",
                path.display(),
                entry.id,
                entry.filename
            );
        }
        BackupCommands::List => {
            let entries = catalog.list()?;
            if entries.is_empty() {
                println!("No backups in {}", catalog.directory().display());
                return Ok(());
            }
            println!("{:>5}  {:<20}  {:<32}  NOTE", "ID", "TIMESTAMP", "FILE");
            for entry in entries {
                println!(
                    "{:>5}  {:<20}  {:<32}  {}",
                    entry.id,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.filename,
                    entry.note.unwrap_or_default()
                );
            }
        }
        BackupCommands::Open { id } => {
            let entry = catalog.get(id)?;
            let snapshot = catalog.open_entry(id)?;
            println!("Backup #{}: {}", entry.id, snapshot.path.display());
            println!("  created: {}", entry.timestamp.to_rfc3339());
            println!("  sha256:  {}", snapshot.sha256);
            if let Some(note) = &entry.note {
                println!("  note:    {}", note);
            }
            let introspector = SchemaIntrospector::open(&snapshot.path)?;
            for table in introspector.list_tables()? {
                match introspector.row_count(&table) {
                    Ok(rows) => println!("  {:<24} {} rows", table, rows),
                    Err(e) => println!("  {:<24} unreadable: {}", table, e),
                }
            }
        }
        BackupCommands::Delete { id } => {
            let outcome = catalog.delete(id)?;
            if outcome.file_was_missing {
                println!(
                    "Deleted backup #{} (file {} was already missing)",
                    id, outcome.entry.filename
                );
            } else {
                println!("Deleted backup #{} ({})", id, outcome.entry.filename);
            }
        }
    }
    Ok(())
}
