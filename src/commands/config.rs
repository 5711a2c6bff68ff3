// ABOUTME: Config commands: write a starter file, show the effective settings
// ABOUTME: Shown output always has the destination password redacted

use std::path::Path;

use clap::{Args, Subcommand};

use crate::config::{AppConfig, PASSWORD_ENV};
use crate::error::{ReplicatorError, Result};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

/// Starter file: the defaults, preceded by a short guide.
pub fn starter_config() -> Result<String> {
    let header = format!(
        "# device-replicator configuration\n\
         #\n\
         # device.transport: \"adb\" pulls over USB; \"filesystem\" treats remote_path\n\
         # as a locally mounted file.\n\
         # [destination] is optional; without it `poll` only fetches.\n\
         # The password may be left empty and supplied through {}.\n\n",
        PASSWORD_ENV
    );
    Ok(header + &AppConfig::default().to_toml()?)
}

/// `config init`/`config show`. `init` never reads the existing file, so it
/// works even when that file doesn't parse.
pub fn command(args: ConfigArgs, path: &Path) -> Result<()> {
    match args.command {
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                return Err(ReplicatorError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                )));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, starter_config()?)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigCommands::Show => {
            let config = AppConfig::load(path)?;
            print!("{}", config.redacted().to_toml()?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starter_config_parses_back_to_defaults() {
        let text = starter_config().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.tables, AppConfig::default().tables);
        assert_eq!(parsed.poll_interval_seconds, 60);
    }
}
