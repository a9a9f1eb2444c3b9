//! Command-line configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rekey_core::config::DEFAULT_MAX_IDENTIFIER_ATTEMPTS;
use rekey_core::{MigrationConfig, StoreConfig};

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// SQLite database file.
    pub database: PathBuf,
    /// Table layout.
    pub store: StoreConfig,
    /// Migration run settings.
    pub migration: MigrationConfig,
    /// What to do.
    pub command: Command,
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "rekey")]
#[command(version, about = "Run one-shot identifier migrations on a SQLite database", long_about = None)]
pub struct Args {
    /// Path to the SQLite database file.
    #[arg(short, long)]
    pub database: PathBuf,

    /// Prefix prepended to every table name.
    #[arg(long, default_value = "")]
    pub table_prefix: String,

    /// Roll a migration back if it runs longer than this many seconds (0 = no limit).
    #[arg(long, default_value_t = 0)]
    pub deadline_secs: u64,

    /// Run every step, then roll back instead of committing.
    #[arg(long)]
    pub dry_run: bool,

    /// Attempts to find an unused identifier before giving up.
    #[arg(long, default_value_t = DEFAULT_MAX_IDENTIFIER_ATTEMPTS)]
    pub max_attempts: usize,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run every pending data migration in order.
    Run {
        /// Print outcomes as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show whether each data migration has run.
    Status {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

impl Args {
    /// Convert command-line arguments to a configuration.
    pub fn into_config(self) -> CliConfig {
        let mut migration = MigrationConfig::new()
            .with_dry_run(self.dry_run)
            .with_max_identifier_attempts(self.max_attempts);
        if self.deadline_secs > 0 {
            migration = migration.with_deadline(Duration::from_secs(self.deadline_secs));
        }

        CliConfig {
            database: self.database,
            store: StoreConfig::new().with_table_prefix(self.table_prefix),
            migration,
            command: self.command,
        }
    }
}
