//! Rekey - runs the built-in identifier migrations against a SQLite database.

mod commands;
mod config;
mod error;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Args;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rekey=info,rekey_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.into_config();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        database = %config.database.display(),
        table_prefix = %config.store.table_prefix,
        dry_run = config.migration.dry_run,
        "configuration loaded"
    );

    let mut stdout = std::io::stdout().lock();
    if let Err(err) = commands::execute(&config, &mut stdout) {
        tracing::error!(error = %err, "rekey failed");
        return Err(err.into());
    }
    Ok(())
}
