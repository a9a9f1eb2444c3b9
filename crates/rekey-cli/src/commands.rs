//! Subcommand implementations.

use std::io::Write;

use rekey_core::{builtin_migrations, MigrationOrchestrator, SqliteStore};

use crate::config::{CliConfig, Command};
use crate::error::CliError;

/// Execute the configured subcommand, writing its report to `out`.
pub fn execute(config: &CliConfig, out: &mut impl Write) -> Result<(), CliError> {
    if !config.database.exists() {
        return Err(CliError::DatabaseNotFound(config.database.clone()));
    }
    let store = SqliteStore::open(&config.database, config.store.clone())?;
    let mut orchestrator = MigrationOrchestrator::new(store, config.migration.clone());

    match config.command {
        Command::Run { json } => run(&mut orchestrator, json, out),
        Command::Status { json } => status(&orchestrator, json, out),
    }
}

fn run(
    orchestrator: &mut MigrationOrchestrator<SqliteStore>,
    json: bool,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let outcomes = orchestrator.run_all(&builtin_migrations())?;

    if json {
        serde_json::to_writer_pretty(&mut *out, &outcomes)?;
        writeln!(out)?;
        return Ok(());
    }

    for outcome in &outcomes {
        write!(out, "{}: {}", outcome.migration, outcome.state)?;
        if outcome.rewrote_anything() {
            write!(
                out,
                " ({} identifiers, {} rows)",
                outcome.stats.remapped,
                outcome.stats.total_rows()
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn status(
    orchestrator: &MigrationOrchestrator<SqliteStore>,
    json: bool,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let reports = builtin_migrations()
        .iter()
        .map(|migration| orchestrator.status(migration.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    if json {
        serde_json::to_writer_pretty(&mut *out, &reports)?;
        writeln!(out)?;
        return Ok(());
    }

    for report in &reports {
        let state = if report.completed {
            "completed"
        } else if report.schema_ready {
            "pending"
        } else {
            "waiting for schema"
        };
        let found = report
            .schema_version
            .map(|v| v.version.to_string())
            .unwrap_or_else(|| "none".to_string());
        writeln!(
            out,
            "{:<14} {:<20} schema {}/{}  key {}",
            report.migration, state, found, report.required_schema_version, report.completion_key
        )?;
    }
    Ok(())
}
