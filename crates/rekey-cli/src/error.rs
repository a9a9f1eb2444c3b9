//! CLI error types.

use std::path::PathBuf;

use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// The database file does not exist.
    #[error("database not found: {}", .0.display())]
    DatabaseNotFound(PathBuf),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] rekey_core::StoreError),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(#[from] rekey_core::MigrationError),

    /// JSON output error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
