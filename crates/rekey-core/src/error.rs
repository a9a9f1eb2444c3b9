//! Core error types.

use thiserror::Error;

/// Errors raised by the storage collaborators (schema version source,
/// setting store, and table access).
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A table or column name that cannot be spliced into SQL.
    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Table does not exist.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Column does not exist on the table.
    #[error("unknown column {table}.{column}")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// Failure injected by the in-memory store.
    #[error("injected failure: {0}")]
    Injected(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),
}
