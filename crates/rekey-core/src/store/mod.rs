//! Storage collaborators consumed by the migration engine.
//!
//! The engine never builds SQL itself. It talks to a [`Store`] through a
//! narrow set of operations:
//!
//! - [`SchemaVersionSource`] reports the applied DDL version.
//! - [`SettingStore`] reads the key-value settings that hold completion flags.
//! - [`StoreTransaction`] lists rows, rewrites identifier columns and writes
//!   settings, all inside one atomic unit.
//!
//! Two backends ship with the crate: [`SqliteStore`] and the in-memory
//! [`MemoryStore`] used by tests.

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryStore, MemoryTransaction};
pub use sqlite::{SqliteStore, SqliteTransaction};

use crate::error::StoreError;
use serde::Serialize;

/// Applied DDL version as recorded by the schema migration runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchemaVersion {
    /// Highest applied version.
    pub version: u32,
    /// A DDL migration was interrupted and left the schema half-applied.
    pub dirty: bool,
}

impl SchemaVersion {
    /// A clean schema at `version`.
    pub fn clean(version: u32) -> Self {
        Self {
            version,
            dirty: false,
        }
    }
}

/// Authoritative source of the applied DDL version.
pub trait SchemaVersionSource {
    /// Current schema version, or `None` if no DDL migration was ever applied.
    fn schema_version(&self) -> Result<Option<SchemaVersion>, StoreError>;
}

/// Read side of the key-value setting store.
pub trait SettingStore {
    /// Read a setting. Absent keys are `Ok(None)`.
    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// A relational store the migration engine can open transactions on.
pub trait Store: SchemaVersionSource + SettingStore {
    /// Transaction handle. Dropping it without committing rolls back.
    type Tx<'a>: StoreTransaction
    where
        Self: 'a;

    /// Open a transaction.
    fn begin(&mut self) -> Result<Self::Tx<'_>, StoreError>;
}

/// Operations available inside a transaction.
pub trait StoreTransaction {
    /// List every row of the owner table, ordered by
    /// `(identifier, scope, physical row id)`.
    fn list_rows(&mut self, owner: &OwnerTable) -> Result<Vec<EntityRow>, StoreError>;

    /// List every value of `column` in `table`, in physical row order.
    fn list_identifiers(&mut self, table: &str, column: &str) -> Result<Vec<String>, StoreError>;

    /// Apply one column rewrite. Returns the number of rows changed.
    fn rewrite(&mut self, rewrite: &ColumnRewrite) -> Result<usize, StoreError>;

    /// Read a setting as seen by this transaction, including its own writes.
    fn get_setting(&mut self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a setting. Becomes visible only when the transaction commits.
    fn set_setting(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Commit every change made through this transaction.
    fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;

    /// Discard every change made through this transaction.
    fn rollback(self) -> Result<(), StoreError>
    where
        Self: Sized;
}

/// Table whose identifier column is being rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerTable {
    /// Table name.
    pub name: String,
    /// Identifier column.
    pub id_column: String,
    /// Column holding the entity type used to pick an identifier kind.
    pub kind_column: Option<String>,
    /// Column partitioning the identifier space (e.g. a workspace).
    pub scope_column: Option<String>,
}

impl OwnerTable {
    /// Owner table with identifier column `id`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_column: "id".to_string(),
            kind_column: None,
            scope_column: None,
        }
    }

    /// Set the identifier column.
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    /// Set the entity type column.
    pub fn with_kind_column(mut self, column: impl Into<String>) -> Self {
        self.kind_column = Some(column.into());
        self
    }

    /// Set the scope column.
    pub fn with_scope_column(mut self, column: impl Into<String>) -> Self {
        self.scope_column = Some(column.into());
        self
    }
}

/// A column in a dependent table that references the owner identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentColumn {
    /// Dependent table name.
    pub table: String,
    /// Referencing column.
    pub column: String,
    /// Column matching the owner's scope column, if the reference is scoped.
    pub scope_column: Option<String>,
}

impl DependentColumn {
    /// Unscoped reference `table.column`.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            scope_column: None,
        }
    }

    /// Reference scoped by `column` in the dependent table.
    pub fn scoped_by(mut self, column: impl Into<String>) -> Self {
        self.scope_column = Some(column.into());
        self
    }
}

/// One row of an owner table as seen by the migration engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRow {
    /// Physical row id assigned by the store.
    pub row_id: i64,
    /// Identifier value.
    pub id: String,
    /// Entity type, if the owner table has a kind column.
    pub kind: Option<String>,
    /// Scope value, if the owner table has a scope column.
    pub scope: Option<String>,
}

/// Filter restricting a rewrite to one scope value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    /// Column to match.
    pub column: String,
    /// Required value.
    pub value: String,
}

/// `UPDATE table SET column = new WHERE column = old [AND scope] [AND row]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRewrite {
    /// Table to update.
    pub table: String,
    /// Column to rewrite.
    pub column: String,
    /// Current value.
    pub old: String,
    /// Replacement value.
    pub new: String,
    /// Restrict to rows in one scope.
    pub scope: Option<ScopeFilter>,
    /// Restrict to one physical row.
    pub row_id: Option<i64>,
}

impl ColumnRewrite {
    /// Rewrite every row of `table` where `column = old`.
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        old: impl Into<String>,
        new: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            old: old.into(),
            new: new.into(),
            scope: None,
            row_id: None,
        }
    }

    /// Restrict to rows where `column = value`.
    pub fn in_scope(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.scope = Some(ScopeFilter {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Restrict to one physical row.
    pub fn at_row(mut self, row_id: i64) -> Self {
        self.row_id = Some(row_id);
        self
    }
}

/// Check that a table or column name is safe to splice into SQL.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
