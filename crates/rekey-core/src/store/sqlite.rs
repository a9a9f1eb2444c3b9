//! SQLite backend.
//!
//! Settings live in `{prefix}system_settings(id TEXT PRIMARY KEY, value TEXT)`
//! and the DDL state in `{prefix}schema_migrations(version, dirty)`, the
//! layout written by the schema migration runner. Neither table is created
//! here; both belong to the DDL.

use std::path::Path;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};

use super::{
    validate_identifier, ColumnRewrite, EntityRow, OwnerTable, SchemaVersion, SchemaVersionSource,
    SettingStore, Store, StoreTransaction,
};
use crate::config::StoreConfig;
use crate::error::StoreError;

/// Store backed by a SQLite connection.
pub struct SqliteStore {
    conn: Connection,
    config: StoreConfig,
}

impl SqliteStore {
    /// Open a database file.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self::from_connection(conn, config))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(config: StoreConfig) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn, config))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection, config: StoreConfig) -> Self {
        Self { conn, config }
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Store layout.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl SchemaVersionSource for SqliteStore {
    fn schema_version(&self) -> Result<Option<SchemaVersion>, StoreError> {
        let table = resolve(&self.config, &self.config.schema_table)?;
        if !self.table_exists(&table)? {
            return Ok(None);
        }

        let row: Option<(i64, bool)> = self
            .conn
            .query_row(
                &format!("SELECT version, dirty FROM {table} ORDER BY version DESC LIMIT 1"),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        // The migration runner records "no version" as -1.
        row.filter(|(version, _)| *version >= 0)
            .map(|(version, dirty)| {
                let version = u32::try_from(version).map_err(|_| {
                    StoreError::InvalidData(format!("schema version {version} out of range"))
                })?;
                Ok(SchemaVersion { version, dirty })
            })
            .transpose()
    }
}

impl SettingStore for SqliteStore {
    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        read_setting(&self.conn, &self.config, key)
    }
}

impl Store for SqliteStore {
    type Tx<'a> = SqliteTransaction<'a>;

    fn begin(&mut self) -> Result<SqliteTransaction<'_>, StoreError> {
        // Take the write lock up front so the duplicate scan and the rewrite
        // see the same data.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqliteTransaction {
            tx,
            config: &self.config,
        })
    }
}

/// Open SQLite transaction. Rolls back on drop unless committed.
pub struct SqliteTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
    config: &'a StoreConfig,
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn list_rows(&mut self, owner: &OwnerTable) -> Result<Vec<EntityRow>, StoreError> {
        let table = resolve(self.config, &owner.name)?;
        let id = column(&owner.id_column)?;
        let kind = owner.kind_column.as_deref().map(column).transpose()?;
        let scope = owner.scope_column.as_deref().map(column).transpose()?;

        let order = match scope {
            Some(scope) => format!("{id}, {scope}, rowid"),
            None => format!("{id}, rowid"),
        };
        let sql = format!(
            "SELECT rowid, {id}, {kind}, {scope} FROM {table} WHERE {id} IS NOT NULL ORDER BY {order}",
            kind = kind.unwrap_or("NULL"),
            scope = scope.unwrap_or("NULL"),
        );

        let mut stmt = self.tx.prepare_cached(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EntityRow {
                    row_id: row.get(0)?,
                    id: row.get(1)?,
                    kind: row.get(2)?,
                    scope: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_identifiers(&mut self, table: &str, id_column: &str) -> Result<Vec<String>, StoreError> {
        let table = resolve(self.config, table)?;
        let id = column(id_column)?;
        let sql = format!("SELECT {id} FROM {table} WHERE {id} IS NOT NULL ORDER BY rowid");

        let mut stmt = self.tx.prepare_cached(&sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn rewrite(&mut self, rewrite: &ColumnRewrite) -> Result<usize, StoreError> {
        let table = resolve(self.config, &rewrite.table)?;
        let target = column(&rewrite.column)?;

        let mut sql = format!("UPDATE {table} SET {target} = ?1 WHERE {target} = ?2");
        let mut values = vec![
            Value::Text(rewrite.new.clone()),
            Value::Text(rewrite.old.clone()),
        ];
        if let Some(scope) = &rewrite.scope {
            sql.push_str(&format!(" AND {} = ?{}", column(&scope.column)?, values.len() + 1));
            values.push(Value::Text(scope.value.clone()));
        }
        if let Some(row_id) = rewrite.row_id {
            sql.push_str(&format!(" AND rowid = ?{}", values.len() + 1));
            values.push(Value::Integer(row_id));
        }

        let mut stmt = self.tx.prepare_cached(&sql)?;
        let changed = stmt.execute(params_from_iter(values))?;
        tracing::trace!(table = %table, column = %target, changed, "rewrote identifier column");
        Ok(changed)
    }

    fn get_setting(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        read_setting(&self.tx, self.config, key)
    }

    fn set_setting(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let table = resolve(self.config, &self.config.settings_table)?;
        self.tx.execute(
            &format!(
                "INSERT INTO {table} (id, value) VALUES (?1, ?2) \
                 ON CONFLICT(id) DO UPDATE SET value = excluded.value"
            ),
            params![key, value],
        )?;
        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }

    fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn read_setting(
    conn: &Connection,
    config: &StoreConfig,
    key: &str,
) -> Result<Option<String>, StoreError> {
    let table = resolve(config, &config.settings_table)?;
    let value = conn
        .query_row(
            &format!("SELECT value FROM {table} WHERE id = ?1"),
            params![key],
            |row| Ok(setting_text(row.get_ref(0)?)),
        )
        .optional()?;
    Ok(value.flatten())
}

// Settings are untyped; whatever is stored is handed to the caller as text
// so a bad value parses as malformed instead of failing the read.
fn setting_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn resolve(config: &StoreConfig, table: &str) -> Result<String, StoreError> {
    let name = config.table(table);
    validate_identifier(&name)?;
    Ok(name)
}

fn column(name: &str) -> Result<&str, StoreError> {
    validate_identifier(name)?;
    Ok(name)
}
