//! In-memory backend.
//!
//! Transactions work on a snapshot taken at `begin` and publish it on
//! `commit`. Faults can be injected per operation, and every table access
//! made through a transaction is counted.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{
    ColumnRewrite, EntityRow, OwnerTable, SchemaVersion, SchemaVersionSource, SettingStore, Store,
    StoreTransaction,
};
use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Clone)]
struct Row {
    row_id: i64,
    values: Vec<Option<String>>,
}

impl Table {
    fn column_index(&self, table: &str, column: &str) -> Result<usize, StoreError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    }
}

#[derive(Debug, Clone, Default)]
struct Data {
    tables: BTreeMap<String, Table>,
    settings: BTreeMap<String, String>,
}

impl Data {
    fn table(&self, name: &str) -> Result<&Table, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, StoreError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
struct Faults {
    begin: bool,
    list: HashSet<String>,
    rewrite: HashSet<(String, String)>,
    setting_read: bool,
    setting_write: bool,
    commit: bool,
    rollback: bool,
}

/// In-memory relational store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Data,
    schema_version: Option<SchemaVersion>,
    next_row_id: i64,
    faults: Faults,
    table_queries: HashMap<String, usize>,
}

impl MemoryStore {
    /// Create an empty store with an empty settings table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reported schema version.
    pub fn set_schema_version(&mut self, version: Option<SchemaVersion>) -> &mut Self {
        self.schema_version = version;
        self
    }

    /// Create a table with the given columns.
    pub fn create_table(&mut self, name: &str, columns: &[&str]) -> &mut Self {
        self.data.tables.insert(
            name.to_string(),
            Table {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
        self
    }

    /// Insert a row. Columns not listed are NULL. Returns the physical row id.
    pub fn insert(&mut self, table: &str, values: &[(&str, &str)]) -> Result<i64, StoreError> {
        let target = self.data.table_mut(table)?;
        let mut row = vec![None; target.columns.len()];
        for (column, value) in values {
            let idx = target.column_index(table, column)?;
            row[idx] = Some(value.to_string());
        }

        self.next_row_id += 1;
        target.rows.push(Row {
            row_id: self.next_row_id,
            values: row,
        });
        Ok(self.next_row_id)
    }

    /// Values of one column, in physical row order.
    pub fn column(&self, table: &str, column: &str) -> Result<Vec<Option<String>>, StoreError> {
        let target = self.data.table(table)?;
        let idx = target.column_index(table, column)?;
        Ok(target.rows.iter().map(|row| row.values[idx].clone()).collect())
    }

    /// Value of one column for one physical row.
    pub fn value(&self, table: &str, row_id: i64, column: &str) -> Result<Option<String>, StoreError> {
        let target = self.data.table(table)?;
        let idx = target.column_index(table, column)?;
        target
            .rows
            .iter()
            .find(|row| row.row_id == row_id)
            .map(|row| row.values[idx].clone())
            .ok_or_else(|| StoreError::InvalidData(format!("no row {row_id} in {table}")))
    }

    /// Write a setting outside any transaction.
    pub fn put_setting(&mut self, key: &str, value: &str) -> &mut Self {
        self.data.settings.insert(key.to_string(), value.to_string());
        self
    }

    /// Fail the next and every later `begin`.
    pub fn fail_on_begin(&mut self) -> &mut Self {
        self.faults.begin = true;
        self
    }

    /// Fail listing rows or identifiers of `table`.
    pub fn fail_on_list(&mut self, table: &str) -> &mut Self {
        self.faults.list.insert(table.to_string());
        self
    }

    /// Fail rewriting `table.column`.
    pub fn fail_on_rewrite(&mut self, table: &str, column: &str) -> &mut Self {
        self.faults
            .rewrite
            .insert((table.to_string(), column.to_string()));
        self
    }

    /// Fail reading settings.
    pub fn fail_on_setting_read(&mut self) -> &mut Self {
        self.faults.setting_read = true;
        self
    }

    /// Fail writing settings inside a transaction.
    pub fn fail_on_setting_write(&mut self) -> &mut Self {
        self.faults.setting_write = true;
        self
    }

    /// Fail committing. Changes are discarded.
    pub fn fail_on_commit(&mut self) -> &mut Self {
        self.faults.commit = true;
        self
    }

    /// Fail rolling back. Changes are still discarded.
    pub fn fail_on_rollback(&mut self) -> &mut Self {
        self.faults.rollback = true;
        self
    }

    /// Remove every injected fault.
    pub fn clear_faults(&mut self) -> &mut Self {
        self.faults = Faults::default();
        self
    }

    /// Number of list and rewrite operations issued against `table`.
    pub fn table_queries(&self, table: &str) -> usize {
        self.table_queries.get(table).copied().unwrap_or(0)
    }

    /// Number of list and rewrite operations issued against any table.
    pub fn total_table_queries(&self) -> usize {
        self.table_queries.values().sum()
    }
}

impl SchemaVersionSource for MemoryStore {
    fn schema_version(&self) -> Result<Option<SchemaVersion>, StoreError> {
        Ok(self.schema_version)
    }
}

impl SettingStore for MemoryStore {
    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.faults.setting_read {
            return Err(StoreError::Injected(format!("read setting {key}")));
        }
        Ok(self.data.settings.get(key).cloned())
    }
}

impl Store for MemoryStore {
    type Tx<'a> = MemoryTransaction<'a>;

    fn begin(&mut self) -> Result<MemoryTransaction<'_>, StoreError> {
        if self.faults.begin {
            return Err(StoreError::Injected("begin".to_string()));
        }
        let working = self.data.clone();
        Ok(MemoryTransaction {
            store: self,
            working,
        })
    }
}

/// Snapshot transaction over a [`MemoryStore`].
pub struct MemoryTransaction<'a> {
    store: &'a mut MemoryStore,
    working: Data,
}

impl MemoryTransaction<'_> {
    fn touch(&mut self, table: &str) {
        *self.store.table_queries.entry(table.to_string()).or_insert(0) += 1;
    }

    fn check_list(&self, table: &str) -> Result<(), StoreError> {
        if self.store.faults.list.contains(table) {
            return Err(StoreError::Injected(format!("list {table}")));
        }
        Ok(())
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn list_rows(&mut self, owner: &OwnerTable) -> Result<Vec<EntityRow>, StoreError> {
        self.touch(&owner.name);
        self.check_list(&owner.name)?;

        let table = self.working.table(&owner.name)?;
        let id = table.column_index(&owner.name, &owner.id_column)?;
        let kind = owner
            .kind_column
            .as_deref()
            .map(|c| table.column_index(&owner.name, c))
            .transpose()?;
        let scope = owner
            .scope_column
            .as_deref()
            .map(|c| table.column_index(&owner.name, c))
            .transpose()?;

        let mut rows: Vec<EntityRow> = table
            .rows
            .iter()
            .filter_map(|row| {
                let value = row.values[id].clone()?;
                Some(EntityRow {
                    row_id: row.row_id,
                    id: value,
                    kind: kind.and_then(|k| row.values[k].clone()),
                    scope: scope.and_then(|s| row.values[s].clone()),
                })
            })
            .collect();
        rows.sort_by(|a, b| (&a.id, &a.scope, a.row_id).cmp(&(&b.id, &b.scope, b.row_id)));
        Ok(rows)
    }

    fn list_identifiers(&mut self, table: &str, column: &str) -> Result<Vec<String>, StoreError> {
        self.touch(table);
        self.check_list(table)?;

        let target = self.working.table(table)?;
        let idx = target.column_index(table, column)?;
        Ok(target
            .rows
            .iter()
            .filter_map(|row| row.values[idx].clone())
            .collect())
    }

    fn rewrite(&mut self, rewrite: &ColumnRewrite) -> Result<usize, StoreError> {
        self.touch(&rewrite.table);
        if self
            .store
            .faults
            .rewrite
            .contains(&(rewrite.table.clone(), rewrite.column.clone()))
        {
            return Err(StoreError::Injected(format!(
                "rewrite {}.{}",
                rewrite.table, rewrite.column
            )));
        }

        let table_name = rewrite.table.as_str();
        let target = self.working.table_mut(table_name)?;
        let idx = target.column_index(table_name, &rewrite.column)?;
        let scope = rewrite
            .scope
            .as_ref()
            .map(|filter| Ok::<_, StoreError>((target.column_index(table_name, &filter.column)?, &filter.value)))
            .transpose()?;

        let mut changed = 0;
        for row in target.rows.iter_mut() {
            if row.values[idx].as_deref() != Some(rewrite.old.as_str()) {
                continue;
            }
            if let Some((scope_idx, value)) = scope {
                if row.values[scope_idx].as_deref() != Some(value.as_str()) {
                    continue;
                }
            }
            if rewrite.row_id.is_some_and(|id| id != row.row_id) {
                continue;
            }
            row.values[idx] = Some(rewrite.new.clone());
            changed += 1;
        }
        Ok(changed)
    }

    fn get_setting(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        if self.store.faults.setting_read {
            return Err(StoreError::Injected(format!("read setting {key}")));
        }
        Ok(self.working.settings.get(key).cloned())
    }

    fn set_setting(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.store.faults.setting_write {
            return Err(StoreError::Injected(format!("write setting {key}")));
        }
        self.working
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        if self.store.faults.commit {
            return Err(StoreError::Injected("commit".to_string()));
        }
        self.store.data = self.working;
        Ok(())
    }

    fn rollback(self) -> Result<(), StoreError> {
        if self.store.faults.rollback {
            return Err(StoreError::Injected("rollback".to_string()));
        }
        Ok(())
    }
}
