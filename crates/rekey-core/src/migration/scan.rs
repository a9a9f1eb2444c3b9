//! Identifier scans: duplicate groups and full listings.

use std::collections::{BTreeMap, HashSet};

use super::error::{MigrationError, MigrationStep};
use crate::store::{EntityRow, OwnerTable, StoreTransaction};

/// Rows sharing one identifier, in listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// Shared identifier.
    pub id: String,
    /// Rows holding it. Always at least two.
    pub rows: Vec<EntityRow>,
}

impl DuplicateGroup {
    /// The row that keeps the identifier: the first in listing order.
    pub fn keeper(&self) -> &EntityRow {
        &self.rows[0]
    }

    /// Rows that receive a fresh identifier.
    pub fn renamed(&self) -> &[EntityRow] {
        &self.rows[1..]
    }
}

/// Result of a duplicate scan.
#[derive(Debug, Clone, Default)]
pub struct DuplicateScan {
    /// Groups of size > 1, ordered by identifier.
    pub groups: Vec<DuplicateGroup>,
    /// Every identifier present in the owner table.
    pub existing: HashSet<String>,
    /// Rows scanned.
    pub row_count: usize,
}

impl DuplicateScan {
    /// Number of rows that will receive a new identifier.
    pub fn rows_to_rename(&self) -> usize {
        self.groups.iter().map(|group| group.rows.len() - 1).sum()
    }
}

/// Finds rows of an owner table that share an identifier.
///
/// Rows are listed ordered by `(identifier, scope, physical row id)`, so the
/// row that keeps a shared identifier is the one with the smallest scope
/// value, then the oldest physical row.
pub struct DuplicateScanner<'o> {
    owner: &'o OwnerTable,
}

impl<'o> DuplicateScanner<'o> {
    /// Scanner over `owner`.
    pub fn new(owner: &'o OwnerTable) -> Self {
        Self { owner }
    }

    /// List every row and group by identifier, keeping groups larger than one.
    pub fn scan<T: StoreTransaction + ?Sized>(&self, tx: &mut T) -> Result<DuplicateScan, MigrationError> {
        let rows = tx
            .list_rows(self.owner)
            .map_err(|source| MigrationError::Read {
                step: MigrationStep::ListRows,
                table: self.owner.name.clone(),
                source,
            })?;

        let row_count = rows.len();
        let mut by_id: BTreeMap<String, Vec<EntityRow>> = BTreeMap::new();
        for row in rows {
            by_id.entry(row.id.clone()).or_default().push(row);
        }

        let existing = by_id.keys().cloned().collect();
        let groups = by_id
            .into_iter()
            .filter(|(_, rows)| rows.len() > 1)
            .map(|(id, rows)| DuplicateGroup { id, rows })
            .collect();

        Ok(DuplicateScan {
            groups,
            existing,
            row_count,
        })
    }
}

/// Lists every identifier of one table column.
pub struct TableIdentifierLister<'a> {
    table: &'a str,
    column: &'a str,
}

impl<'a> TableIdentifierLister<'a> {
    /// Lister over `table.column`.
    pub fn new(table: &'a str, column: &'a str) -> Self {
        Self { table, column }
    }

    /// Every identifier, in physical row order. A failed query is an error,
    /// never an empty listing.
    pub fn list<T: StoreTransaction + ?Sized>(&self, tx: &mut T) -> Result<Vec<String>, MigrationError> {
        tx.list_identifiers(self.table, self.column)
            .map_err(|source| MigrationError::Read {
                step: MigrationStep::ListIdentifiers,
                table: self.table.to_string(),
                source,
            })
    }
}
