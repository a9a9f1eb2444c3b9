//! Identity remapper: applies an identifier mapping to an owner table and
//! every column that references it.

use std::collections::BTreeMap;

use serde::Serialize;

use super::context::Deadline;
use super::error::{MigrationError, MigrationStep};
use super::mapping::{IdentifierMapping, Remap};
use crate::error::StoreError;
use crate::store::{ColumnRewrite, DependentColumn, OwnerTable, StoreTransaction};

/// Rows changed by a remap, per `table.column`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteStats {
    /// Mapping entries applied.
    pub remapped: usize,
    /// Rows changed, keyed by `table.column`.
    pub rows: BTreeMap<String, usize>,
}

impl RewriteStats {
    /// Total rows changed across every column.
    pub fn total_rows(&self) -> usize {
        self.rows.values().sum()
    }

    /// Fold another set of counters into this one.
    pub fn merge(&mut self, other: RewriteStats) {
        self.remapped += other.remapped;
        for (column, count) in other.rows {
            *self.rows.entry(column).or_insert(0) += count;
        }
    }

    fn record(&mut self, table: &str, column: &str, count: usize) {
        *self.rows.entry(format!("{table}.{column}")).or_insert(0) += count;
    }
}

/// Rewrites the owner's identifier column and every listed dependent column
/// for each entry of a mapping.
///
/// Both the owner rewrite and the dependent rewrites of an entry run inside
/// the caller's transaction; nothing here commits. Entries targeting a single
/// duplicate row follow into dependents only through a shared scope column,
/// since an unscoped reference to a duplicated identifier cannot tell the
/// rows apart and keeps pointing at the row that retained it.
pub struct IdentityRemapper<'a> {
    owner: &'a OwnerTable,
    dependents: &'a [DependentColumn],
    deadline: Option<&'a Deadline>,
}

impl<'a> IdentityRemapper<'a> {
    /// Remapper for `owner` and its dependents.
    pub fn new(owner: &'a OwnerTable, dependents: &'a [DependentColumn]) -> Self {
        Self {
            owner,
            dependents,
            deadline: None,
        }
    }

    /// Abort with [`MigrationError::DeadlineExceeded`] once `deadline` passes.
    pub fn with_deadline(mut self, deadline: &'a Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Apply every entry of `mapping`.
    pub fn apply<T: StoreTransaction + ?Sized>(
        &self,
        tx: &mut T,
        mapping: &IdentifierMapping,
    ) -> Result<RewriteStats, MigrationError> {
        let mut stats = RewriteStats::default();

        for remap in mapping.iter() {
            if let Some(deadline) = self.deadline {
                deadline.check(MigrationStep::RewriteOwner)?;
            }

            let changed = self.rewrite_owner(tx, remap)?;
            stats.record(&self.owner.name, &self.owner.id_column, changed);

            for dependent in self.dependents {
                let Some(rewrite) = dependent_rewrite(dependent, remap) else {
                    continue;
                };
                let changed = tx.rewrite(&rewrite).map_err(|source| {
                    write_error(MigrationStep::RewriteDependent, &rewrite, source)
                })?;
                stats.record(&dependent.table, &dependent.column, changed);
            }

            stats.remapped += 1;
        }

        Ok(stats)
    }

    fn rewrite_owner<T: StoreTransaction + ?Sized>(
        &self,
        tx: &mut T,
        remap: &Remap,
    ) -> Result<usize, MigrationError> {
        let mut rewrite = ColumnRewrite::new(
            &self.owner.name,
            &self.owner.id_column,
            &remap.old,
            &remap.new,
        );
        if let Some(target) = &remap.row {
            rewrite = rewrite.at_row(target.row_id);
        }

        let changed = tx
            .rewrite(&rewrite)
            .map_err(|source| write_error(MigrationStep::RewriteOwner, &rewrite, source))?;

        if changed == 0 {
            // The identifier was listed inside this transaction, so it must
            // still be there.
            let source = StoreError::InvalidData(format!(
                "no row of {} holds {}",
                self.owner.name, remap.old
            ));
            return Err(write_error(MigrationStep::RewriteOwner, &rewrite, source));
        }
        Ok(changed)
    }
}

fn dependent_rewrite(dependent: &DependentColumn, remap: &Remap) -> Option<ColumnRewrite> {
    let rewrite = ColumnRewrite::new(&dependent.table, &dependent.column, &remap.old, &remap.new);
    match &remap.row {
        None => Some(rewrite),
        Some(target) => match (&dependent.scope_column, &target.scope) {
            (Some(column), Some(scope)) => Some(rewrite.in_scope(column, scope)),
            _ => None,
        },
    }
}

fn write_error(step: MigrationStep, rewrite: &ColumnRewrite, source: StoreError) -> MigrationError {
    tracing::error!(
        step = %step,
        table = %rewrite.table,
        column = %rewrite.column,
        old = %rewrite.old,
        new = %rewrite.new,
        error = %source,
        "identifier rewrite failed"
    );
    MigrationError::Write {
        step,
        table: rewrite.table.clone(),
        column: rewrite.column.clone(),
        old: rewrite.old.clone(),
        new: rewrite.new.clone(),
        source,
    }
}
