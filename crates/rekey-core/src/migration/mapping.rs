//! Old-to-new identifier mappings.

use std::collections::HashSet;

use super::error::MigrationError;
use crate::ident::{IdKind, IdentifierGenerator};
use crate::store::EntityRow;

/// The single physical row a remap applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTarget {
    /// Physical row id.
    pub row_id: i64,
    /// Scope of the row, if the owner table is scoped.
    pub scope: Option<String>,
}

/// One entry of an identifier mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remap {
    /// Identifier being replaced.
    pub old: String,
    /// Freshly generated replacement.
    pub new: String,
    /// Restrict to one row. `None` replaces the identifier everywhere.
    pub row: Option<RowTarget>,
}

/// Mapping from old identifiers (or duplicate rows) to fresh identifiers,
/// built once per migration run.
///
/// Every new identifier is distinct from every other new identifier and from
/// every identifier that existed when the mapping was built.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMapping {
    entries: Vec<Remap>,
}

impl IdentifierMapping {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Remap> {
        self.entries.iter()
    }

    /// Replacement for an identifier remapped everywhere.
    pub fn get(&self, old: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|remap| remap.row.is_none() && remap.old == old)
            .map(|remap| remap.new.as_str())
    }
}

/// Builds an [`IdentifierMapping`], generating identifiers that collide with
/// nothing already present or already generated.
pub struct MappingBuilder<'g> {
    generator: &'g mut dyn IdentifierGenerator,
    max_attempts: usize,
    taken: HashSet<String>,
    whole: HashSet<String>,
    rows: HashSet<i64>,
    entries: Vec<Remap>,
}

impl<'g> MappingBuilder<'g> {
    /// Builder that avoids every identifier in `existing`.
    pub fn new(
        generator: &'g mut dyn IdentifierGenerator,
        existing: impl IntoIterator<Item = String>,
        max_attempts: usize,
    ) -> Self {
        Self {
            generator,
            max_attempts: max_attempts.max(1),
            taken: existing.into_iter().collect(),
            whole: HashSet::new(),
            rows: HashSet::new(),
            entries: Vec::new(),
        }
    }

    /// Generate an identifier not yet taken.
    pub fn fresh(&mut self, kind: IdKind) -> Result<String, MigrationError> {
        for _ in 0..self.max_attempts {
            let candidate = self.generator.new_identifier(kind);
            if self.taken.insert(candidate.clone()) {
                return Ok(candidate);
            }
            tracing::debug!(kind = %kind, "generated identifier collides, regenerating");
        }
        Err(MigrationError::IdentifierSpaceExhausted {
            kind,
            attempts: self.max_attempts,
        })
    }

    /// Replace `old` everywhere. Repeated identifiers map once.
    pub fn remap_all(&mut self, old: &str, kind: IdKind) -> Result<(), MigrationError> {
        if self.whole.contains(old) {
            return Ok(());
        }
        let new = self.fresh(kind)?;
        self.whole.insert(old.to_string());
        self.entries.push(Remap {
            old: old.to_string(),
            new,
            row: None,
        });
        Ok(())
    }

    /// Replace the identifier of one row. Each row maps once.
    pub fn remap_row(&mut self, row: &EntityRow, kind: IdKind) -> Result<(), MigrationError> {
        if self.rows.contains(&row.row_id) {
            return Ok(());
        }
        let new = self.fresh(kind)?;
        self.rows.insert(row.row_id);
        self.entries.push(Remap {
            old: row.id.clone(),
            new,
            row: Some(RowTarget {
                row_id: row.row_id,
                scope: row.scope.clone(),
            }),
        });
        Ok(())
    }

    /// Finish building.
    pub fn finish(self) -> IdentifierMapping {
        IdentifierMapping {
            entries: self.entries,
        }
    }
}
