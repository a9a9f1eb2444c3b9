//! Completion marker.
//!
//! One boolean setting per migration records that it has run. The flag is
//! written inside the migration's transaction, so a rollback also reverts it.

use super::error::MigrationError;
use crate::error::StoreError;
use crate::store::{SettingStore, StoreTransaction};

/// Durable "already ran" flag for one migration.
#[derive(Debug, Clone, Copy)]
pub struct CompletionMarker<'k> {
    key: &'k str,
}

impl<'k> CompletionMarker<'k> {
    /// Marker stored under `key`.
    pub fn new(key: &'k str) -> Self {
        Self { key }
    }

    /// Setting key.
    pub fn key(&self) -> &str {
        self.key
    }

    /// Whether the migration has completed.
    ///
    /// An absent setting reads as `false`. So does a malformed one, which
    /// keeps the migration eligible instead of stuck.
    pub fn is_complete<S: SettingStore + ?Sized>(&self, store: &S) -> Result<bool, MigrationError> {
        self.interpret(store.get_setting(self.key))
    }

    /// Whether the migration has completed, as seen inside `tx`.
    pub fn is_complete_in<T: StoreTransaction + ?Sized>(&self, tx: &mut T) -> Result<bool, MigrationError> {
        self.interpret(tx.get_setting(self.key))
    }

    fn interpret(&self, value: Result<Option<String>, StoreError>) -> Result<bool, MigrationError> {
        let value = value.map_err(|source| MigrationError::StateRead {
            key: self.key.to_string(),
            source,
        })?;

        let Some(value) = value else {
            return Ok(false);
        };
        match parse_bool(&value) {
            Some(done) => Ok(done),
            None => {
                tracing::warn!(key = self.key, value = %value, "malformed completion flag, treating as not completed");
                Ok(false)
            }
        }
    }

    /// Record completion inside `tx`.
    pub fn mark_complete<T: StoreTransaction + ?Sized>(&self, tx: &mut T) -> Result<(), MigrationError> {
        tx.set_setting(self.key, "true")
            .map_err(|source| MigrationError::MarkComplete {
                key: self.key.to_string(),
                source,
            })
    }
}

/// Parse a boolean setting.
///
/// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
