//! Schema version gate.

use super::error::MigrationError;
use crate::store::{SchemaVersion, SchemaVersionSource};

/// Blocks a data migration until the DDL has reached the version it reads
/// and writes against.
pub struct SchemaVersionGate<'a, S: ?Sized> {
    source: &'a S,
}

impl<'a, S: SchemaVersionSource + ?Sized> SchemaVersionGate<'a, S> {
    /// Create a gate over a schema version source.
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Succeed if the applied schema is clean and at least `required`.
    ///
    /// Never writes and never retries.
    pub fn ensure_applied_up_to(
        &self,
        migration: &str,
        required: u32,
    ) -> Result<SchemaVersion, MigrationError> {
        let current = self
            .source
            .schema_version()
            .map_err(|source| MigrationError::SchemaVersionUnavailable {
                migration: migration.to_string(),
                source,
            })?;

        match current {
            Some(version) if !version.dirty && version.version >= required => Ok(version),
            _ => Err(MigrationError::SchemaNotReady {
                migration: migration.to_string(),
                required,
                current,
            }),
        }
    }

    /// Whether the schema satisfies `required`, without building an error.
    pub fn is_ready(&self, required: u32) -> Result<bool, MigrationError> {
        match self.ensure_applied_up_to("", required) {
            Ok(_) => Ok(true),
            Err(MigrationError::SchemaNotReady { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
