//! Migration and store configuration.

use std::time::Duration;

/// Default number of attempts to find an unused identifier.
pub const DEFAULT_MAX_IDENTIFIER_ATTEMPTS: usize = 8;

/// Default name of the key-value settings table.
pub const DEFAULT_SETTINGS_TABLE: &str = "system_settings";

/// Default name of the DDL version table.
pub const DEFAULT_SCHEMA_TABLE: &str = "schema_migrations";

/// Migration orchestrator configuration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Maximum wall time for one migration. Checked before every step;
    /// exceeding it rolls the transaction back.
    pub deadline: Option<Duration>,
    /// Attempts per identifier before giving up on a fresh value.
    pub max_identifier_attempts: usize,
    /// Run every read and generation step, then roll back instead of committing.
    pub dry_run: bool,
}

impl MigrationConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            deadline: None,
            max_identifier_attempts: DEFAULT_MAX_IDENTIFIER_ATTEMPTS,
            dry_run: false,
        }
    }

    /// Set the migration deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the number of identifier generation attempts.
    pub fn with_max_identifier_attempts(mut self, attempts: usize) -> Self {
        self.max_identifier_attempts = attempts.max(1);
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Layout of the relational store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Prefix applied to every table name.
    pub table_prefix: String,
    /// Table holding `(id, value)` settings, before prefixing.
    pub settings_table: String,
    /// Table holding `(version, dirty)` DDL state, before prefixing.
    pub schema_table: String,
}

impl StoreConfig {
    /// Create a configuration with default table names.
    pub fn new() -> Self {
        Self {
            table_prefix: String::new(),
            settings_table: DEFAULT_SETTINGS_TABLE.to_string(),
            schema_table: DEFAULT_SCHEMA_TABLE.to_string(),
        }
    }

    /// Set the table prefix.
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Set the settings table name.
    pub fn with_settings_table(mut self, table: impl Into<String>) -> Self {
        self.settings_table = table.into();
        self
    }

    /// Set the DDL version table name.
    pub fn with_schema_table(mut self, table: impl Into<String>) -> Self {
        self.schema_table = table.into();
        self
    }

    /// Resolve a logical table name to its stored name.
    pub fn table(&self, name: &str) -> String {
        format!("{}{}", self.table_prefix, name)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
