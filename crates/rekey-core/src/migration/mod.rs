//! Data migration engine.
//!
//! Rewrites primary-key identifiers across related tables exactly once per
//! database:
//! - [`SchemaVersionGate`] waits for the DDL the migration depends on
//! - [`CompletionMarker`] records that a migration has run
//! - [`DuplicateScanner`] and [`TableIdentifierLister`] find what to rewrite
//! - [`MappingBuilder`] pairs each old identifier with a fresh one
//! - [`IdentityRemapper`] applies a mapping to an owner table and its dependents
//! - [`MigrationOrchestrator`] runs all of it inside one transaction
//!
//! # Example
//!
//! ```ignore
//! use rekey_core::migration::{builtin_migrations, MigrationOrchestrator};
//! use rekey_core::{MigrationConfig, SqliteStore, StoreConfig};
//!
//! let store = SqliteStore::open("app.db", StoreConfig::default())?;
//! let mut orchestrator = MigrationOrchestrator::new(store, MigrationConfig::default());
//!
//! for outcome in orchestrator.run_all(&builtin_migrations())? {
//!     println!("{}: {}", outcome.migration, outcome.state);
//! }
//! ```

pub mod builtin;
pub mod context;
pub mod error;
pub mod gate;
pub mod mapping;
pub mod marker;
pub mod orchestrator;
pub mod remap;
pub mod scan;
pub mod state;

// Re-export main types

// Built-in migrations
pub use builtin::{
    builtin_migrations, DeduplicateIdentifiers, ReplaceIdentifiers, ReplacePass,
    CATEGORY_UUID_ID_MIGRATION_KEY, UNIQUE_IDS_MIGRATION_KEY,
};

// Execution types
pub use context::{DataMigration, Deadline, MigrationContext};
pub use orchestrator::MigrationOrchestrator;
pub use state::{MigrationOutcome, MigrationState, MigrationStatusReport};

// Error types
pub use error::{MigrationError, MigrationStep};

// Components
pub use gate::SchemaVersionGate;
pub use mapping::{IdentifierMapping, MappingBuilder, Remap, RowTarget};
pub use marker::{parse_bool, CompletionMarker};
pub use remap::{IdentityRemapper, RewriteStats};
pub use scan::{DuplicateGroup, DuplicateScan, DuplicateScanner, TableIdentifierLister};
