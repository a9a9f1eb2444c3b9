//! Rekey Core - one-shot identifier rewriting migrations.
//!
//! This crate rewrites primary-key identifiers across related relational
//! tables while preserving referential integrity. Each migration runs inside
//! a single transaction and is guarded by a persisted completion flag, so it
//! executes at most once per database.

pub mod config;
pub mod error;
pub mod ident;
pub mod migration;
pub mod store;

pub use config::{MigrationConfig, StoreConfig};
pub use error::StoreError;
pub use ident::{new_identifier, IdKind, IdentifierGenerator, RandomIdentifiers};
pub use migration::{
    builtin_migrations, DataMigration, MigrationError, MigrationOrchestrator, MigrationOutcome,
    MigrationState, MigrationStatusReport,
};
pub use store::{
    ColumnRewrite, DependentColumn, EntityRow, MemoryStore, OwnerTable, SchemaVersion,
    SchemaVersionSource, SettingStore, SqliteStore, Store, StoreTransaction,
};
