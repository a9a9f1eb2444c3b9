//! Migration-specific error types.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::error::StoreError;
use crate::ident::IdKind;
use crate::store::SchemaVersion;

/// Named step of a data migration, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    /// Comparing the applied DDL version with the required one.
    CheckSchema,
    /// Reading the completion flag.
    ReadState,
    /// Opening the transaction.
    Begin,
    /// Listing owner rows to find duplicate identifiers.
    ListRows,
    /// Listing every identifier of a table.
    ListIdentifiers,
    /// Generating a fresh identifier.
    GenerateIdentifier,
    /// Rewriting the owner table's identifier column.
    RewriteOwner,
    /// Rewriting a dependent table's reference column.
    RewriteDependent,
    /// Writing the completion flag.
    MarkComplete,
    /// Committing the transaction.
    Commit,
    /// Rolling the transaction back.
    Rollback,
}

impl std::fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStep::CheckSchema => write!(f, "check_schema"),
            MigrationStep::ReadState => write!(f, "read_state"),
            MigrationStep::Begin => write!(f, "begin"),
            MigrationStep::ListRows => write!(f, "list_rows"),
            MigrationStep::ListIdentifiers => write!(f, "list_identifiers"),
            MigrationStep::GenerateIdentifier => write!(f, "generate_identifier"),
            MigrationStep::RewriteOwner => write!(f, "rewrite_owner"),
            MigrationStep::RewriteDependent => write!(f, "rewrite_dependent"),
            MigrationStep::MarkComplete => write!(f, "mark_complete"),
            MigrationStep::Commit => write!(f, "commit"),
            MigrationStep::Rollback => write!(f, "rollback"),
        }
    }
}

fn describe_version(version: &Option<SchemaVersion>) -> String {
    match version {
        None => "no recorded version".to_string(),
        Some(v) if v.dirty => format!("version {} (dirty)", v.version),
        Some(v) => format!("version {}", v.version),
    }
}

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The DDL has not reached the version the migration needs.
    #[error(
        "schema not ready for {migration}: found {}, requires version {required}",
        describe_version(.current)
    )]
    SchemaNotReady {
        /// Migration name.
        migration: String,
        /// Required DDL version.
        required: u32,
        /// Version found, if any.
        current: Option<SchemaVersion>,
    },

    /// The schema version source could not be read.
    #[error("cannot read schema version for {migration}: {source}")]
    SchemaVersionUnavailable {
        /// Migration name.
        migration: String,
        /// Underlying error.
        source: StoreError,
    },

    /// The completion flag could not be read.
    #[error("cannot get migration state {key}: {source}")]
    StateRead {
        /// Completion flag key.
        key: String,
        /// Underlying error.
        source: StoreError,
    },

    /// The transaction could not be opened.
    #[error("cannot begin {migration} transaction: {source}")]
    Begin {
        /// Migration name.
        migration: String,
        /// Underlying error.
        source: StoreError,
    },

    /// A scan or listing query failed.
    #[error("{step} failed on {table}: {source}")]
    Read {
        /// Failing step.
        step: MigrationStep,
        /// Table being read.
        table: String,
        /// Underlying error.
        source: StoreError,
    },

    /// An update query failed.
    #[error("{step} failed replacing {old} with {new} in {table}.{column}: {source}")]
    Write {
        /// Failing step.
        step: MigrationStep,
        /// Table being updated.
        table: String,
        /// Column being updated.
        column: String,
        /// Identifier being replaced.
        old: String,
        /// Replacement identifier.
        new: String,
        /// Underlying error.
        source: StoreError,
    },

    /// No unused identifier was found within the attempt budget.
    #[error("no unused {kind} identifier after {attempts} attempts")]
    IdentifierSpaceExhausted {
        /// Requested kind.
        kind: IdKind,
        /// Attempts made.
        attempts: usize,
    },

    /// The migration ran past its deadline.
    #[error("deadline of {deadline:?} exceeded before {step} (elapsed {elapsed:?})")]
    DeadlineExceeded {
        /// Step that was about to run.
        step: MigrationStep,
        /// Configured deadline.
        deadline: Duration,
        /// Time spent so far.
        elapsed: Duration,
    },

    /// The completion flag could not be written.
    #[error("cannot mark migration {key} as completed: {source}")]
    MarkComplete {
        /// Completion flag key.
        key: String,
        /// Underlying error.
        source: StoreError,
    },

    /// The commit failed after every write succeeded.
    #[error("cannot commit {migration} transaction: {source}")]
    Commit {
        /// Migration name.
        migration: String,
        /// Underlying error.
        source: StoreError,
    },

    /// A rollback with no preceding failure (a dry run) failed.
    #[error("cannot roll back {migration} transaction: {source}")]
    Rollback {
        /// Migration name.
        migration: String,
        /// Underlying error.
        source: StoreError,
    },

    /// The rollback issued for `original` failed as well.
    #[error("{original}; rollback also failed: {rollback}")]
    RolledBackWithError {
        /// Error that triggered the rollback.
        #[source]
        original: Box<MigrationError>,
        /// Rollback failure.
        rollback: StoreError,
    },
}

impl MigrationError {
    /// Step that failed.
    pub fn step(&self) -> MigrationStep {
        match self {
            MigrationError::SchemaNotReady { .. } | MigrationError::SchemaVersionUnavailable { .. } => {
                MigrationStep::CheckSchema
            }
            MigrationError::StateRead { .. } => MigrationStep::ReadState,
            MigrationError::Begin { .. } => MigrationStep::Begin,
            MigrationError::Read { step, .. } | MigrationError::Write { step, .. } => *step,
            MigrationError::IdentifierSpaceExhausted { .. } => MigrationStep::GenerateIdentifier,
            MigrationError::DeadlineExceeded { step, .. } => *step,
            MigrationError::MarkComplete { .. } => MigrationStep::MarkComplete,
            MigrationError::Commit { .. } => MigrationStep::Commit,
            MigrationError::Rollback { .. } => MigrationStep::Rollback,
            MigrationError::RolledBackWithError { original, .. } => original.step(),
        }
    }

    /// Whether running the migration again on the next start may succeed
    /// without manual intervention.
    ///
    /// Commit failures leave the store in an unknown state and a schema that
    /// is too old needs the DDL runner first, so neither is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::SchemaNotReady { .. } | MigrationError::Commit { .. } => false,
            MigrationError::RolledBackWithError { .. } => false,
            _ => true,
        }
    }
}
