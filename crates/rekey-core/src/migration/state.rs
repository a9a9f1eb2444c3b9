//! Orchestrator state machine and run reports.

use serde::Serialize;

use super::remap::RewriteStats;
use crate::store::SchemaVersion;

/// State of one migration within a single process invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Nothing checked yet.
    NotStarted,
    /// The schema gate passed.
    GateChecked,
    /// The completion flag was already set. Nothing was touched.
    AlreadyDone,
    /// The transaction is open and data is being rewritten.
    InProgress,
    /// Every rewrite and the completion flag were committed.
    Committed,
    /// A step failed and the transaction was rolled back.
    RolledBack,
    /// Dry run finished and its changes were rolled back.
    Discarded,
}

impl MigrationState {
    /// Terminal states are never left by the same invocation.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MigrationState::AlreadyDone
                | MigrationState::Committed
                | MigrationState::RolledBack
                | MigrationState::Discarded
        )
    }

    /// Whether `next` directly follows `self`.
    pub fn can_transition_to(self, next: MigrationState) -> bool {
        use MigrationState::*;
        matches!(
            (self, next),
            (NotStarted, GateChecked)
                | (GateChecked, AlreadyDone)
                | (GateChecked, InProgress)
                | (InProgress, Committed)
                | (InProgress, RolledBack)
                | (InProgress, Discarded)
        )
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationState::NotStarted => write!(f, "not_started"),
            MigrationState::GateChecked => write!(f, "gate_checked"),
            MigrationState::AlreadyDone => write!(f, "already_done"),
            MigrationState::InProgress => write!(f, "in_progress"),
            MigrationState::Committed => write!(f, "committed"),
            MigrationState::RolledBack => write!(f, "rolled_back"),
            MigrationState::Discarded => write!(f, "discarded"),
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    /// Migration name.
    pub migration: String,
    /// Terminal state reached.
    pub state: MigrationState,
    /// Whether the run was a dry run.
    pub dry_run: bool,
    /// Rewrite counters. Empty for `AlreadyDone`.
    pub stats: RewriteStats,
}

impl MigrationOutcome {
    /// Outcome of a run that found the flag already set.
    pub fn already_done(migration: impl Into<String>) -> Self {
        Self {
            migration: migration.into(),
            state: MigrationState::AlreadyDone,
            dry_run: false,
            stats: RewriteStats::default(),
        }
    }

    /// Whether any row was (or in a dry run, would have been) rewritten.
    pub fn rewrote_anything(&self) -> bool {
        self.stats.total_rows() > 0
    }
}

/// Read-only view of whether a migration has run or could run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatusReport {
    /// Migration name.
    pub migration: String,
    /// Setting key holding the completion flag.
    pub completion_key: String,
    /// DDL version the migration needs.
    pub required_schema_version: u32,
    /// DDL version found.
    pub schema_version: Option<SchemaVersion>,
    /// Whether the schema gate would pass.
    pub schema_ready: bool,
    /// Whether the completion flag is set.
    pub completed: bool,
}

impl MigrationStatusReport {
    /// Whether the next run would rewrite data.
    pub fn is_pending(&self) -> bool {
        self.schema_ready && !self.completed
    }
}
