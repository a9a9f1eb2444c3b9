//! Execution context handed to each data migration.

use std::time::{Duration, Instant};

use super::error::{MigrationError, MigrationStep};
use super::mapping::{IdentifierMapping, MappingBuilder};
use super::remap::{IdentityRemapper, RewriteStats};
use super::scan::{DuplicateScan, DuplicateScanner, TableIdentifierLister};
use crate::config::MigrationConfig;
use crate::ident::IdentifierGenerator;
use crate::store::{DependentColumn, OwnerTable, StoreTransaction};

/// Wall-clock budget for one migration run.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    /// Start the clock. `None` never expires.
    pub fn start(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// Time spent since the clock started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fail with [`MigrationError::DeadlineExceeded`] once the budget is spent.
    pub fn check(&self, step: MigrationStep) -> Result<(), MigrationError> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        let elapsed = self.elapsed();
        if elapsed >= limit {
            return Err(MigrationError::DeadlineExceeded {
                step,
                deadline: limit,
                elapsed,
            });
        }
        Ok(())
    }
}

/// Everything a [`DataMigration`] may touch while it runs: the open
/// transaction, the identifier generator, the run configuration and the
/// deadline.
pub struct MigrationContext<'a> {
    tx: &'a mut dyn StoreTransaction,
    generator: &'a mut dyn IdentifierGenerator,
    config: &'a MigrationConfig,
    deadline: Deadline,
    stats: RewriteStats,
}

impl<'a> MigrationContext<'a> {
    /// Context over an open transaction.
    pub fn new(
        tx: &'a mut dyn StoreTransaction,
        generator: &'a mut dyn IdentifierGenerator,
        config: &'a MigrationConfig,
        deadline: Deadline,
    ) -> Self {
        Self {
            tx,
            generator,
            config,
            deadline,
            stats: RewriteStats::default(),
        }
    }

    /// The open transaction.
    pub fn tx(&mut self) -> &mut dyn StoreTransaction {
        &mut *self.tx
    }

    /// Run configuration.
    pub fn config(&self) -> &MigrationConfig {
        self.config
    }

    /// Deadline of this run.
    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Fail if the deadline passed before `step`.
    pub fn checkpoint(&self, step: MigrationStep) -> Result<(), MigrationError> {
        self.deadline.check(step)
    }

    /// Group the owner's rows by identifier.
    pub fn scan_duplicates(&mut self, owner: &OwnerTable) -> Result<DuplicateScan, MigrationError> {
        self.checkpoint(MigrationStep::ListRows)?;
        DuplicateScanner::new(owner).scan(&mut *self.tx)
    }

    /// Every identifier currently stored in `table.column`.
    pub fn list_identifiers(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Vec<String>, MigrationError> {
        self.checkpoint(MigrationStep::ListIdentifiers)?;
        TableIdentifierLister::new(table, column).list(&mut *self.tx)
    }

    /// Start a mapping whose new identifiers avoid everything in `existing`.
    pub fn mapping_builder(
        &mut self,
        existing: impl IntoIterator<Item = String>,
    ) -> MappingBuilder<'_> {
        MappingBuilder::new(
            &mut *self.generator,
            existing,
            self.config.max_identifier_attempts,
        )
    }

    /// Apply `mapping` to `owner` and its dependents and record the counters.
    pub fn remap(
        &mut self,
        owner: &OwnerTable,
        dependents: &[DependentColumn],
        mapping: &IdentifierMapping,
    ) -> Result<RewriteStats, MigrationError> {
        let stats = IdentityRemapper::new(owner, dependents)
            .with_deadline(&self.deadline)
            .apply(&mut *self.tx, mapping)?;
        self.stats.merge(stats.clone());
        Ok(stats)
    }

    /// Counters accumulated by every [`remap`](Self::remap) call.
    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }

    pub(crate) fn into_stats(self) -> RewriteStats {
        self.stats
    }
}

/// A one-shot data migration.
///
/// `apply` runs inside the transaction opened by the orchestrator; the
/// completion flag is written in the same transaction after it returns.
pub trait DataMigration {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    /// Setting key that records completion.
    fn completion_key(&self) -> &str;

    /// DDL version that must be applied before this migration can run.
    fn required_schema_version(&self) -> u32;

    /// Rewrite the data.
    fn apply(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError>;
}
