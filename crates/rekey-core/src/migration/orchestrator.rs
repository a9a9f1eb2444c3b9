//! Migration orchestrator.
//!
//! Drives one data migration through gate check, completion check,
//! transaction, rewrite, completion flag and commit. Every failure after the
//! transaction opens rolls it back before the error is returned.

use super::context::{DataMigration, Deadline, MigrationContext};
use super::error::{MigrationError, MigrationStep};
use super::gate::SchemaVersionGate;
use super::marker::CompletionMarker;
use super::state::{MigrationOutcome, MigrationState, MigrationStatusReport};
use crate::config::MigrationConfig;
use crate::ident::{IdentifierGenerator, RandomIdentifiers};
use crate::store::{Store, StoreTransaction};

/// Runs data migrations against one store.
pub struct MigrationOrchestrator<S: Store> {
    store: S,
    config: MigrationConfig,
    generator: Box<dyn IdentifierGenerator>,
}

impl<S: Store> MigrationOrchestrator<S> {
    /// Orchestrator generating random identifiers.
    pub fn new(store: S, config: MigrationConfig) -> Self {
        Self {
            store,
            config,
            generator: Box::new(RandomIdentifiers),
        }
    }

    /// Replace the identifier generator.
    pub fn with_generator(mut self, generator: Box<dyn IdentifierGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the underlying store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Run configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Consume the orchestrator and return the store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Report whether `migration` has run and whether it could run now.
    pub fn status(&self, migration: &dyn DataMigration) -> Result<MigrationStatusReport, MigrationError> {
        let required = migration.required_schema_version();
        let schema_version = self.store.schema_version().map_err(|source| {
            MigrationError::SchemaVersionUnavailable {
                migration: migration.name().to_string(),
                source,
            }
        })?;
        let schema_ready = SchemaVersionGate::new(&self.store).is_ready(required)?;
        let completed = CompletionMarker::new(migration.completion_key()).is_complete(&self.store)?;

        Ok(MigrationStatusReport {
            migration: migration.name().to_string(),
            completion_key: migration.completion_key().to_string(),
            required_schema_version: required,
            schema_version,
            schema_ready,
            completed,
        })
    }

    /// Run `migration` once.
    ///
    /// Returns `AlreadyDone` without touching any table when the completion
    /// flag is set. On failure the transaction is rolled back and the flag
    /// stays unset, so the next invocation retries from scratch.
    pub fn run(&mut self, migration: &dyn DataMigration) -> Result<MigrationOutcome, MigrationError> {
        let name = migration.name();
        let mut state = MigrationState::NotStarted;

        SchemaVersionGate::new(&self.store)
            .ensure_applied_up_to(name, migration.required_schema_version())
            .map_err(|err| {
                tracing::error!(migration = name, error = %err, "schema gate failed");
                err
            })?;
        enter(&mut state, MigrationState::GateChecked, name);

        let marker = CompletionMarker::new(migration.completion_key());
        if marker.is_complete(&self.store)? {
            enter(&mut state, MigrationState::AlreadyDone, name);
            tracing::info!(migration = name, key = marker.key(), "data migration already completed");
            return Ok(MigrationOutcome::already_done(name));
        }

        let deadline = Deadline::start(self.config.deadline);
        tracing::debug!(
            migration = name,
            dry_run = self.config.dry_run,
            "starting data migration"
        );

        let mut tx = self.store.begin().map_err(|source| MigrationError::Begin {
            migration: name.to_string(),
            source,
        })?;

        // Another process may have committed between the first check and
        // taking the write lock.
        let completed = match marker.is_complete_in(&mut tx) {
            Ok(completed) => completed,
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::error!(migration = name, error = %rollback, "rollback failed");
                    return Err(MigrationError::RolledBackWithError {
                        original: Box::new(err),
                        rollback,
                    });
                }
                return Err(err);
            }
        };
        if completed {
            tx.rollback().map_err(|source| MigrationError::Rollback {
                migration: name.to_string(),
                source,
            })?;
            enter(&mut state, MigrationState::AlreadyDone, name);
            tracing::info!(
                migration = name,
                key = marker.key(),
                "data migration completed concurrently"
            );
            return Ok(MigrationOutcome::already_done(name));
        }
        enter(&mut state, MigrationState::InProgress, name);

        let result = {
            let mut ctx =
                MigrationContext::new(&mut tx, self.generator.as_mut(), &self.config, deadline);
            migration
                .apply(&mut ctx)
                .and_then(|()| {
                    ctx.checkpoint(MigrationStep::MarkComplete)?;
                    marker.mark_complete(ctx.tx())
                })
                .and_then(|()| {
                    ctx.checkpoint(MigrationStep::Commit)?;
                    Ok(ctx.into_stats())
                })
        };

        let stats = match result {
            Ok(stats) => stats,
            Err(err) => {
                tracing::error!(
                    migration = name,
                    step = %err.step(),
                    error = %err,
                    "data migration failed, rolling back"
                );
                let err = match tx.rollback() {
                    Ok(()) => err,
                    Err(rollback) => {
                        tracing::error!(migration = name, error = %rollback, "rollback failed");
                        MigrationError::RolledBackWithError {
                            original: Box::new(err),
                            rollback,
                        }
                    }
                };
                enter(&mut state, MigrationState::RolledBack, name);
                return Err(err);
            }
        };

        if self.config.dry_run {
            tx.rollback().map_err(|source| MigrationError::Rollback {
                migration: name.to_string(),
                source,
            })?;
            enter(&mut state, MigrationState::Discarded, name);
            tracing::info!(
                migration = name,
                remapped = stats.remapped,
                rewritten = stats.total_rows(),
                "dry run finished, changes discarded"
            );
            return Ok(MigrationOutcome {
                migration: name.to_string(),
                state,
                dry_run: true,
                stats,
            });
        }

        tx.commit().map_err(|source| {
            tracing::error!(migration = name, error = %source, "commit failed");
            MigrationError::Commit {
                migration: name.to_string(),
                source,
            }
        })?;
        enter(&mut state, MigrationState::Committed, name);

        tracing::info!(
            migration = name,
            remapped = stats.remapped,
            rewritten = stats.total_rows(),
            elapsed_ms = deadline.elapsed().as_millis() as u64,
            "data migration committed"
        );

        Ok(MigrationOutcome {
            migration: name.to_string(),
            state,
            dry_run: false,
            stats,
        })
    }

    /// Run `migrations` in order, stopping at the first failure.
    pub fn run_all(
        &mut self,
        migrations: &[Box<dyn DataMigration>],
    ) -> Result<Vec<MigrationOutcome>, MigrationError> {
        let mut outcomes = Vec::with_capacity(migrations.len());
        for migration in migrations {
            outcomes.push(self.run(migration.as_ref())?);
        }
        Ok(outcomes)
    }
}

fn enter(state: &mut MigrationState, next: MigrationState, migration: &str) {
    debug_assert!(state.can_transition_to(next), "invalid transition {state} -> {next}");
    tracing::trace!(migration = migration, from = %state, to = %next, "migration state");
    *state = next;
}
