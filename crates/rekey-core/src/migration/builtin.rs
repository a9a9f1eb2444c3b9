//! The data migrations shipped with the crate, and the two generic shapes
//! they are built from.

use super::context::{DataMigration, MigrationContext};
use super::error::MigrationError;
use crate::ident::IdKind;
use crate::store::{DependentColumn, OwnerTable};

/// Completion key of the block identifier de-duplication.
pub const UNIQUE_IDS_MIGRATION_KEY: &str = "UniqueIDsMigrationComplete";

/// Completion key of the category identifier replacement.
pub const CATEGORY_UUID_ID_MIGRATION_KEY: &str = "CategoryUuidIdMigrationComplete";

/// DDL version after which blocks carry a workspace scope.
pub const UNIQUE_IDS_SCHEMA_VERSION: u32 = 14;

/// DDL version that introduces the category tables.
pub const CATEGORY_UUID_ID_SCHEMA_VERSION: u32 = 16;

/// Picks an identifier kind from the owner row's type column.
pub type KindMapper = fn(Option<&str>) -> IdKind;

/// Gives every row that shares its identifier with an earlier row a fresh
/// identifier. The first row of each group, in `(id, scope, row id)` order,
/// keeps its identifier.
#[derive(Clone)]
pub struct DeduplicateIdentifiers {
    name: String,
    completion_key: String,
    required_version: u32,
    owner: OwnerTable,
    dependents: Vec<DependentColumn>,
    kind_of: KindMapper,
}

impl DeduplicateIdentifiers {
    /// De-duplicate `owner` with no dependents. New identifiers use the
    /// neutral kind until [`with_kind_mapper`](Self::with_kind_mapper) is set.
    pub fn new(
        name: impl Into<String>,
        completion_key: impl Into<String>,
        required_version: u32,
        owner: OwnerTable,
    ) -> Self {
        Self {
            name: name.into(),
            completion_key: completion_key.into(),
            required_version,
            owner,
            dependents: Vec::new(),
            kind_of: |_| IdKind::None,
        }
    }

    /// Add a column that follows renamed rows.
    pub fn with_dependent(mut self, dependent: DependentColumn) -> Self {
        self.dependents.push(dependent);
        self
    }

    /// Set how the owner's type column maps to an identifier kind.
    pub fn with_kind_mapper(mut self, kind_of: KindMapper) -> Self {
        self.kind_of = kind_of;
        self
    }

    /// Blocks sharing an identifier across workspaces.
    pub fn unique_block_ids() -> Self {
        let scoped = |table: &str, column: &str| {
            DependentColumn::new(table, column).scoped_by("workspace_id")
        };
        Self::new(
            "unique_ids",
            UNIQUE_IDS_MIGRATION_KEY,
            UNIQUE_IDS_SCHEMA_VERSION,
            OwnerTable::new("blocks")
                .with_kind_column("type")
                .with_scope_column("workspace_id"),
        )
        .with_dependent(scoped("blocks", "parent_id"))
        .with_dependent(scoped("blocks", "root_id"))
        .with_dependent(scoped("blocks_history", "id"))
        .with_dependent(scoped("blocks_history", "parent_id"))
        .with_dependent(scoped("blocks_history", "root_id"))
        .with_kind_mapper(IdKind::from_block_type)
    }
}

impl std::fmt::Debug for DeduplicateIdentifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeduplicateIdentifiers")
            .field("name", &self.name)
            .field("completion_key", &self.completion_key)
            .field("required_version", &self.required_version)
            .field("owner", &self.owner)
            .field("dependents", &self.dependents)
            .finish_non_exhaustive()
    }
}

impl DataMigration for DeduplicateIdentifiers {
    fn name(&self) -> &str {
        &self.name
    }

    fn completion_key(&self) -> &str {
        &self.completion_key
    }

    fn required_schema_version(&self) -> u32 {
        self.required_version
    }

    fn apply(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        let scan = ctx.scan_duplicates(&self.owner)?;
        tracing::debug!(
            migration = %self.name,
            rows = scan.row_count,
            groups = scan.groups.len(),
            duplicates = scan.rows_to_rename(),
            "scanned for duplicate identifiers"
        );
        if scan.groups.is_empty() {
            return Ok(());
        }

        let mut builder = ctx.mapping_builder(scan.existing.iter().cloned());
        for group in &scan.groups {
            for row in group.renamed() {
                builder.remap_row(row, (self.kind_of)(row.kind.as_deref()))?;
            }
        }
        let mapping = builder.finish();

        ctx.remap(&self.owner, &self.dependents, &mapping)?;
        Ok(())
    }
}

/// One table whose identifiers are all replaced, with the columns that
/// reference it.
#[derive(Debug, Clone)]
pub struct ReplacePass {
    /// Table whose identifiers are replaced.
    pub owner: OwnerTable,
    /// Columns following the replacement.
    pub dependents: Vec<DependentColumn>,
    /// Kind of the new identifiers.
    pub kind: IdKind,
}

impl ReplacePass {
    /// Replace every identifier of `owner` with a fresh `kind` identifier.
    pub fn new(owner: OwnerTable, kind: IdKind) -> Self {
        Self {
            owner,
            dependents: Vec::new(),
            kind,
        }
    }

    /// Add a column that follows the replacement.
    pub fn with_dependent(mut self, dependent: DependentColumn) -> Self {
        self.dependents.push(dependent);
        self
    }
}

/// Replaces every identifier of one or more tables unconditionally.
///
/// Passes run in order inside the same transaction, each with its own
/// mapping.
#[derive(Debug, Clone)]
pub struct ReplaceIdentifiers {
    name: String,
    completion_key: String,
    required_version: u32,
    passes: Vec<ReplacePass>,
}

impl ReplaceIdentifiers {
    /// Migration with no passes yet.
    pub fn new(
        name: impl Into<String>,
        completion_key: impl Into<String>,
        required_version: u32,
    ) -> Self {
        Self {
            name: name.into(),
            completion_key: completion_key.into(),
            required_version,
            passes: Vec::new(),
        }
    }

    /// Append a pass.
    pub fn with_pass(mut self, pass: ReplacePass) -> Self {
        self.passes.push(pass);
        self
    }

    /// Categories and their block memberships move to the new identifier
    /// format. `category_blocks` plays both roles: its `category_id` follows
    /// the first pass and its own `id` is replaced by the second.
    pub fn category_ids() -> Self {
        Self::new(
            "category_ids",
            CATEGORY_UUID_ID_MIGRATION_KEY,
            CATEGORY_UUID_ID_SCHEMA_VERSION,
        )
        .with_pass(
            ReplacePass::new(OwnerTable::new("categories"), IdKind::None)
                .with_dependent(DependentColumn::new("category_blocks", "category_id")),
        )
        .with_pass(ReplacePass::new(
            OwnerTable::new("category_blocks"),
            IdKind::None,
        ))
    }
}

impl DataMigration for ReplaceIdentifiers {
    fn name(&self) -> &str {
        &self.name
    }

    fn completion_key(&self) -> &str {
        &self.completion_key
    }

    fn required_schema_version(&self) -> u32 {
        self.required_version
    }

    fn apply(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        for pass in &self.passes {
            let ids = ctx.list_identifiers(&pass.owner.name, &pass.owner.id_column)?;
            tracing::debug!(
                migration = %self.name,
                table = %pass.owner.name,
                identifiers = ids.len(),
                "replacing identifiers"
            );

            let mut builder = ctx.mapping_builder(ids.iter().cloned());
            for id in &ids {
                builder.remap_all(id, pass.kind)?;
            }
            let mapping = builder.finish();

            ctx.remap(&pass.owner, &pass.dependents, &mapping)?;
        }
        Ok(())
    }
}

/// Built-in migrations, in the order they must run.
pub fn builtin_migrations() -> Vec<Box<dyn DataMigration>> {
    vec![
        Box::new(DeduplicateIdentifiers::unique_block_ids()),
        Box::new(ReplaceIdentifiers::category_ids()),
    ]
}
