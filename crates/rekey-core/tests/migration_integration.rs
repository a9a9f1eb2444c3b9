//! Integration tests for the data migrations against SQLite.

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use rekey_core::migration::{
    DeduplicateIdentifiers, MigrationStep, ReplaceIdentifiers, CATEGORY_UUID_ID_MIGRATION_KEY,
    UNIQUE_IDS_MIGRATION_KEY,
};
use rekey_core::{
    builtin_migrations, IdKind, MemoryStore, MigrationConfig, MigrationError,
    MigrationOrchestrator, MigrationState, OwnerTable, SchemaVersion, SettingStore, SqliteStore,
    StoreConfig,
};

const SCHEMA: &str = r#"
    CREATE TABLE schema_migrations (version INTEGER NOT NULL, dirty INTEGER NOT NULL);
    CREATE TABLE system_settings (id TEXT PRIMARY KEY, value TEXT);
    CREATE TABLE blocks (
        id TEXT,
        workspace_id TEXT,
        type TEXT,
        parent_id TEXT,
        root_id TEXT,
        title TEXT
    );
    CREATE TABLE blocks_history (
        id TEXT,
        workspace_id TEXT,
        type TEXT,
        parent_id TEXT,
        root_id TEXT,
        update_at INTEGER
    );
    CREATE TABLE categories (id TEXT, name TEXT, user_id TEXT);
    CREATE TABLE category_blocks (id TEXT, category_id TEXT, block_id TEXT);
"#;

/// Test context holding a migrated SQLite database.
struct TestContext {
    orchestrator: MigrationOrchestrator<SqliteStore>,
}

impl TestContext {
    fn new(schema_version: u32) -> Self {
        Self::with_config(schema_version, MigrationConfig::default())
    }

    fn with_config(schema_version: u32, config: MigrationConfig) -> Self {
        let store = SqliteStore::open_in_memory(StoreConfig::default()).unwrap();
        store.connection().execute_batch(SCHEMA).unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO schema_migrations (version, dirty) VALUES (?1, 0)",
                [schema_version],
            )
            .unwrap();
        Self {
            orchestrator: MigrationOrchestrator::new(store, config),
        }
    }

    fn exec(&self, sql: &str) {
        self.orchestrator.store().connection().execute_batch(sql).unwrap();
    }

    fn strings(&self, sql: &str) -> Vec<String> {
        let conn = self.orchestrator.store().connection();
        let mut stmt = conn.prepare(sql).unwrap();
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows
    }

    fn one(&self, sql: &str) -> String {
        self.orchestrator
            .store()
            .connection()
            .query_row(sql, [], |row| row.get(0))
            .unwrap()
    }

    fn flag(&self, key: &str) -> Option<String> {
        self.orchestrator.store().get_setting(key).unwrap()
    }

    fn snapshot(&self) -> Vec<Vec<String>> {
        vec![
            self.strings("SELECT id || '|' || workspace_id || '|' || ifnull(parent_id, '') FROM blocks ORDER BY rowid"),
            self.strings("SELECT id || '|' || workspace_id FROM blocks_history ORDER BY rowid"),
            self.strings("SELECT id FROM categories ORDER BY rowid"),
            self.strings("SELECT id || '|' || category_id FROM category_blocks ORDER BY rowid"),
            self.strings("SELECT id || '=' || value FROM system_settings ORDER BY id"),
        ]
    }
}

fn assert_unique(ids: &[String]) {
    let distinct: HashSet<&String> = ids.iter().collect();
    assert_eq!(distinct.len(), ids.len(), "duplicate identifiers in {ids:?}");
}

// Scenario A: duplicated card identifiers.
#[test]
fn test_duplicate_rows_get_fresh_identifiers() {
    let mut ctx = TestContext::new(16);
    ctx.exec(
        "CREATE TABLE cards (id TEXT, kind TEXT);
         INSERT INTO cards VALUES ('a', 'card');
         INSERT INTO cards VALUES ('a', 'card');
         INSERT INTO cards VALUES ('b', 'card');",
    );
    let migration = DeduplicateIdentifiers::new(
        "cards",
        "CardsDeduplicated",
        14,
        OwnerTable::new("cards").with_kind_column("kind"),
    )
    .with_kind_mapper(IdKind::from_block_type);

    let outcome = ctx.orchestrator.run(&migration).unwrap();
    assert_eq!(outcome.state, MigrationState::Committed);
    assert_eq!(outcome.stats.remapped, 1);

    let ids = ctx.strings("SELECT id FROM cards ORDER BY rowid");
    assert_eq!(ids[0], "a");
    assert_eq!(ids[2], "b");
    assert_ne!(ids[1], "a");
    assert_eq!(IdKind::of_identifier(&ids[1]), Some(IdKind::Card));
    assert_unique(&ids);
    assert_eq!(ctx.flag("CardsDeduplicated").as_deref(), Some("true"));
}

// Scenario B: unconditional replacement follows into the dependent table.
#[test]
fn test_replacement_follows_dependent() {
    let mut ctx = TestContext::new(16);
    ctx.exec(
        "INSERT INTO categories VALUES ('c1', 'Work', 'u1');
         INSERT INTO category_blocks VALUES ('d1', 'c1', 'board1');",
    );

    ctx.orchestrator.run(&ReplaceIdentifiers::category_ids()).unwrap();

    let category = ctx.one("SELECT id FROM categories");
    assert_ne!(category, "c1");
    assert_eq!(ctx.one("SELECT category_id FROM category_blocks"), category);
    let membership = ctx.one("SELECT id FROM category_blocks");
    assert_ne!(membership, "d1");
    assert_eq!(IdKind::of_identifier(&membership), Some(IdKind::None));
    assert_eq!(ctx.one("SELECT block_id FROM category_blocks"), "board1");
    assert_eq!(ctx.flag(CATEGORY_UUID_ID_MIGRATION_KEY).as_deref(), Some("true"));
}

// Scenario C: a completed migration touches no table.
#[test]
fn test_completed_migration_issues_no_queries() {
    let mut store = MemoryStore::new();
    store.set_schema_version(Some(SchemaVersion::clean(16)));
    store.create_table("categories", &["id"]);
    store.create_table("category_blocks", &["id", "category_id"]);
    store.insert("categories", &[("id", "c1")]).unwrap();
    store.put_setting(CATEGORY_UUID_ID_MIGRATION_KEY, "true");

    let mut orchestrator = MigrationOrchestrator::new(store, MigrationConfig::default());
    let outcome = orchestrator.run(&ReplaceIdentifiers::category_ids()).unwrap();

    assert_eq!(outcome.state, MigrationState::AlreadyDone);
    assert_eq!(orchestrator.store().total_table_queries(), 0);
    assert_eq!(
        orchestrator.store().column("categories", "id").unwrap(),
        vec![Some("c1".to_string())]
    );
}

#[test]
fn test_completed_migration_sqlite() {
    let mut ctx = TestContext::new(16);
    ctx.exec(
        "INSERT INTO categories VALUES ('c1', 'Work', 'u1');
         INSERT INTO system_settings VALUES ('CategoryUuidIdMigrationComplete', 'T');",
    );

    let outcome = ctx.orchestrator.run(&ReplaceIdentifiers::category_ids()).unwrap();
    assert_eq!(outcome.state, MigrationState::AlreadyDone);
    assert_eq!(ctx.one("SELECT id FROM categories"), "c1");
}

// Scenario D: a failing dependent update leaves everything untouched.
#[test]
fn test_dependent_failure_rolls_back() {
    let mut ctx = TestContext::new(16);
    ctx.exec(
        "INSERT INTO categories VALUES ('c1', 'Work', 'u1');
         INSERT INTO categories VALUES ('c2', 'Home', 'u1');
         INSERT INTO category_blocks VALUES ('d1', 'c1', 'board1');
         CREATE TRIGGER category_blocks_locked BEFORE UPDATE OF category_id ON category_blocks
         BEGIN
             SELECT RAISE(ABORT, 'boom');
         END;",
    );
    let before = ctx.snapshot();

    let err = ctx
        .orchestrator
        .run(&ReplaceIdentifiers::category_ids())
        .unwrap_err();

    match &err {
        MigrationError::Write {
            step,
            table,
            column,
            old,
            ..
        } => {
            assert_eq!(*step, MigrationStep::RewriteDependent);
            assert_eq!(table, "category_blocks");
            assert_eq!(column, "category_id");
            assert_eq!(old, "c1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
    assert_eq!(ctx.snapshot(), before);
    assert_eq!(ctx.flag(CATEGORY_UUID_ID_MIGRATION_KEY), None);
}

#[test]
fn test_block_duplicates_across_workspaces() {
    let mut ctx = TestContext::new(14);
    ctx.exec(
        "INSERT INTO blocks VALUES ('board1', 'w1', 'board', NULL, 'board1', 'Roadmap');
         INSERT INTO blocks VALUES ('board1', 'w2', 'board', NULL, 'board1', 'Roadmap copy');
         INSERT INTO blocks VALUES ('card1', 'w1', 'card', 'board1', 'board1', 'Task');
         INSERT INTO blocks VALUES ('card2', 'w2', 'card', 'board1', 'board1', 'Task copy');
         INSERT INTO blocks VALUES ('text1', 'w2', 'text', 'card2', 'board1', 'Body');
         INSERT INTO blocks_history VALUES ('board1', 'w1', 'board', NULL, 'board1', 1);
         INSERT INTO blocks_history VALUES ('board1', 'w2', 'board', NULL, 'board1', 2);
         INSERT INTO blocks_history VALUES ('card2', 'w2', 'card', 'board1', 'board1', 3);",
    );

    let outcome = ctx
        .orchestrator
        .run(&DeduplicateIdentifiers::unique_block_ids())
        .unwrap();
    assert_eq!(outcome.stats.remapped, 1);

    let renamed = ctx.one("SELECT id FROM blocks WHERE workspace_id = 'w2' AND type = 'board'");
    assert_ne!(renamed, "board1");
    assert_eq!(IdKind::of_identifier(&renamed), Some(IdKind::Board));
    assert_eq!(
        ctx.one("SELECT id FROM blocks WHERE workspace_id = 'w1' AND type = 'board'"),
        "board1"
    );

    // Workspace w2 follows the rename, w1 keeps pointing at the original.
    assert_eq!(ctx.one("SELECT parent_id FROM blocks WHERE id = 'card2'"), renamed);
    assert_eq!(ctx.one("SELECT root_id FROM blocks WHERE id = 'text1'"), renamed);
    assert_eq!(ctx.one("SELECT parent_id FROM blocks WHERE id = 'text1'"), "card2");
    assert_eq!(ctx.one("SELECT parent_id FROM blocks WHERE id = 'card1'"), "board1");
    assert_eq!(
        ctx.strings("SELECT id FROM blocks_history WHERE workspace_id = 'w2' ORDER BY update_at"),
        vec![renamed.clone(), "card2".to_string()]
    );
    assert_eq!(
        ctx.one("SELECT parent_id FROM blocks_history WHERE id = 'card2'"),
        renamed
    );
    assert_eq!(
        ctx.one("SELECT id FROM blocks_history WHERE workspace_id = 'w1'"),
        "board1"
    );

    assert_unique(&ctx.strings("SELECT id FROM blocks"));
    assert_eq!(ctx.flag(UNIQUE_IDS_MIGRATION_KEY).as_deref(), Some("true"));
}

#[test]
fn test_tie_break_keeps_first_row() {
    let mut ctx = TestContext::new(16);
    ctx.exec(
        "CREATE TABLE items (id TEXT, note TEXT);
         INSERT INTO items VALUES ('x', 'first');
         INSERT INTO items VALUES ('y', 'other');
         INSERT INTO items VALUES ('x', 'second');
         INSERT INTO items VALUES ('x', 'third');
         INSERT INTO items VALUES ('x', 'fourth');",
    );
    let migration = DeduplicateIdentifiers::new("items", "ItemsDeduplicated", 1, OwnerTable::new("items"));

    ctx.orchestrator.run(&migration).unwrap();

    assert_eq!(ctx.one("SELECT id FROM items WHERE note = 'first'"), "x");
    assert_eq!(ctx.one("SELECT id FROM items WHERE note = 'other'"), "y");
    let renamed = ctx.strings("SELECT id FROM items WHERE note IN ('second', 'third', 'fourth')");
    assert_eq!(renamed.len(), 3);
    assert!(renamed.iter().all(|id| id != "x" && id.starts_with('7')));
    assert_unique(&ctx.strings("SELECT id FROM items"));
}

#[test]
fn test_referential_integrity_after_replacement() {
    let mut ctx = TestContext::new(16);
    ctx.exec(
        "INSERT INTO categories VALUES ('c1', 'Work', 'u1');
         INSERT INTO categories VALUES ('c2', 'Home', 'u1');
         INSERT INTO categories VALUES ('c3', 'Empty', 'u2');
         INSERT INTO category_blocks VALUES ('d1', 'c1', 'b1');
         INSERT INTO category_blocks VALUES ('d2', 'c1', 'b2');
         INSERT INTO category_blocks VALUES ('d3', 'c2', 'b3');",
    );

    let outcome = ctx.orchestrator.run(&ReplaceIdentifiers::category_ids()).unwrap();
    assert_eq!(outcome.stats.remapped, 6);
    assert_eq!(outcome.stats.rows.get("category_blocks.category_id"), Some(&3));

    let categories = ctx.strings("SELECT id FROM categories");
    let memberships = ctx.strings("SELECT id FROM category_blocks");
    assert_unique(&categories);
    assert_unique(&memberships);
    for old in ["c1", "c2", "c3"] {
        assert!(!categories.iter().any(|id| id == old));
    }

    let orphans = ctx.strings(
        "SELECT category_id FROM category_blocks WHERE category_id NOT IN (SELECT id FROM categories)",
    );
    assert_eq!(orphans, Vec::<String>::new());
    assert_eq!(
        ctx.strings(
            "SELECT c.name FROM category_blocks cb JOIN categories c ON c.id = cb.category_id ORDER BY cb.rowid"
        ),
        vec!["Work".to_string(), "Work".to_string(), "Home".to_string()]
    );
}

#[test]
fn test_running_twice_matches_running_once() {
    let mut ctx = TestContext::new(16);
    ctx.exec(
        "INSERT INTO blocks VALUES ('a', 'w1', 'text', NULL, NULL, NULL);
         INSERT INTO blocks VALUES ('a', 'w2', 'text', NULL, NULL, NULL);
         INSERT INTO categories VALUES ('c1', 'Work', 'u1');
         INSERT INTO category_blocks VALUES ('d1', 'c1', 'a');",
    );

    let first = ctx.orchestrator.run_all(&builtin_migrations()).unwrap();
    assert!(first.iter().all(|o| o.state == MigrationState::Committed));
    let after_first = ctx.snapshot();

    let second = ctx.orchestrator.run_all(&builtin_migrations()).unwrap();
    assert!(second.iter().all(|o| o.state == MigrationState::AlreadyDone));
    assert_eq!(ctx.snapshot(), after_first);
}

#[test]
fn test_schema_gate_blocks_category_migration() {
    let mut ctx = TestContext::new(15);
    ctx.exec("INSERT INTO categories VALUES ('c1', 'Work', 'u1');");

    let err = ctx.orchestrator.run_all(&builtin_migrations()).unwrap_err();
    assert!(matches!(
        err,
        MigrationError::SchemaNotReady { required: 16, .. }
    ));
    assert_eq!(ctx.flag(UNIQUE_IDS_MIGRATION_KEY).as_deref(), Some("true"));
    assert_eq!(ctx.flag(CATEGORY_UUID_ID_MIGRATION_KEY), None);
    assert_eq!(ctx.one("SELECT id FROM categories"), "c1");
}

#[test]
fn test_dirty_schema_blocks_migration() {
    let mut ctx = TestContext::new(16);
    ctx.exec("UPDATE schema_migrations SET dirty = 1;");

    let err = ctx
        .orchestrator
        .run(&ReplaceIdentifiers::category_ids())
        .unwrap_err();
    assert!(matches!(err, MigrationError::SchemaNotReady { .. }));
}

#[test]
fn test_nil_schema_version_blocks_migration() {
    let mut ctx = TestContext::new(16);
    ctx.exec(
        "DELETE FROM schema_migrations;
         INSERT INTO schema_migrations VALUES (-1, 1);
         INSERT INTO categories VALUES ('c1', 'Work', 'u1');",
    );

    let err = ctx
        .orchestrator
        .run(&ReplaceIdentifiers::category_ids())
        .unwrap_err();
    assert!(matches!(
        err,
        MigrationError::SchemaNotReady { required: 16, current: None, .. }
    ));
    assert_eq!(ctx.one("SELECT id FROM categories"), "c1");
}

#[test]
fn test_undecodable_flag_reads_as_not_completed() {
    for value in ["X'FF00'", "CAST(X'FF' AS TEXT)"] {
        let mut ctx = TestContext::new(16);
        ctx.exec(&format!(
            "INSERT INTO system_settings VALUES ('{CATEGORY_UUID_ID_MIGRATION_KEY}', {value});
             INSERT INTO categories VALUES ('c1', 'Work', 'u1');"
        ));

        let outcome = ctx
            .orchestrator
            .run(&ReplaceIdentifiers::category_ids())
            .unwrap();
        assert_eq!(outcome.state, MigrationState::Committed, "{value}");
        assert_ne!(ctx.one("SELECT id FROM categories"), "c1");
        assert_eq!(ctx.flag(CATEGORY_UUID_ID_MIGRATION_KEY).as_deref(), Some("true"));
    }
}

#[test]
fn test_dry_run_reports_without_writing() {
    let mut ctx = TestContext::with_config(16, MigrationConfig::default().with_dry_run(true));
    ctx.exec(
        "INSERT INTO categories VALUES ('c1', 'Work', 'u1');
         INSERT INTO category_blocks VALUES ('d1', 'c1', 'b1');",
    );
    let before = ctx.snapshot();

    let outcome = ctx.orchestrator.run(&ReplaceIdentifiers::category_ids()).unwrap();
    assert_eq!(outcome.state, MigrationState::Discarded);
    assert_eq!(outcome.stats.total_rows(), 3);
    assert_eq!(ctx.snapshot(), before);
}

#[test]
fn test_on_disk_database_persists_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rekey.db");

    {
        let store = SqliteStore::open(&path, StoreConfig::default()).unwrap();
        store.connection().execute_batch(SCHEMA).unwrap();
        store
            .connection()
            .execute_batch(
                "INSERT INTO schema_migrations VALUES (16, 0);
                 INSERT INTO categories VALUES ('c1', 'Work', 'u1');",
            )
            .unwrap();
        let mut orchestrator = MigrationOrchestrator::new(store, MigrationConfig::default());
        orchestrator.run(&ReplaceIdentifiers::category_ids()).unwrap();
    }

    let store = SqliteStore::open(&path, StoreConfig::default()).unwrap();
    assert_eq!(
        store.get_setting(CATEGORY_UUID_ID_MIGRATION_KEY).unwrap().as_deref(),
        Some("true")
    );
    let mut orchestrator = MigrationOrchestrator::new(store, MigrationConfig::default());
    let outcome = orchestrator.run(&ReplaceIdentifiers::category_ids()).unwrap();
    assert_eq!(outcome.state, MigrationState::AlreadyDone);
}

#[test]
fn test_prefixed_tables() {
    let store =
        SqliteStore::open_in_memory(StoreConfig::default().with_table_prefix("focalboard_")).unwrap();
    store
        .connection()
        .execute_batch(
            "CREATE TABLE focalboard_schema_migrations (version INTEGER, dirty INTEGER);
             INSERT INTO focalboard_schema_migrations VALUES (16, 0);
             CREATE TABLE focalboard_system_settings (id TEXT PRIMARY KEY, value TEXT);
             CREATE TABLE focalboard_categories (id TEXT);
             CREATE TABLE focalboard_category_blocks (id TEXT, category_id TEXT);
             INSERT INTO focalboard_categories VALUES ('c1');
             INSERT INTO focalboard_category_blocks VALUES ('d1', 'c1');",
        )
        .unwrap();

    let mut orchestrator = MigrationOrchestrator::new(store, MigrationConfig::default());
    orchestrator.run(&ReplaceIdentifiers::category_ids()).unwrap();

    let store = orchestrator.into_store();
    let (category, reference): (String, String) = store
        .connection()
        .query_row(
            "SELECT c.id, cb.category_id FROM focalboard_categories c, focalboard_category_blocks cb",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(category, reference);
    assert_ne!(category, "c1");
}
