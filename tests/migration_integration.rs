//! Integration tests for the revision graph, the runner and the engine.
//!
//! The "database" here is a schema snapshot that operations are applied to,
//! with transactions staged on a copy.

use keel::migrate::{
    BoxError, InMemoryVersionStore, MigrationConfig, MigrationEngine, MigrationError,
    MigrationExecutor, MigrationRunner, Operation, Revision, RevisionGraph, RevisionSet,
    RunnerConfig, SchemaDiffer,
};
use keel::schema::{
    Column, ForeignKeyConstraint, Index, SchemaSnapshot, SqlType, Table, TableKey,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Debug, Default)]
struct SnapshotDatabase {
    committed: SchemaSnapshot,
    pending: Option<SchemaSnapshot>,
    rollbacks: usize,
}

impl MigrationExecutor for SnapshotDatabase {
    fn begin(&mut self) -> Result<(), BoxError> {
        self.pending = Some(self.committed.clone());
        Ok(())
    }

    fn execute(&mut self, op: &Operation) -> Result<(), BoxError> {
        let schema = self.pending.as_mut().unwrap_or(&mut self.committed);
        op.apply(schema)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), BoxError> {
        if let Some(pending) = self.pending.take() {
            self.committed = pending;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), BoxError> {
        self.pending = None;
        self.rollbacks += 1;
        Ok(())
    }
}

fn set(ids: &[&str]) -> RevisionSet {
    ids.iter().map(|id| id.to_string()).collect()
}

fn ids(revisions: &[&Revision]) -> Vec<String> {
    revisions.iter().map(|r| r.id.clone()).collect()
}

fn branch_merge_graph() -> RevisionGraph {
    RevisionGraph::new(vec![
        Revision::new("r1", Vec::<String>::new()),
        Revision::new("r2", ["r1"]),
        Revision::new("r3a", ["r2"]),
        Revision::new("r3b", ["r2"]),
        Revision::new("r4", ["r3a", "r3b"]),
    ])
    .unwrap()
}

#[test]
fn test_branch_and_merge_traversal() {
    let graph = branch_merge_graph();

    let up = graph.iterate_upgrade(&set(&[]), &set(&["r4"])).unwrap();
    assert_eq!(ids(&up), vec!["r1", "r2", "r3a", "r3b", "r4"]);

    let down = graph.iterate_downgrade(&set(&["r4"]), &set(&[])).unwrap();
    let mut reversed = ids(&up);
    reversed.reverse();
    assert_eq!(ids(&down), reversed);

    assert_eq!(graph.resolve("head").unwrap(), set(&["r4"]));
    assert_eq!(graph.branch_points(), set(&["r2"]));
}

#[test]
fn test_revision_spec_errors() {
    let graph = RevisionGraph::new(vec![
        Revision::new("ae1027a6", Vec::<String>::new()),
        Revision::new("ae10ffff", ["ae1027a6"]),
    ])
    .unwrap();
    assert!(matches!(
        graph.resolve("ae10"),
        Err(MigrationError::AmbiguousRevision { .. })
    ));
    assert!(matches!(
        graph.resolve("zz"),
        Err(MigrationError::UnknownRevision { .. })
    ));
    assert_eq!(graph.resolve("ae102").unwrap(), set(&["ae1027a6"]));

    let cyclic = RevisionGraph::new(vec![
        Revision::new("a", ["b"]),
        Revision::new("b", ["a"]),
    ]);
    assert!(matches!(cyclic, Err(MigrationError::CycleDetected { .. })));
}

#[test]
fn test_failed_revision_rolls_back_and_halts() {
    init_tracing();
    let account = Table::new("account")
        .with_column(Column::new("id", SqlType::integer()).not_null())
        .with_primary_key(["id"]);
    let graph = RevisionGraph::new(vec![
        Revision::new("r1", Vec::<String>::new())
            .with_operations(vec![Operation::AddTable { table: account }]),
        Revision::new("r2", ["r1"]).with_operations(vec![
            Operation::AddColumn {
                table: TableKey::new("account"),
                column: Column::new("email", SqlType::string(Some(255))),
            },
            Operation::AddColumn {
                table: TableKey::new("missing"),
                column: Column::new("x", SqlType::integer()),
            },
        ]),
        Revision::new("r3", ["r2"]),
    ])
    .unwrap();

    let mut runner = MigrationRunner::new(SnapshotDatabase::default(), InMemoryVersionStore::new())
        .with_graph(graph, RunnerConfig::new().transactional_ddl(true));
    let err = runner.upgrade("head").unwrap_err();
    assert!(matches!(
        &err,
        MigrationError::MigrationExecution { revision, .. } if revision == "r2"
    ));
    assert!(err.to_string().contains("table 'missing' does not exist"));

    // The marker stays at the last completed revision and r2's first
    // statement was rolled back with it.
    assert_eq!(runner.current().unwrap(), set(&["r1"]));
    let db = runner.executor();
    assert_eq!(db.rollbacks, 1);
    assert!(db.committed.table("account").unwrap().get_column("email").is_none());
}

#[tokio::test]
async fn test_autogenerate_upgrade_downgrade_cycle() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let engine = MigrationEngine::new(
        MigrationConfig::new()
            .script_location(tmp.path().join("migrations"))
            .transactional_ddl(true),
    );
    engine.initialize().await.unwrap();

    let order = Table::new("order")
        .with_column(Column::new("order_id", SqlType::integer()).not_null())
        .with_primary_key(["order_id"]);
    let user_v1 = Table::new("user")
        .with_column(Column::new("id", SqlType::integer()).not_null())
        .with_column(Column::new("name", SqlType::string(Some(50))))
        .with_column(Column::new("pw", SqlType::string(Some(50))))
        .with_primary_key(["id"]);
    let user_v2 = Table::new("user")
        .with_column(Column::new("id", SqlType::integer()).not_null())
        .with_column(Column::new("name", SqlType::string(Some(50))).not_null())
        .with_column(Column::new("a1", SqlType::text()).default_literal("x"))
        .with_primary_key(["id"]);
    let item = Table::new("item")
        .with_column(Column::new("id", SqlType::integer()).not_null())
        .with_column(Column::new("order_id", SqlType::integer()))
        .with_primary_key(["id"])
        .with_foreign_key(ForeignKeyConstraint::new(
            ["order_id"],
            TableKey::new("order"),
            ["order_id"],
        ))
        .with_index(Index::new("ix_item_order_id", ["order_id"]));

    let v1 = SchemaSnapshot::new().with_table(user_v1).with_table(order.clone());
    let v2 = SchemaSnapshot::new()
        .with_table(user_v2)
        .with_table(order)
        .with_table(item);

    // First revision from an empty database.
    let first = engine
        .autogenerate_revision("initial", &SchemaSnapshot::new(), &v1)
        .await
        .unwrap();
    let mut runner = engine
        .runner(SnapshotDatabase::default(), InMemoryVersionStore::new())
        .await
        .unwrap();
    let result = runner.upgrade("head").unwrap();
    assert_eq!(result.applied, vec![first.revision.id.clone()]);
    let differ = SchemaDiffer::default();
    assert!(differ.diff(&runner.executor().committed, &v1).unwrap().is_empty());

    // Second revision against the migrated database.
    let second = engine
        .autogenerate_revision("add item", &runner.executor().committed, &v2)
        .await
        .unwrap();
    assert_eq!(second.revision.parents, vec![first.revision.id.clone()]);

    let (db, store) = runner.into_parts();
    let mut runner = engine.runner(db, store).await.unwrap();
    let result = runner.upgrade("heads").unwrap();
    assert_eq!(result.applied, vec![second.revision.id.clone()]);
    assert_eq!(runner.current().unwrap(), set(&[second.revision.id.as_str()]));
    assert!(differ.diff(&runner.executor().committed, &v2).unwrap().is_empty());

    // One step back restores v1, then all the way down.
    runner.downgrade(&first.revision.id).unwrap();
    assert!(differ.diff(&runner.executor().committed, &v1).unwrap().is_empty());

    let result = runner.downgrade("base").unwrap();
    assert_eq!(result.applied, vec![first.revision.id.clone()]);
    assert!(runner.current().unwrap().is_empty());
    assert!(runner.executor().committed.is_empty());
}

#[tokio::test]
async fn test_offline_upgrade_renders_script() {
    let tmp = TempDir::new().unwrap();
    let engine = MigrationEngine::new(
        MigrationConfig::new()
            .script_location(tmp.path())
            .dialect("postgresql"),
    );
    let target = SchemaSnapshot::new().with_table(
        Table::new("account")
            .with_column(Column::new("id", SqlType::integer()).not_null())
            .with_primary_key(["id"]),
    );
    let rev = engine
        .autogenerate_revision("create account", &SchemaSnapshot::new(), &target)
        .await
        .unwrap();

    let sql = engine.offline_upgrade(None, "head").await.unwrap();
    let lines: Vec<&str> = sql.lines().collect();
    assert_eq!(
        lines[0],
        format!("-- Running upgrade <base> -> {}, create account", rev.revision.id)
    );
    assert_eq!(lines[1], "BEGIN;");
    assert_eq!(lines[2], "op.create_table('account',");
    assert_eq!(lines.last(), Some(&"COMMIT;"));
}
