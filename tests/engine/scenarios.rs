//! End-to-end scenarios against the in-memory backend.

use crate::helpers::*;
use bson::doc;
use mongodbee::chain::Chain;
use mongodbee::constants::LEDGER_COLLECTION;
use mongodbee::driver::{DriverAdapter, MemoryDriver};
use mongodbee::error::MigrateError;
use mongodbee::executor::Executor;
use mongodbee::ident::{MigrationId, parse_db_id};
use mongodbee::ledger::{Ledger, LedgerStatus};
use mongodbee::migration::MigrationBuilder;
use mongodbee::planner::{Target, plan};
use mongodbee::schema::{IndexOptions, SchemaDocument, SchemaNode};

/// First migration on an empty database: collection created, seeds get
/// tagged ids, one ledger entry.
#[tokio::test]
async fn test_init_and_first_migration() {
    let driver = MemoryDriver::new();
    let chain = Chain::from_definitions(vec![create_users_migration()]).unwrap();

    migrate_to(&driver, &chain, Target::Head).await.unwrap();

    assert!(driver.collection_exists("user").await);
    let docs = driver.dump("user").await;
    assert_eq!(docs.len(), 2);
    for doc in &docs {
        let id = doc.get_str("_id").unwrap();
        let parsed = parse_db_id(id).expect("seeded id is tagged");
        assert_eq!(parsed.tag, "user");
    }

    let ledger_docs = driver.dump(LEDGER_COLLECTION).await;
    assert_eq!(ledger_docs.len(), 1);
    assert_eq!(ledger_docs[0].get_str("status").unwrap(), "applied");
}

/// Transform up adds `fullName`; rolling one step back removes it from
/// every document.
#[tokio::test]
async fn test_transform_up_and_down() {
    let driver = MemoryDriver::new();
    let root = create_users_migration();
    let full_name = full_name_migration(&root);
    let chain = Chain::from_definitions(vec![root, full_name]).unwrap();

    migrate_to(&driver, &chain, Target::Head).await.unwrap();
    for doc in driver.dump("user").await {
        assert_eq!(doc.get_str("fullName"), doc.get_str("name"));
    }

    migrate_to(&driver, &chain, Target::Back(1)).await.unwrap();
    for doc in driver.dump("user").await {
        assert!(!doc.contains_key("fullName"));
        assert!(doc.contains_key("name"));
    }

    let ledger = Ledger::new(&driver);
    assert_eq!(ledger.list().await.unwrap().len(), 1);
}

/// Rolling back a collection creation is refused, and the database is left
/// untouched.
#[tokio::test]
async fn test_irreversible_rollback_blocked() {
    let driver = MemoryDriver::new();
    let root = create_users_migration();
    let posts = create_posts_migration(&root);
    let chain = Chain::from_definitions(vec![root, posts]).unwrap();

    migrate_to(&driver, &chain, Target::Head).await.unwrap();
    assert!(driver.collection_exists("posts").await);

    let err = migrate_to(&driver, &chain, Target::Back(1))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::IrreversibleRollback { .. }));

    // unchanged: collection still there, ledger still has both entries
    assert!(driver.collection_exists("posts").await);
    let ledger = Ledger::new(&driver);
    assert_eq!(ledger.list().await.unwrap().len(), 2);
}

/// Index evolution with conflicting data: the unique build fails, the
/// ledger entry stays dirty, and the migration is not recorded as applied.
#[tokio::test]
async fn test_unique_index_on_duplicates_leaves_dirty() {
    let driver = MemoryDriver::new();

    // v1 already carries an optional email; two users share one.
    let mut schemas = SchemaDocument::default();
    schemas.collections.insert(
        "user".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("user")),
            ("name", SchemaNode::string()),
            ("email", SchemaNode::string().optional()),
        ]),
    );
    let root = MigrationBuilder::new(schemas.clone())
        .create_collection("user")
        .seed(vec![
            doc! { "name": "Alice", "email": "dup@example.com" },
            doc! { "name": "Bob", "email": "dup@example.com" },
        ])
        .end()
        .into_definition(MigrationId::new("create-users"), "create-users", None)
        .unwrap();

    let mut schemas_v2 = schemas.clone();
    schemas_v2.collections.insert(
        "user".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("user")),
            ("name", SchemaNode::string()),
            (
                "email",
                SchemaNode::string().optional().indexed(IndexOptions::unique()),
            ),
        ]),
    );
    let index_migration = MigrationBuilder::new(schemas_v2)
        .into_definition(
            MigrationId::new("unique-email"),
            "unique-email",
            Some(root.id.clone()),
        )
        .unwrap();

    let chain = Chain::from_definitions(vec![root.clone(), index_migration.clone()]).unwrap();

    let err = migrate_to(&driver, &chain, Target::Head).await.unwrap_err();
    assert!(matches!(err, MigrateError::Driver(_)));
    assert!(err.to_string().contains("duplicate") || format!("{:?}", err).contains("E11000"));

    let ledger = Ledger::new(&driver);
    let dirty = ledger.dirty_entry().await.unwrap().expect("dirty entry");
    assert_eq!(dirty.migration_id, index_migration.id);
    // only the root counts as applied
    let applied: Vec<_> = ledger
        .entries()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.status == LedgerStatus::Applied)
        .collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].migration_id, root.id);
}

/// Editing an applied migration's operations is detected by checksum
/// comparison before any plan is produced.
#[tokio::test]
async fn test_chain_tamper_detected() {
    let driver = MemoryDriver::new();
    let root = create_users_migration();
    let full_name = full_name_migration(&root);
    let chain = Chain::from_definitions(vec![root.clone(), full_name.clone()]).unwrap();

    migrate_to(&driver, &chain, Target::Head).await.unwrap();

    // same ids, edited transform
    let mut tampered = full_name.clone();
    if let mongodbee::migration::Operation::TransformCollection { up, .. } =
        &mut tampered.operations[0]
    {
        up.push(mongodbee::migration::TransformStep::Unset {
            field: "age".into(),
        });
    } else {
        panic!("expected a transform operation");
    }
    let tampered_chain = Chain::from_definitions(vec![root, tampered]).unwrap();

    let ledger = Ledger::new(&driver);
    let entries = ledger.entries().await.unwrap();
    let err = plan(&tampered_chain, &entries, Target::Head).unwrap_err();
    assert!(matches!(err, MigrateError::ChainTampered { .. }));
}

/// Applying everything and rolling everything back leaves no user
/// collections and an empty ledger, as long as nothing is irreversible.
#[tokio::test]
async fn test_full_roundtrip_on_reversible_chain() {
    let driver = MemoryDriver::new();

    // Reversible chain: the root declares nothing, the second migration
    // only transforms (a no-op on an empty database).
    let root = MigrationBuilder::new(SchemaDocument::default())
        .into_definition(MigrationId::new("init"), "init", None)
        .unwrap();
    let chain = Chain::from_definitions(vec![root]).unwrap();

    migrate_to(&driver, &chain, Target::Head).await.unwrap();
    assert_eq!(Ledger::new(&driver).list().await.unwrap().len(), 1);

    migrate_to(&driver, &chain, Target::Back(usize::MAX))
        .await
        .unwrap();
    assert!(user_collections(&driver).await.is_empty());
    assert!(Ledger::new(&driver).list().await.unwrap().is_empty());
}

/// Re-planning against the same sources and ledger yields an identical
/// plan, checksums included.
#[tokio::test]
async fn test_plan_is_deterministic() {
    let driver = MemoryDriver::new();
    let root = create_users_migration();
    let full_name = full_name_migration(&root);
    let chain = Chain::from_definitions(vec![root, full_name]).unwrap();

    let ledger = Ledger::new(&driver);
    let entries = ledger.entries().await.unwrap();

    let first = plan(&chain, &entries, Target::Head).unwrap();
    let second = plan(&chain, &entries, Target::Head).unwrap();
    assert_eq!(first, second);
}

/// Two concurrent migrate invocations: the second fails with LockBusy
/// (exit code 3).
#[tokio::test]
async fn test_lock_contention_between_runs() {
    use mongodbee::lock::MigrationLock;

    let driver = MemoryDriver::new();
    let held = MigrationLock::acquire(&driver, "run-1").await.unwrap();

    let err = MigrationLock::acquire(&driver, "run-2").await.unwrap_err();
    assert!(matches!(err, MigrateError::LockBusy { .. }));
    assert_eq!(err.exit_code(), 3);

    held.release().await.unwrap();
}

/// Seeded documents edited by users survive rollback, with a warning.
#[tokio::test]
async fn test_seed_rollback_leaves_diverged_documents() {
    let driver = MemoryDriver::new();
    let root = create_users_migration();
    let chain = Chain::from_definitions(vec![root.clone()]).unwrap();
    migrate_to(&driver, &chain, Target::Head).await.unwrap();

    // the operator edits Bob
    let bob = driver
        .find_one("user", &doc! { "name": "Bob" })
        .await
        .unwrap()
        .unwrap();
    let bob_id = bob.get("_id").unwrap().clone();
    let mut edited = bob.clone();
    edited.insert("age", 26);
    driver.replace_one("user", &bob_id, &edited).await.unwrap();

    // repair-roll the root back (a plain rollback is blocked: it creates)
    let ledger = Ledger::new(&driver);
    let mut entry = ledger.entries().await.unwrap().remove(0);
    entry.status = LedgerStatus::Dirty;
    let repair = mongodbee::planner::plan_repair(&chain, &entry).unwrap();

    let report = Executor::new(&driver, 500).execute(&repair).await.unwrap();
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.contains("diverged")),
        "expected a divergence warning, got {:?}",
        report.warnings
    );
}
