//! Executor mechanics: batching, pagination, index sync, cancellation.

use crate::helpers::*;
use bson::doc;
use mongodbee::chain::Chain;
use mongodbee::driver::{DriverAdapter, MemoryDriver};
use mongodbee::error::MigrateError;
use mongodbee::executor::{CancelFlag, Executor};
use mongodbee::ident::MigrationId;
use mongodbee::ledger::Ledger;
use mongodbee::migration::{
    MigrationBuilder, TransformSpec, TransformStep, ValueExpr,
};
use mongodbee::planner::{Target, plan};
use mongodbee::schema::{IndexOptions, IndexSpec, SchemaDocument, SchemaNode};

/// Transforms run in `_id` order and touch every document even when the
/// collection spans many batches.
#[tokio::test]
async fn test_transform_batches_cover_all_documents() {
    let driver = MemoryDriver::new();
    let root = create_users_migration();
    let full_name = full_name_migration(&root);
    let chain = Chain::from_definitions(vec![root.clone(), full_name]).unwrap();

    // apply the root, then bulk-insert extra users out of band
    let ledger = Ledger::new(&driver);
    let first = plan(&chain, &[], Target::Id(root.id.clone())).unwrap();
    Executor::new(&driver, 500).execute(&first).await.unwrap();

    let extras: Vec<_> = (0..25)
        .map(|i| {
            doc! {
                "_id": mongodbee::ident::new_db_id("user"),
                "name": format!("u{}", i),
                "age": 20 + i,
            }
        })
        .collect();
    driver.insert_many("user", &extras).await.unwrap();

    // tiny batch size forces many pagination rounds
    let entries = ledger.entries().await.unwrap();
    let second = plan(&chain, &entries, Target::Head).unwrap();
    Executor::new(&driver, 3).execute(&second).await.unwrap();

    let docs = driver.dump("user").await;
    assert_eq!(docs.len(), 27);
    for doc in docs {
        assert_eq!(doc.get_str("fullName"), doc.get_str("name"));
    }
}

/// Cancellation between batches leaves the migration dirty.
#[tokio::test]
async fn test_cancellation_marks_dirty() {
    let driver = MemoryDriver::new();
    let root = create_users_migration();
    let full_name = full_name_migration(&root);
    let chain = Chain::from_definitions(vec![root.clone(), full_name]).unwrap();

    migrate_to(&driver, &chain, Target::Id(root.id.clone()))
        .await
        .unwrap();

    let cancel = CancelFlag::new();
    cancel.cancel();

    let ledger = Ledger::new(&driver);
    let entries = ledger.entries().await.unwrap();
    let pending = plan(&chain, &entries, Target::Head).unwrap();
    let err = Executor::new(&driver, 500)
        .with_cancel(cancel)
        .execute(&pending)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::Cancelled));
    assert_eq!(err.exit_code(), 2);

    assert!(ledger.dirty_entry().await.unwrap().is_some());
}

/// A transform whose output violates the target schema fails the whole
/// migration.
#[tokio::test]
async fn test_transform_violating_schema_fails() {
    let driver = MemoryDriver::new();
    let root = create_users_migration();

    // fullName is declared as a string, but the transform copies age
    let mut schemas = root.schemas.clone();
    schemas.collections.insert(
        "user".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("user")),
            ("name", SchemaNode::string()),
            ("age", SchemaNode::number()),
            ("fullName", SchemaNode::string()),
        ]),
    );
    let broken = MigrationBuilder::new(schemas)
        .collection("user")
        .transform(TransformSpec {
            up: vec![TransformStep::Set {
                field: "fullName".into(),
                value: ValueExpr::Field("age".into()),
            }],
            down: Some(vec![TransformStep::Unset {
                field: "fullName".into(),
            }]),
            lossy: false,
        })
        .end()
        .into_definition(MigrationId::new("broken"), "broken", Some(root.id.clone()))
        .unwrap();

    let chain = Chain::from_definitions(vec![root, broken]).unwrap();
    let err = migrate_to(&driver, &chain, Target::Head).await.unwrap_err();
    assert!(matches!(err, MigrateError::TransformInvalid { .. }));
}

/// `updateIndexes` drops obsolete physical indexes, creates missing ones,
/// and rebuilds changed ones.
#[tokio::test]
async fn test_update_indexes_reconciles_physical_state() {
    let driver = MemoryDriver::new();

    let mut v1 = SchemaDocument::default();
    v1.collections.insert(
        "user".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("user")),
            ("email", SchemaNode::string()),
        ]),
    );
    let root = MigrationBuilder::new(v1.clone())
        .create_collection("user")
        .end()
        .into_definition(MigrationId::new("create-users"), "create-users", None)
        .unwrap();

    let mut v2 = SchemaDocument::default();
    v2.collections.insert(
        "user".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("user")),
            (
                "email",
                SchemaNode::string().indexed(IndexOptions::unique()),
            ),
        ]),
    );
    let reindex = MigrationBuilder::new(v2)
        .update_indexes("user")
        .into_definition(
            MigrationId::new("unique-email"),
            "unique-email",
            Some(root.id.clone()),
        )
        .unwrap();

    let chain = Chain::from_definitions(vec![root.clone(), reindex]).unwrap();

    migrate_to(&driver, &chain, Target::Id(root.id.clone()))
        .await
        .unwrap();

    // a stray index appears out of band
    driver
        .create_index(
            "user",
            &IndexSpec {
                path: "legacy".into(),
                options: IndexOptions::default(),
            },
        )
        .await
        .unwrap();

    migrate_to(&driver, &chain, Target::Head).await.unwrap();

    let indexes = driver.list_indexes("user").await.unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].path, "email");
    assert!(indexes[0].options.unique);
}

/// Seeds honor declared literal ids and generate tagged ids otherwise.
#[tokio::test]
async fn test_seed_id_strategies() {
    let driver = MemoryDriver::new();

    let mut schemas = SchemaDocument::default();
    schemas.collections.insert(
        "settings".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::literal("settings")),
            ("theme", SchemaNode::string()),
        ]),
    );
    let root = MigrationBuilder::new(schemas)
        .create_collection("settings")
        .seed(vec![doc! { "theme": "dark" }])
        .end()
        .into_definition(MigrationId::new("create-settings"), "create-settings", None)
        .unwrap();
    let chain = Chain::from_definitions(vec![root]).unwrap();

    migrate_to(&driver, &chain, Target::Head).await.unwrap();

    let docs = driver.dump("settings").await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].get_str("_id").unwrap(), "settings");
}
