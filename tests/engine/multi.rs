//! Multi-typed collections, multi-model instances, renames.

use crate::helpers::*;
use bson::doc;
use mongodbee::chain::Chain;
use mongodbee::constants::INFORMATION_DOCUMENT_ID;
use mongodbee::driver::{DriverAdapter, MemoryDriver};
use mongodbee::error::MigrateError;
use mongodbee::executor::Executor;
use mongodbee::ident::{MigrationId, new_db_id, parse_db_id};
use mongodbee::ledger::{Ledger, LedgerStatus};
use mongodbee::migration::{MigrationBuilder, MigrationDefinition};
use mongodbee::planner::{Target, plan_repair};
use mongodbee::schema::{SchemaDocument, SchemaNode};
use std::collections::BTreeMap;

fn journal_schemas() -> SchemaDocument {
    let mut types = BTreeMap::new();
    types.insert(
        "note".to_string(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("note")),
            ("text", SchemaNode::string()),
        ]),
    );
    types.insert(
        "task".to_string(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("task")),
            ("text", SchemaNode::string()),
            ("done", SchemaNode::boolean()),
        ]),
    );

    let mut schemas = SchemaDocument::default();
    schemas.multi_collections.insert("journal".into(), types);
    schemas
}

fn journal_migration() -> MigrationDefinition {
    MigrationBuilder::new(journal_schemas())
        .create_multi_collection("journal")
        .r#type("note")
        .seed(vec![doc! { "text": "first note" }])
        .end()
        .r#type("task")
        .seed(vec![doc! { "text": "first task", "done": false }])
        .end()
        .end()
        .into_definition(MigrationId::new("create-journal"), "create-journal", None)
        .unwrap()
}

/// Multi-collection creation installs the marker document, and seeded
/// documents get ids tagged with their type.
#[tokio::test]
async fn test_multi_collection_seeding_and_marker() {
    let driver = MemoryDriver::new();
    let chain = Chain::from_definitions(vec![journal_migration()]).unwrap();

    migrate_to(&driver, &chain, Target::Head).await.unwrap();

    let marker = driver
        .find_one("journal", &doc! { "_id": INFORMATION_DOCUMENT_ID })
        .await
        .unwrap()
        .expect("information marker");
    assert_eq!(marker.get_str("kind").unwrap(), "multi-collection");

    let docs = driver.dump("journal").await;
    // marker + one note + one task
    assert_eq!(docs.len(), 3);
    for doc in docs {
        let id = doc.get_str("_id").unwrap();
        if id == INFORMATION_DOCUMENT_ID {
            continue;
        }
        let tag = parse_db_id(id).unwrap().tag;
        assert!(tag == "note" || tag == "task");
        if tag == "task" {
            assert!(doc.get_bool("done").is_ok());
        }
    }
}

/// Typed transforms only rewrite documents of their type and never the
/// marker.
#[tokio::test]
async fn test_typed_transform_scopes_to_tag() {
    use mongodbee::migration::{TransformSpec, TransformStep, ValueExpr};

    let driver = MemoryDriver::new();
    let root = journal_migration();

    let mut schemas = root.schemas.clone();
    let types = schemas.multi_collections.get_mut("journal").unwrap();
    types.insert(
        "task".to_string(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("task")),
            ("text", SchemaNode::string()),
            ("done", SchemaNode::boolean()),
            ("label", SchemaNode::string()),
        ]),
    );

    let label_tasks = MigrationBuilder::new(schemas)
        .multi_collection("journal")
        .r#type("task")
        .transform(TransformSpec {
            up: vec![TransformStep::Set {
                field: "label".into(),
                value: ValueExpr::Field("text".into()),
            }],
            down: Some(vec![TransformStep::Unset {
                field: "label".into(),
            }]),
            lossy: false,
        })
        .end()
        .end()
        .into_definition(
            MigrationId::new("label-tasks"),
            "label-tasks",
            Some(root.id.clone()),
        )
        .unwrap();

    let chain = Chain::from_definitions(vec![root, label_tasks]).unwrap();
    migrate_to(&driver, &chain, Target::Head).await.unwrap();

    for doc in driver.dump("journal").await {
        let id = doc.get_str("_id").unwrap();
        match parse_db_id(id).map(|p| p.tag) {
            Some(tag) if tag == "task" => assert!(doc.contains_key("label")),
            _ => assert!(!doc.contains_key("label")),
        }
    }
}

/// Multi-model instances are discovered through their marker, and vanish
/// from discovery once their creating migration is rolled back.
#[tokio::test]
async fn test_multi_model_instance_discovery_roundtrip() {
    let driver = MemoryDriver::new();

    let mut types = BTreeMap::new();
    types.insert(
        "item".to_string(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("item")),
            ("label", SchemaNode::string()),
        ]),
    );
    let mut schemas = SchemaDocument::default();
    schemas.multi_models.insert("workspace".into(), types);

    let root = MigrationBuilder::new(schemas)
        .create_multi_model_instance("workspace_alpha", "workspace")
        .r#type("item")
        .seed(vec![doc! { "label": "starter" }])
        .end()
        .end()
        .into_definition(
            MigrationId::new("create-workspace-alpha"),
            "create-workspace-alpha",
            None,
        )
        .unwrap();
    let chain = Chain::from_definitions(vec![root]).unwrap();

    migrate_to(&driver, &chain, Target::Head).await.unwrap();

    let ledger = Ledger::new(&driver);
    let discovered = ledger
        .discover_multi_model_instances("workspace")
        .await
        .unwrap();
    assert_eq!(discovered, vec!["workspace_alpha".to_string()]);

    // seeded item carries the type tag
    let items: Vec<_> = driver
        .dump("workspace_alpha")
        .await
        .into_iter()
        .filter(|d| d.get_str("_id") != Ok(INFORMATION_DOCUMENT_ID))
        .collect();
    assert_eq!(items.len(), 1);
    assert_eq!(parse_db_id(items[0].get_str("_id").unwrap()).unwrap().tag, "item");

    // a creating migration only rolls back through repair
    let mut entry = ledger.entries().await.unwrap().remove(0);
    entry.status = LedgerStatus::Dirty;
    let repair = plan_repair(&chain, &entry).unwrap();
    Executor::new(&driver, 500).execute(&repair).await.unwrap();

    assert!(
        ledger
            .discover_multi_model_instances("workspace")
            .await
            .unwrap()
            .is_empty()
    );
    assert!(Ledger::new(&driver).list().await.unwrap().is_empty());
}

/// Renames move the physical collection and invert cleanly.
#[tokio::test]
async fn test_rename_collection_and_rollback() {
    let driver = MemoryDriver::new();
    let root = create_users_migration();

    let mut schemas = SchemaDocument::default();
    schemas
        .collections
        .insert("people".into(), root.schemas.collections["user"].clone());
    let rename = MigrationBuilder::new(schemas)
        .rename_collection("user", "people")
        .into_definition(
            MigrationId::new("rename-users"),
            "rename-users",
            Some(root.id.clone()),
        )
        .unwrap();

    let chain = Chain::from_definitions(vec![root, rename]).unwrap();
    migrate_to(&driver, &chain, Target::Head).await.unwrap();

    assert!(!driver.collection_exists("user").await);
    assert!(driver.collection_exists("people").await);
    assert_eq!(driver.dump("people").await.len(), 2);

    migrate_to(&driver, &chain, Target::Back(1)).await.unwrap();
    assert!(driver.collection_exists("user").await);
    assert!(!driver.collection_exists("people").await);
}

/// Seeding a multi type with a foreign id tag is rejected at build time.
#[tokio::test]
async fn test_wrong_type_tag_rejected() {
    let err = MigrationBuilder::new(journal_schemas())
        .create_multi_collection("journal")
        .r#type("note")
        .seed(vec![doc! { "_id": new_db_id("task"), "text": "nope" }])
        .end()
        .end()
        .compile()
        .unwrap_err();
    assert!(matches!(err, MigrateError::SeedInvalid { .. }));
}
