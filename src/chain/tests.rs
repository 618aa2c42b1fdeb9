use super::*;
use crate::migration::{MigrationBuilder, TransformSpec, TransformStep, ValueExpr};
use crate::schema::SchemaNode;
use bson::doc;

fn user_schema() -> SchemaNode {
    SchemaNode::object(vec![
        ("_id", SchemaNode::db_id("user")),
        ("name", SchemaNode::string()),
    ])
}

fn root_definition() -> MigrationDefinition {
    let mut schemas = SchemaDocument::default();
    schemas.collections.insert("user".into(), user_schema());

    MigrationBuilder::new(schemas)
        .create_collection("user")
        .seed(vec![doc! { "name": "Alice" }])
        .end()
        .into_definition(MigrationId::new("create-users"), "create-users", None)
        .unwrap()
}

fn child_definition(parent: &MigrationDefinition, name: &str) -> MigrationDefinition {
    let mut schemas = parent.schemas.clone();
    schemas.collections.insert(
        "user".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("user")),
            ("name", SchemaNode::string()),
            ("fullName", SchemaNode::string()),
        ]),
    );

    MigrationBuilder::new(schemas)
        .collection("user")
        .transform(TransformSpec {
            up: vec![TransformStep::Set {
                field: "fullName".into(),
                value: ValueExpr::Field("name".into()),
            }],
            down: Some(vec![TransformStep::Unset {
                field: "fullName".into(),
            }]),
            lossy: false,
        })
        .end()
        .into_definition(MigrationId::new(name), name, Some(parent.id.clone()))
        .unwrap()
}

#[test]
fn test_chain_links_root_first() {
    let root = root_definition();
    let child = child_definition(&root, "add-full-name");

    // out of order on purpose
    let chain = Chain::from_definitions(vec![child.clone(), root.clone()]).unwrap();

    assert_eq!(chain.len(), 2);
    assert_eq!(chain.migrations()[0].id, root.id);
    assert_eq!(chain.migrations()[1].parent, Some(root.id.clone()));
    assert!(chain.migrations()[0].id < chain.migrations()[1].id);
    assert_eq!(chain.head().unwrap().id, child.id);
}

#[test]
fn test_parent_missing() {
    let root = root_definition();
    let mut child = child_definition(&root, "add-full-name");
    child.parent = Some(MigrationId::new("phantom"));

    let err = Chain::from_definitions(vec![root, child]).unwrap_err();
    assert!(matches!(err, MigrateError::ParentMissing { .. }));
}

#[test]
fn test_root_ambiguous_and_missing() {
    let first = root_definition();
    let second = root_definition();
    let err = Chain::from_definitions(vec![first.clone(), second]).unwrap_err();
    assert!(matches!(err, MigrateError::RootAmbiguous { .. }));

    let mut orphan = child_definition(&first, "add-full-name");
    orphan.parent = Some(orphan.id.clone());
    let err = Chain::from_definitions(vec![orphan]).unwrap_err();
    assert!(matches!(err, MigrateError::RootMissing));
}

#[test]
fn test_branch_rejected() {
    let root = root_definition();
    let left = child_definition(&root, "left");
    let right = child_definition(&root, "right");

    let err = Chain::from_definitions(vec![root, left, right]).unwrap_err();
    assert!(matches!(err, MigrateError::ChainMalformed(_)));
}

#[test]
fn test_cycle_rejected() {
    let root = root_definition();
    let mut a = child_definition(&root, "a");
    let mut b = child_definition(&root, "b");
    // a -> b -> a, disconnected from the root
    a.parent = Some(b.id.clone());
    b.parent = Some(a.id.clone());

    let err = Chain::from_definitions(vec![root, a, b]).unwrap_err();
    assert!(matches!(err, MigrateError::ChainMalformed(_)));
}

#[test]
fn test_uncovered_new_collection() {
    let root = root_definition();

    // a second collection appears in the schema without a create operation
    let mut schemas = root.schemas.clone();
    schemas.collections.insert("post".into(), user_schema());
    let child = MigrationBuilder::new(schemas)
        .into_definition(MigrationId::new("add-posts"), "add-posts", Some(root.id.clone()))
        .unwrap();

    let err = Chain::from_definitions(vec![root, child]).unwrap_err();
    match err {
        MigrateError::SchemaDriftUncovered { path, .. } => {
            assert_eq!(path, "collections.post");
        }
        other => panic!("expected SchemaDriftUncovered, got {:?}", other),
    }
}

#[test]
fn test_uncovered_required_field() {
    let root = root_definition();

    // required field appears without a transform
    let mut schemas = root.schemas.clone();
    schemas.collections.insert(
        "user".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("user")),
            ("name", SchemaNode::string()),
            ("email", SchemaNode::string()),
        ]),
    );
    let child = MigrationBuilder::new(schemas)
        .into_definition(MigrationId::new("add-email"), "add-email", Some(root.id.clone()))
        .unwrap();

    let err = Chain::from_definitions(vec![root, child]).unwrap_err();
    assert!(matches!(err, MigrateError::SchemaDriftUncovered { .. }));
}

#[test]
fn test_optional_field_needs_no_coverage() {
    let root = root_definition();

    let mut schemas = root.schemas.clone();
    schemas.collections.insert(
        "user".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("user")),
            ("name", SchemaNode::string()),
            ("bio", SchemaNode::string().optional()),
        ]),
    );
    let child = MigrationBuilder::new(schemas)
        .into_definition(MigrationId::new("add-bio"), "add-bio", Some(root.id.clone()))
        .unwrap();

    Chain::from_definitions(vec![root, child]).unwrap();
}

#[test]
fn test_operation_referencing_unknown_collection() {
    let mut schemas = SchemaDocument::default();
    schemas.collections.insert("user".into(), user_schema());

    let definition = MigrationBuilder::new(schemas)
        .create_collection("user")
        .end()
        .update_indexes("ghost")
        .into_definition(MigrationId::new("bad"), "bad", None)
        .unwrap();

    let err = Chain::from_definitions(vec![definition]).unwrap_err();
    assert!(matches!(err, MigrateError::SchemaDriftUncovered { .. }));
}

#[test]
fn test_load_is_deterministic() {
    let root = root_definition();
    let child = child_definition(&root, "add-full-name");

    let dir = tempfile::tempdir().unwrap();
    for definition in [&root, &child] {
        crate::migration::file::write_migration_file(
            dir.path(),
            &crate::migration::MigrationFile::from_definition(definition),
        )
        .unwrap();
    }

    let first = Chain::load(dir.path()).unwrap();
    let second = Chain::load(dir.path()).unwrap();

    assert_eq!(first.len(), 2);
    for migration in first.migrations() {
        assert_eq!(
            first.checksum(&migration.id),
            second.checksum(&migration.id)
        );
    }
}
