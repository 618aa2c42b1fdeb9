//! Shared fixtures: schema states and migration chains built through the
//! public builder API, executed against the in-memory driver.

use bson::doc;
use mongodbee::chain::Chain;
use mongodbee::driver::{DriverAdapter, MemoryDriver};
use mongodbee::error::MigrateError;
use mongodbee::executor::{ExecutionReport, Executor};
use mongodbee::ident::MigrationId;
use mongodbee::ledger::Ledger;
use mongodbee::migration::{
    MigrationBuilder, MigrationDefinition, TransformSpec, TransformStep, ValueExpr,
};
use mongodbee::planner::{Target, plan};
use mongodbee::schema::{IndexOptions, SchemaDocument, SchemaNode};

pub fn user_schema_v1() -> SchemaNode {
    SchemaNode::object(vec![
        ("_id", SchemaNode::db_id("user")),
        ("name", SchemaNode::string()),
        ("age", SchemaNode::number()),
    ])
}

pub fn schemas_v1() -> SchemaDocument {
    let mut schemas = SchemaDocument::default();
    schemas.collections.insert("user".into(), user_schema_v1());
    schemas
}

/// Root migration: create `user` and seed two documents.
pub fn create_users_migration() -> MigrationDefinition {
    MigrationBuilder::new(schemas_v1())
        .create_collection("user")
        .seed(vec![
            doc! { "name": "Alice", "age": 30 },
            doc! { "name": "Bob", "age": 25 },
        ])
        .end()
        .into_definition(MigrationId::new("create-users"), "create-users", None)
        .unwrap()
}

/// Second migration: derive `fullName` from `name`, reversibly.
pub fn full_name_migration(parent: &MigrationDefinition) -> MigrationDefinition {
    let mut schemas = parent.schemas.clone();
    schemas.collections.insert(
        "user".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("user")),
            ("name", SchemaNode::string()),
            ("age", SchemaNode::number()),
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
        .into_definition(
            MigrationId::new("add-full-name"),
            "add-full-name",
            Some(parent.id.clone()),
        )
        .unwrap()
}

/// A migration that adds a second collection; irreversible by nature.
pub fn create_posts_migration(parent: &MigrationDefinition) -> MigrationDefinition {
    let mut schemas = parent.schemas.clone();
    schemas.collections.insert(
        "posts".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("post")),
            ("title", SchemaNode::string()),
        ]),
    );

    MigrationBuilder::new(schemas)
        .create_collection("posts")
        .end()
        .into_definition(
            MigrationId::new("create-posts"),
            "create-posts",
            Some(parent.id.clone()),
        )
        .unwrap()
}

/// Schema-only migration turning `user.email` into a unique index.
pub fn unique_email_migration(
    parent: &MigrationDefinition,
    unique: bool,
) -> MigrationDefinition {
    let mut email = SchemaNode::string();
    if unique {
        email = email.indexed(IndexOptions::unique());
    }
    let mut schemas = parent.schemas.clone();
    schemas.collections.insert(
        "user".into(),
        SchemaNode::object(vec![
            ("_id", SchemaNode::db_id("user")),
            ("name", SchemaNode::string()),
            ("age", SchemaNode::number()),
            ("email", email.optional()),
        ]),
    );

    MigrationBuilder::new(schemas)
        .into_definition(
            MigrationId::new("unique-email"),
            "unique-email",
            Some(parent.id.clone()),
        )
        .unwrap()
}

/// Plan from the current ledger state and execute against the driver.
pub async fn migrate_to(
    driver: &MemoryDriver,
    chain: &Chain,
    target: Target,
) -> Result<ExecutionReport, MigrateError> {
    let ledger = Ledger::new(driver);
    let entries = ledger.entries().await?;
    let pending = plan(chain, &entries, target)?;
    Executor::new(driver, 500).execute(&pending).await
}

/// User-visible collections, ignoring the reserved ones.
pub async fn user_collections(driver: &MemoryDriver) -> Vec<String> {
    driver
        .list_collections()
        .await
        .unwrap()
        .into_iter()
        .filter(|name| !name.starts_with("__mongodbee_"))
        .collect()
}
