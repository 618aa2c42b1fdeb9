//! Planner behavior: target resolution, inversion, ledger reconciliation.

use crate::helpers::*;
use mongodbee::chain::Chain;
use mongodbee::driver::MemoryDriver;
use mongodbee::error::MigrateError;
use mongodbee::ident::MigrationId;
use mongodbee::ledger::{Direction, Ledger, LedgerEntry, LedgerStatus};
use mongodbee::planner::{PlanStep, Target, plan};

fn entry_for(chain: &Chain, index: usize) -> LedgerEntry {
    let migration = &chain.migrations()[index];
    LedgerEntry {
        migration_id: migration.id.clone(),
        applied_at: chrono::Utc::now(),
        direction: Direction::Up,
        checksum: chain.checksum(&migration.id).unwrap().to_string(),
        status: LedgerStatus::Applied,
    }
}

#[test]
fn test_target_equal_to_head_is_empty_plan() {
    let root = create_users_migration();
    let chain = Chain::from_definitions(vec![root]).unwrap();
    let ledger = vec![entry_for(&chain, 0)];

    let result = plan(&chain, &ledger, Target::Head).unwrap();
    assert!(result.is_empty());

    let by_id = plan(
        &chain,
        &ledger,
        Target::Id(chain.migrations()[0].id.clone()),
    )
    .unwrap();
    assert!(by_id.is_empty());
}

#[test]
fn test_up_plan_covers_pending_suffix() {
    let root = create_users_migration();
    let full_name = full_name_migration(&root);
    let chain = Chain::from_definitions(vec![root, full_name]).unwrap();
    let ledger = vec![entry_for(&chain, 0)];

    let result = plan(&chain, &ledger, Target::Head).unwrap();
    assert_eq!(result.direction, Direction::Up);
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].id, chain.migrations()[1].id);
}

#[test]
fn test_down_plan_reverses_and_inverts() {
    let root = create_users_migration();
    let full_name = full_name_migration(&root);
    let chain = Chain::from_definitions(vec![root, full_name]).unwrap();
    let ledger = vec![entry_for(&chain, 0), entry_for(&chain, 1)];

    let result = plan(&chain, &ledger, Target::Back(1)).unwrap();
    assert_eq!(result.direction, Direction::Down);
    assert_eq!(result.entries.len(), 1);

    // the inverted transform unsets fullName
    let step = &result.entries[0].steps[0];
    match step {
        PlanStep::Transform { spec, .. } => {
            assert!(matches!(
                spec.up[0],
                mongodbee::migration::TransformStep::Unset { .. }
            ));
        }
        other => panic!("expected an inverted transform, got {:?}", other),
    }
}

#[test]
fn test_unknown_target_rejected() {
    let root = create_users_migration();
    let chain = Chain::from_definitions(vec![root]).unwrap();

    let err = plan(
        &chain,
        &[],
        Target::Id(MigrationId::new("never-loaded")),
    )
    .unwrap_err();
    assert!(matches!(err, MigrateError::ConfigInvalid(_)));
}

#[test]
fn test_ledger_divergence_detected() {
    let root = create_users_migration();
    let chain = Chain::from_definitions(vec![root.clone()]).unwrap();

    // ledger knows a migration the chain does not
    let stranger = LedgerEntry {
        migration_id: MigrationId::new("stranger"),
        applied_at: chrono::Utc::now(),
        direction: Direction::Up,
        checksum: "feedface".into(),
        status: LedgerStatus::Applied,
    };

    let err = plan(&chain, &[stranger], Target::Head).unwrap_err();
    match err {
        MigrateError::LedgerDivergent { ids } => assert_eq!(ids.len(), 1),
        other => panic!("expected LedgerDivergent, got {:?}", other),
    }
    assert_eq!(
        MigrateError::LedgerDivergent { ids: vec![] }.exit_code(),
        4
    );
}

#[test]
fn test_dirty_ledger_blocks_planning() {
    let root = create_users_migration();
    let chain = Chain::from_definitions(vec![root]).unwrap();
    let mut entry = entry_for(&chain, 0);
    entry.status = LedgerStatus::Dirty;

    let err = plan(&chain, &[entry], Target::Head).unwrap_err();
    assert!(matches!(err, MigrateError::LedgerBusy { .. }));
}

#[test]
fn test_index_reconciliation_appended_for_surviving_collections() {
    let root = create_users_migration();
    let indexed = unique_email_migration(&root, true);
    let chain = Chain::from_definitions(vec![root, indexed]).unwrap();

    let result = plan(&chain, &[], Target::Head).unwrap();
    let index_steps: Vec<_> = result.entries[1]
        .steps
        .iter()
        .filter(|s| matches!(s, PlanStep::ApplyIndexes { .. }))
        .collect();
    assert_eq!(index_steps.len(), 1);
}

/// Rolling back past the root with steps larger than history is the
/// everything-off plan, not an error.
#[tokio::test]
async fn test_back_saturates_at_root() {
    let driver = MemoryDriver::new();
    let root = empty_chain_root();
    let chain = Chain::from_definitions(vec![root]).unwrap();
    migrate_to(&driver, &chain, Target::Head).await.unwrap();

    let ledger = Ledger::new(&driver);
    let entries = ledger.entries().await.unwrap();
    let result = plan(&chain, &entries, Target::Back(10)).unwrap();
    assert_eq!(result.entries.len(), 1);
}

/// A bare root migration: empty schema state, no operations.
fn empty_chain_root() -> mongodbee::migration::MigrationDefinition {
    use mongodbee::migration::MigrationBuilder;
    use mongodbee::schema::SchemaDocument;

    MigrationBuilder::new(SchemaDocument::default())
        .into_definition(MigrationId::new("init"), "init", None)
        .unwrap()
}
