//! The planner: reconcile (chain, ledger, target) into an executable plan.
//!
//! Pure data transformation, no side effects. The executor consumes the
//! produced steps; `check` feeds them to the in-memory backend instead of
//! the real one.

use crate::chain::Chain;
use crate::error::MigrateError;
use crate::ident::MigrationId;
use crate::ledger::{Direction, LedgerEntry, LedgerStatus};
use crate::migration::{MigrationDefinition, Operation, TransformSpec};
use crate::schema::{
    IndexAction, IndexOptions, SchemaDocument, extract_indexes, indexes::pending_actions,
};
use bson::Document;
use std::collections::BTreeMap;

/// Where to migrate to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The newest migration in the chain.
    Head,
    /// A specific migration (inclusive).
    Id(MigrationId),
    /// N steps back from the current ledger head; 0 is a no-op, rolling
    /// back past the root empties the database.
    Back(usize),
}

/// What kind of physical collection a create step produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionKind {
    Plain,
    Multi,
    MultiModelInstance { model: String },
}

/// One executable step. Seed and transform steps are validated against the
/// owning entry's schema state at execution time.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    CreateCollection {
        name: String,
        kind: CollectionKind,
    },
    DropCollection {
        name: String,
    },
    Seed {
        collection: String,
        type_tag: Option<String>,
        docs: Vec<Document>,
    },
    /// Inverse of a seed: delete documents still equal to their seeded
    /// values; diverged documents are left untouched with a warning.
    DeleteSeeded {
        collection: String,
        docs: Vec<Document>,
    },
    Transform {
        collection: String,
        type_tag: Option<String>,
        spec: TransformSpec,
    },
    /// Precomputed index changes from schema-to-schema reconciliation.
    ApplyIndexes {
        collection: String,
        actions: Vec<IndexAction>,
    },
    /// Reconcile physical indexes against a desired set at execution time
    /// (the `updateIndexes` operation).
    SyncIndexes {
        collection: String,
        desired: BTreeMap<String, IndexOptions>,
    },
    Rename {
        from: String,
        to: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub id: MigrationId,
    pub checksum: String,
    pub steps: Vec<PlanStep>,
    /// Schema state writes of this entry are validated against: the
    /// migration's own state going up, the parent's going down.
    pub schemas: SchemaDocument,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub direction: Direction,
    pub entries: Vec<PlanEntry>,
    pub warnings: Vec<String>,
}

impl Plan {
    pub fn empty() -> Self {
        Plan {
            direction: Direction::Up,
            entries: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compute the plan from the loaded chain, the ledger entries, and the
/// requested target.
pub fn plan(
    chain: &Chain,
    ledger: &[LedgerEntry],
    target: Target,
) -> Result<Plan, MigrateError> {
    if let Some(dirty) = ledger.iter().find(|e| e.status == LedgerStatus::Dirty) {
        return Err(MigrateError::LedgerBusy {
            id: dirty.migration_id.to_string(),
        });
    }

    verify_ledger_matches_chain(chain, ledger)?;

    let applied = ledger.len();
    let target_index = match target {
        Target::Head => chain.len(),
        Target::Id(id) => {
            let position = chain.position(&id).ok_or_else(|| {
                MigrateError::ConfigInvalid(format!("'{}' is not in the migration chain", id))
            })?;
            position + 1
        }
        Target::Back(steps) => applied.saturating_sub(steps),
    };

    if target_index == applied {
        return Ok(Plan::empty());
    }

    if target_index > applied {
        let mut entries = Vec::new();
        for index in applied..target_index {
            let migration = &chain.migrations()[index];
            entries.push(expand_up(chain, index, migration));
        }
        Ok(Plan {
            direction: Direction::Up,
            entries,
            warnings: Vec::new(),
        })
    } else {
        let mut entries = Vec::new();
        for index in (target_index..applied).rev() {
            let migration = &chain.migrations()[index];
            entries.push(expand_down(chain, index, migration, false)?);
        }
        Ok(Plan {
            direction: Direction::Down,
            entries,
            warnings: Vec::new(),
        })
    }
}

/// Repair plan: roll back only the dirty migration, inverting whatever can
/// be inverted. A partial apply never completed, so the irreversibility
/// guard is deliberately bypassed; what cannot be inverted is skipped and
/// reported as a warning.
pub fn plan_repair(chain: &Chain, dirty: &LedgerEntry) -> Result<Plan, MigrateError> {
    let index = chain.position(&dirty.migration_id).ok_or_else(|| {
        MigrateError::LedgerDivergent {
            ids: vec![dirty.migration_id.to_string()],
        }
    })?;
    let migration = &chain.migrations()[index];

    let mut entry = expand_down(chain, index, migration, true)?;
    let mut warnings = Vec::new();
    entry.steps.retain(|step| match step {
        PlanStep::Transform { collection, spec, .. } if spec.up.is_empty() => {
            warnings.push(format!(
                "transform on '{}' has no inverse and was skipped during repair",
                collection
            ));
            false
        }
        _ => true,
    });

    Ok(Plan {
        direction: Direction::Down,
        entries: vec![entry],
        warnings,
    })
}

fn verify_ledger_matches_chain(
    chain: &Chain,
    ledger: &[LedgerEntry],
) -> Result<(), MigrateError> {
    // Applied migrations must form a prefix of the chain, in order.
    let mut divergent = Vec::new();
    for (index, entry) in ledger.iter().enumerate() {
        match chain.migrations().get(index) {
            Some(migration) if migration.id == entry.migration_id => {}
            _ => divergent.push(entry.migration_id.to_string()),
        }
    }
    if !divergent.is_empty() {
        return Err(MigrateError::LedgerDivergent { ids: divergent });
    }

    // Recorded checksums must match the recomputed ones.
    for entry in ledger {
        let computed = chain
            .checksum(&entry.migration_id)
            .expect("prefix-checked id is in the chain");
        if computed != entry.checksum {
            return Err(MigrateError::ChainTampered {
                id: entry.migration_id.to_string(),
                recorded: entry.checksum.clone(),
                computed: computed.to_string(),
            });
        }
    }

    Ok(())
}

/// Indexes declared for one physical collection: a plain collection's own
/// tree, or the union over a multi-collection's type schemas.
fn collection_indexes(
    schemas: &SchemaDocument,
    name: &str,
) -> BTreeMap<String, IndexOptions> {
    if let Some(schema) = schemas.collections.get(name) {
        return extract_indexes(schema);
    }
    let mut merged = BTreeMap::new();
    if let Some(types) = schemas.multi_collections.get(name) {
        for schema in types.values() {
            merged.extend(extract_indexes(schema));
        }
    }
    merged
}

fn expand_up(chain: &Chain, index: usize, migration: &MigrationDefinition) -> PlanEntry {
    let previous = chain.schemas_before(index);
    let mut steps = Vec::new();
    let mut created = Vec::new();

    for operation in &migration.operations {
        match operation {
            Operation::CreateCollection { collection } => {
                created.push(collection.clone());
                steps.push(PlanStep::CreateCollection {
                    name: collection.clone(),
                    kind: CollectionKind::Plain,
                });
            }
            Operation::CreateMultiCollection { collection } => {
                created.push(collection.clone());
                steps.push(PlanStep::CreateCollection {
                    name: collection.clone(),
                    kind: CollectionKind::Multi,
                });
            }
            Operation::CreateMultiModelInstance { instance, model } => {
                created.push(instance.clone());
                steps.push(PlanStep::CreateCollection {
                    name: instance.clone(),
                    kind: CollectionKind::MultiModelInstance {
                        model: model.clone(),
                    },
                });
            }
            Operation::SeedCollection { collection, docs } => {
                steps.push(PlanStep::Seed {
                    collection: collection.clone(),
                    type_tag: None,
                    docs: docs.clone(),
                });
            }
            Operation::SeedMultiCollectionType {
                collection,
                type_tag,
                docs,
            }
            | Operation::SeedMultiModelInstanceType {
                instance: collection,
                type_tag,
                docs,
            } => {
                steps.push(PlanStep::Seed {
                    collection: collection.clone(),
                    type_tag: Some(type_tag.clone()),
                    docs: docs.clone(),
                });
            }
            Operation::TransformCollection { collection, .. } => {
                steps.push(PlanStep::Transform {
                    collection: collection.clone(),
                    type_tag: None,
                    spec: operation.transform_spec().expect("transform operation"),
                });
            }
            Operation::TransformMultiCollectionType {
                collection,
                type_tag,
                ..
            } => {
                steps.push(PlanStep::Transform {
                    collection: collection.clone(),
                    type_tag: Some(type_tag.clone()),
                    spec: operation.transform_spec().expect("transform operation"),
                });
            }
            Operation::UpdateIndexes { collection } => {
                steps.push(PlanStep::SyncIndexes {
                    collection: collection.clone(),
                    desired: collection_indexes(&migration.schemas, collection),
                });
            }
            Operation::RenameCollection { from, to }
            | Operation::RenameMultiCollection { from, to } => {
                steps.push(PlanStep::Rename {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }
    }

    // Index reconciliation for collections that survive from the previous
    // state; newly created ones get their indexes at creation.
    for name in migration
        .schemas
        .collections
        .keys()
        .chain(migration.schemas.multi_collections.keys())
    {
        if created.contains(name) {
            continue;
        }
        let before = collection_indexes(&previous, name);
        let after = collection_indexes(&migration.schemas, name);
        let actions =
            pending_actions(crate::schema::indexes::diff_index_maps(&before, &after));
        if !actions.is_empty() {
            steps.push(PlanStep::ApplyIndexes {
                collection: name.clone(),
                actions,
            });
        }
    }

    PlanEntry {
        id: migration.id.clone(),
        checksum: chain
            .checksum(&migration.id)
            .expect("chain contains its own migrations")
            .to_string(),
        steps,
        schemas: migration.schemas.clone(),
    }
}

fn expand_down(
    chain: &Chain,
    index: usize,
    migration: &MigrationDefinition,
    repair: bool,
) -> Result<PlanEntry, MigrateError> {
    if !repair && migration.is_irreversible() {
        return Err(MigrateError::IrreversibleRollback {
            id: migration.id.to_string(),
        });
    }

    let previous = chain.schemas_before(index);
    let mut steps = Vec::new();

    for operation in migration.operations.iter().rev() {
        match operation {
            Operation::CreateCollection { collection }
            | Operation::CreateMultiCollection { collection } => {
                steps.push(PlanStep::DropCollection {
                    name: collection.clone(),
                });
            }
            Operation::CreateMultiModelInstance { instance, .. } => {
                steps.push(PlanStep::DropCollection {
                    name: instance.clone(),
                });
            }
            Operation::SeedCollection { collection, docs }
            | Operation::SeedMultiCollectionType {
                collection, docs, ..
            }
            | Operation::SeedMultiModelInstanceType {
                instance: collection,
                docs,
                ..
            } => {
                steps.push(PlanStep::DeleteSeeded {
                    collection: collection.clone(),
                    docs: docs.clone(),
                });
            }
            Operation::TransformCollection { collection, .. } => {
                let spec = operation.transform_spec().expect("transform operation");
                match spec.inverted() {
                    Some(inverse) => steps.push(PlanStep::Transform {
                        collection: collection.clone(),
                        type_tag: None,
                        spec: inverse,
                    }),
                    None if repair => steps.push(PlanStep::Transform {
                        collection: collection.clone(),
                        type_tag: None,
                        spec: TransformSpec {
                            up: Vec::new(),
                            down: None,
                            lossy: false,
                        },
                    }),
                    None => {
                        return Err(MigrateError::IrreversibleRollback {
                            id: migration.id.to_string(),
                        });
                    }
                }
            }
            Operation::TransformMultiCollectionType {
                collection,
                type_tag,
                ..
            } => {
                let spec = operation.transform_spec().expect("transform operation");
                match spec.inverted() {
                    Some(inverse) => steps.push(PlanStep::Transform {
                        collection: collection.clone(),
                        type_tag: Some(type_tag.clone()),
                        spec: inverse,
                    }),
                    None if repair => steps.push(PlanStep::Transform {
                        collection: collection.clone(),
                        type_tag: Some(type_tag.clone()),
                        spec: TransformSpec {
                            up: Vec::new(),
                            down: None,
                            lossy: false,
                        },
                    }),
                    None => {
                        return Err(MigrateError::IrreversibleRollback {
                            id: migration.id.to_string(),
                        });
                    }
                }
            }
            Operation::UpdateIndexes { collection } => {
                steps.push(PlanStep::SyncIndexes {
                    collection: collection.clone(),
                    desired: collection_indexes(&previous, collection),
                });
            }
            Operation::RenameCollection { from, to }
            | Operation::RenameMultiCollection { from, to } => {
                steps.push(PlanStep::Rename {
                    from: to.clone(),
                    to: from.clone(),
                });
            }
        }
    }

    // Inverse index reconciliation: back to the parent state.
    for name in previous
        .collections
        .keys()
        .chain(previous.multi_collections.keys())
    {
        let before = collection_indexes(&migration.schemas, name);
        let after = collection_indexes(&previous, name);
        let actions =
            pending_actions(crate::schema::indexes::diff_index_maps(&before, &after));
        if !actions.is_empty() {
            steps.push(PlanStep::ApplyIndexes {
                collection: name.clone(),
                actions,
            });
        }
    }

    Ok(PlanEntry {
        id: migration.id.clone(),
        checksum: chain
            .checksum(&migration.id)
            .expect("chain contains its own migrations")
            .to_string(),
        steps,
        schemas: previous,
    })
}
