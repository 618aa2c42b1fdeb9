//! Loading and validation of the migration chain.
//!
//! Parent links must form one linear sequence: a single root, no branches,
//! no cycles, every parent resolvable. On top of the link structure, a
//! coarse drift check verifies that consecutive schema states are actually
//! reachable through the declared operations.

use crate::error::MigrateError;
use crate::ident::MigrationId;
use crate::migration::{MigrationDefinition, Operation, load_migration_file};
use crate::migration::file::discover_migration_files;
use crate::schema::{EditKind, SchemaDocument, diff_documents};
use anyhow::Result;
use itertools::Itertools;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// The totally ordered migration chain, root first.
#[derive(Debug, Clone)]
pub struct Chain {
    migrations: Vec<MigrationDefinition>,
    checksums: BTreeMap<MigrationId, String>,
}

impl Chain {
    /// Load every migration artifact in a directory and link the chain.
    pub fn load(dir: &Path) -> Result<Chain> {
        let files = discover_migration_files(dir)?;
        info!("Loading {} migration file(s) from {}", files.len(), dir.display());

        let mut definitions = Vec::with_capacity(files.len());
        for file in &files {
            definitions.push(load_migration_file(file)?);
        }

        let chain = Chain::from_definitions(definitions)?;
        Ok(chain)
    }

    /// Link and validate a set of in-memory definitions.
    pub fn from_definitions(
        definitions: Vec<MigrationDefinition>,
    ) -> Result<Chain, MigrateError> {
        if definitions.is_empty() {
            return Ok(Chain {
                migrations: Vec::new(),
                checksums: BTreeMap::new(),
            });
        }

        let ordered = link(definitions)?;

        for (index, migration) in ordered.iter().enumerate() {
            let empty = SchemaDocument::default();
            let previous = if index == 0 {
                &empty
            } else {
                &ordered[index - 1].schemas
            };
            check_coverage(previous, migration)?;
        }

        let checksums = ordered
            .iter()
            .map(|m| (m.id.clone(), m.checksum()))
            .collect();

        Ok(Chain {
            migrations: ordered,
            checksums,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn migrations(&self) -> &[MigrationDefinition] {
        &self.migrations
    }

    pub fn get(&self, id: &MigrationId) -> Option<&MigrationDefinition> {
        self.migrations.iter().find(|m| &m.id == id)
    }

    pub fn position(&self, id: &MigrationId) -> Option<usize> {
        self.migrations.iter().position(|m| &m.id == id)
    }

    /// The last migration in the chain, i.e. the newest state.
    pub fn head(&self) -> Option<&MigrationDefinition> {
        self.migrations.last()
    }

    pub fn checksum(&self, id: &MigrationId) -> Option<&str> {
        self.checksums.get(id).map(String::as_str)
    }

    /// The schema state before the migration at `index` (empty for the
    /// root).
    pub fn schemas_before(&self, index: usize) -> SchemaDocument {
        if index == 0 {
            SchemaDocument::default()
        } else {
            self.migrations[index - 1].schemas.clone()
        }
    }
}

/// Order definitions by following parent links from the unique root.
fn link(definitions: Vec<MigrationDefinition>) -> Result<Vec<MigrationDefinition>, MigrateError> {
    // 1. every non-root parent resolves
    for definition in &definitions {
        if let Some(parent) = &definition.parent {
            if !definitions.iter().any(|d| &d.id == parent) {
                return Err(MigrateError::ParentMissing {
                    id: definition.id.to_string(),
                    parent: parent.to_string(),
                });
            }
        }
    }

    // 2. exactly one root
    let mut roots = definitions.iter().filter(|d| d.parent.is_none());
    let root = roots.next().ok_or(MigrateError::RootMissing)?;
    if let Some(second) = roots.next() {
        return Err(MigrateError::RootAmbiguous {
            first: root.id.to_string(),
            second: second.id.to_string(),
        });
    }

    // 3. no branches: a parent may have at most one child
    for definition in &definitions {
        if let Some(parent) = &definition.parent {
            let siblings: Vec<_> = definitions
                .iter()
                .filter(|d| d.parent.as_ref() == Some(parent))
                .collect();
            if siblings.len() > 1 {
                return Err(MigrateError::ChainMalformed(format!(
                    "'{}' has multiple children ({})",
                    parent,
                    siblings.iter().map(|d| d.id.to_string()).join(", ")
                )));
            }
        }
    }

    // 4. no cycles: parent edges must admit a topological order
    let mut graph = DiGraph::<&MigrationId, ()>::new();
    let mut nodes = BTreeMap::new();
    for definition in &definitions {
        nodes.insert(&definition.id, graph.add_node(&definition.id));
    }
    for definition in &definitions {
        if let Some(parent) = &definition.parent {
            graph.add_edge(nodes[parent], nodes[&definition.id], ());
        }
    }
    toposort(&graph, None).map_err(|cycle| {
        MigrateError::ChainMalformed(format!(
            "cycle through '{}'",
            graph[cycle.node_id()]
        ))
    })?;

    // Walk child links from the root; with the checks above this visits
    // every definition exactly once.
    let total = definitions.len();
    let mut by_parent: BTreeMap<&MigrationId, &MigrationDefinition> = definitions
        .iter()
        .filter_map(|d| d.parent.as_ref().map(|p| (p, d)))
        .collect();

    let mut ordered = vec![root.clone()];
    let mut cursor = &root.id;
    while let Some(next) = by_parent.remove(cursor) {
        ordered.push(next.clone());
        cursor = &next.id;
    }

    if ordered.len() != total {
        let orphans: Vec<String> = definitions
            .iter()
            .filter(|d| !ordered.iter().any(|o| o.id == d.id))
            .map(|d| d.id.to_string())
            .collect();
        return Err(MigrateError::ChainMalformed(format!(
            "not reachable from the root: {}",
            orphans.join(", ")
        )));
    }

    // 5. ids sort chronologically along the chain
    for pair in ordered.windows(2) {
        if pair[1].id <= pair[0].id {
            return Err(MigrateError::ChainMalformed(format!(
                "'{}' does not sort after its parent '{}'",
                pair[1].id, pair[0].id
            )));
        }
    }

    Ok(ordered)
}

/// Coarse reachability check between consecutive schema states: every
/// target an operation names must exist in the final schema, and every
/// structural schema change must be covered by an operation.
fn check_coverage(
    previous: &SchemaDocument,
    migration: &MigrationDefinition,
) -> Result<(), MigrateError> {
    let schemas = &migration.schemas;
    let operations = &migration.operations;
    let id = migration.id.to_string();

    let drift = |path: String| MigrateError::SchemaDriftUncovered {
        id: id.clone(),
        path,
    };

    // Operations must reference declared targets.
    for operation in operations {
        match operation {
            Operation::CreateCollection { collection }
            | Operation::SeedCollection { collection, .. }
            | Operation::TransformCollection { collection, .. } => {
                if !schemas.collections.contains_key(collection) {
                    return Err(drift(format!("collections.{}", collection)));
                }
            }
            Operation::CreateMultiCollection { collection } => {
                if !schemas.multi_collections.contains_key(collection) {
                    return Err(drift(format!("multiCollections.{}", collection)));
                }
            }
            Operation::SeedMultiCollectionType {
                collection,
                type_tag,
                ..
            }
            | Operation::TransformMultiCollectionType {
                collection,
                type_tag,
                ..
            } => {
                if schemas.multi_collection_type(collection, type_tag).is_none() {
                    return Err(drift(format!(
                        "multiCollections.{}.{}",
                        collection, type_tag
                    )));
                }
            }
            Operation::CreateMultiModelInstance { model, .. } => {
                if !schemas.multi_models.contains_key(model) {
                    return Err(drift(format!("multiModels.{}", model)));
                }
            }
            Operation::SeedMultiModelInstanceType {
                instance, type_tag, ..
            } => {
                let model = operations.iter().find_map(|op| match op {
                    Operation::CreateMultiModelInstance {
                        instance: created,
                        model,
                    } if created == instance => Some(model),
                    _ => None,
                });
                match model {
                    Some(model) if schemas.multi_model_type(model, type_tag).is_some() => {}
                    Some(model) => {
                        return Err(drift(format!("multiModels.{}.{}", model, type_tag)));
                    }
                    // Seeding an instance this migration did not create is
                    // only resolvable at run time via discovery.
                    None => {}
                }
            }
            Operation::UpdateIndexes { collection } => {
                let known = schemas.collections.contains_key(collection)
                    || schemas.multi_collections.contains_key(collection)
                    || operations.iter().any(|op| {
                        matches!(op, Operation::CreateMultiModelInstance { instance, .. }
                            if instance == collection)
                    });
                if !known {
                    return Err(drift(format!("collections.{}", collection)));
                }
            }
            Operation::RenameCollection { to, .. } => {
                if !schemas.collections.contains_key(to) {
                    return Err(drift(format!("collections.{}", to)));
                }
            }
            Operation::RenameMultiCollection { to, .. } => {
                if !schemas.multi_collections.contains_key(to) {
                    return Err(drift(format!("multiCollections.{}", to)));
                }
            }
        }
    }

    // Structural changes must be covered by operations.
    let creates_collection = |name: &str| {
        operations.iter().any(|op| matches!(op,
            Operation::CreateCollection { collection } if collection == name))
            || operations.iter().any(|op| matches!(op,
                Operation::RenameCollection { to, .. } if to == name))
    };
    let removes_collection = |name: &str| {
        operations.iter().any(|op| matches!(op,
            Operation::RenameCollection { from, .. } if from == name))
    };
    let transforms_collection = |name: &str| {
        operations.iter().any(|op| matches!(op,
            Operation::TransformCollection { collection, .. } if collection == name))
    };
    let transforms_multi_type = |name: &str, tag: &str| {
        operations.iter().any(|op| matches!(op,
            Operation::TransformMultiCollectionType { collection, type_tag, .. }
                if collection == name && type_tag == tag))
    };

    for name in schemas.collections.keys() {
        if !previous.collections.contains_key(name) && !creates_collection(name) {
            return Err(drift(format!("collections.{}", name)));
        }
    }
    for name in previous.collections.keys() {
        if !schemas.collections.contains_key(name) && !removes_collection(name) {
            return Err(drift(format!("collections.{}", name)));
        }
    }

    let creates_multi = |name: &str| {
        operations.iter().any(|op| matches!(op,
            Operation::CreateMultiCollection { collection } if collection == name))
            || operations.iter().any(|op| matches!(op,
                Operation::RenameMultiCollection { to, .. } if to == name))
    };
    let removes_multi = |name: &str| {
        operations.iter().any(|op| matches!(op,
            Operation::RenameMultiCollection { from, .. } if from == name))
    };

    for name in schemas.multi_collections.keys() {
        if !previous.multi_collections.contains_key(name) && !creates_multi(name) {
            return Err(drift(format!("multiCollections.{}", name)));
        }
    }
    for name in previous.multi_collections.keys() {
        if !schemas.multi_collections.contains_key(name) && !removes_multi(name) {
            return Err(drift(format!("multiCollections.{}", name)));
        }
    }

    // Field-level adds and removes inside surviving collections need a
    // transform, unless the document shape is unaffected (optional or
    // nullable fields may simply be absent).
    for edit in diff_documents(previous, schemas) {
        if edit.path.len() < 3 {
            continue;
        }
        let section = edit.path[0].as_str();
        let name = edit.path[1].as_str();

        let survives = match section {
            "collections" => {
                previous.collections.contains_key(name)
                    && schemas.collections.contains_key(name)
            }
            // Type-level adds/removes (path length 3) leave existing
            // documents untouched; only deeper field edits matter.
            "multiCollections" if edit.path.len() >= 4 => {
                previous.multi_collections.contains_key(name)
                    && schemas.multi_collections.contains_key(name)
            }
            _ => false,
        };
        if !survives {
            continue;
        }

        let needs_rewrite = match edit.kind {
            EditKind::Added => edit
                .after
                .as_ref()
                .is_some_and(|node| !node.optional && !node.nullable),
            EditKind::Removed => edit
                .before
                .as_ref()
                .is_some_and(|node| !node.optional),
            EditKind::Modified => false,
        };
        if !needs_rewrite {
            continue;
        }

        let covered = match section {
            "collections" => transforms_collection(name),
            "multiCollections" => {
                edit.path.len() >= 4 && transforms_multi_type(name, edit.path[2].as_str())
            }
            _ => true,
        };
        if !covered {
            return Err(drift(edit.path_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests;
