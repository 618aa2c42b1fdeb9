//! Index extraction from schema trees and index-level diffing.

use super::canonical::canonicalize;
use super::node::{IndexOptions, SchemaKind, SchemaNode};
use std::collections::BTreeMap;

/// A declared index: dotted document path plus options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub path: String,
    pub options: IndexOptions,
}

/// Classification of one index path between two schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexChange {
    Unchanged,
    Add,
    Drop,
    /// Exists on both sides but with different options; realized as a drop
    /// followed by a create.
    Rebuild,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexAction {
    pub path: String,
    pub change: IndexChange,
    /// Target options: the new options for add/rebuild, the old ones for
    /// drop, and the (identical) options for unchanged.
    pub options: IndexOptions,
}

/// Collect every index declared in a schema tree, keyed by dotted path.
/// Depends only on the canonical form, not the surface syntax.
pub fn extract_indexes(schema: &SchemaNode) -> BTreeMap<String, IndexOptions> {
    let canonical = canonicalize(schema);
    let mut out = BTreeMap::new();
    walk(&canonical, &mut Vec::new(), &mut out);
    out
}

fn walk(node: &SchemaNode, path: &mut Vec<String>, out: &mut BTreeMap<String, IndexOptions>) {
    if let Some(options) = &node.index {
        if !path.is_empty() {
            out.insert(path.join("."), options.clone());
        }
    }

    match &node.kind {
        SchemaKind::Object { fields } => {
            for field in fields {
                path.push(field.name.clone());
                walk(&field.schema, path, out);
                path.pop();
            }
        }
        // A multikey index on an array field indexes its elements under the
        // same path, so descend without adding a segment.
        SchemaKind::Array { element, .. } => walk(element, path, out),
        _ => {}
    }
}

/// Classify every index path present in either schema version.
pub fn diff_indexes(before: &SchemaNode, after: &SchemaNode) -> Vec<IndexAction> {
    diff_index_maps(&extract_indexes(before), &extract_indexes(after))
}

/// Classify indexes between two extracted maps (also used when one side
/// comes from the live database rather than a schema).
pub fn diff_index_maps(
    before: &BTreeMap<String, IndexOptions>,
    after: &BTreeMap<String, IndexOptions>,
) -> Vec<IndexAction> {
    let paths: std::collections::BTreeSet<_> = before.keys().chain(after.keys()).collect();

    paths
        .into_iter()
        .map(|path| match (before.get(path), after.get(path)) {
            (Some(old), Some(new)) if old == new => IndexAction {
                path: path.clone(),
                change: IndexChange::Unchanged,
                options: new.clone(),
            },
            (Some(_), Some(new)) => IndexAction {
                path: path.clone(),
                change: IndexChange::Rebuild,
                options: new.clone(),
            },
            (Some(old), None) => IndexAction {
                path: path.clone(),
                change: IndexChange::Drop,
                options: old.clone(),
            },
            (None, Some(new)) => IndexAction {
                path: path.clone(),
                change: IndexChange::Add,
                options: new.clone(),
            },
            (None, None) => unreachable!(),
        })
        .collect()
}

/// Pending work only: everything except `Unchanged`.
pub fn pending_actions(actions: Vec<IndexAction>) -> Vec<IndexAction> {
    actions
        .into_iter()
        .filter(|a| a.change != IndexChange::Unchanged)
        .collect()
}
