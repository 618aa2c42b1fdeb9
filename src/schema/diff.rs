//! Field-granular structural diff between two canonical schema trees.
//!
//! Added and removed paths are reported at the shallowest point where they
//! occur; a modification at a leaf carries both canonical nodes so callers
//! can inspect exactly what changed (e.g. index-option changes).

use super::canonical::{canonicalize, canonicalize_document};
use super::node::{ObjectField, SchemaDocument, SchemaKind, SchemaNode};
use anyhow::{Result, bail};
use std::collections::BTreeMap;

/// Path segment used for the array element position.
pub const ARRAY_ELEMENT: &str = "[]";
/// Path segments used for the two halves of a record schema.
pub const RECORD_KEYS: &str = "$keys";
pub const RECORD_VALUES: &str = "$values";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Added,
    Removed,
    Modified,
}

/// One edit in a schema diff.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaEdit {
    pub path: Vec<String>,
    pub kind: EditKind,
    pub before: Option<SchemaNode>,
    pub after: Option<SchemaNode>,
    /// For added object fields: the insertion index in the target object,
    /// so applying a diff reproduces the author's field order exactly.
    pub position: Option<usize>,
}

impl SchemaEdit {
    pub fn path_string(&self) -> String {
        self.path.join(".")
    }
}

/// Diff two schema trees. Inputs are canonicalized first, so the result
/// depends only on canonical structure. `diff(a, a)` is empty.
pub fn diff(before: &SchemaNode, after: &SchemaNode) -> Vec<SchemaEdit> {
    let before = canonicalize(before);
    let after = canonicalize(after);
    let mut edits = Vec::new();
    diff_nodes(&mut Vec::new(), &before, &after, &mut edits);
    edits
}

/// Diff two schema documents. Paths are rooted at
/// `collections.<name>`, `multiCollections.<name>.<tag>` or
/// `multiModels.<name>.<tag>`.
pub fn diff_documents(before: &SchemaDocument, after: &SchemaDocument) -> Vec<SchemaEdit> {
    let before = canonicalize_document(before);
    let after = canonicalize_document(after);
    let mut edits = Vec::new();

    diff_named(
        &mut edits,
        &["collections"],
        &before.collections,
        &after.collections,
    );

    for (section, old, new) in [
        ("multiCollections", &before.multi_collections, &after.multi_collections),
        ("multiModels", &before.multi_models, &after.multi_models),
    ] {
        let names: std::collections::BTreeSet<_> = old.keys().chain(new.keys()).collect();
        for name in names {
            match (old.get(name.as_str()), new.get(name.as_str())) {
                (Some(old_types), Some(new_types)) => {
                    diff_named(&mut edits, &[section, name.as_str()], old_types, new_types);
                }
                (Some(old_types), None) => {
                    for (tag, schema) in old_types {
                        edits.push(SchemaEdit {
                            path: vec![section.into(), name.clone(), tag.clone()],
                            kind: EditKind::Removed,
                            before: Some(schema.clone()),
                            after: None,
                            position: None,
                        });
                    }
                }
                (None, Some(new_types)) => {
                    for (tag, schema) in new_types {
                        edits.push(SchemaEdit {
                            path: vec![section.into(), name.clone(), tag.clone()],
                            kind: EditKind::Added,
                            before: None,
                            after: Some(schema.clone()),
                            position: None,
                        });
                    }
                }
                (None, None) => unreachable!(),
            }
        }
    }

    edits
}

fn diff_named(
    edits: &mut Vec<SchemaEdit>,
    prefix: &[&str],
    old: &BTreeMap<String, SchemaNode>,
    new: &BTreeMap<String, SchemaNode>,
) {
    let names: std::collections::BTreeSet<_> = old.keys().chain(new.keys()).collect();
    for name in names {
        let mut path: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        path.push(name.clone());
        match (old.get(name.as_str()), new.get(name.as_str())) {
            (Some(a), Some(b)) => diff_nodes(&mut path, a, b, edits),
            (Some(a), None) => edits.push(SchemaEdit {
                path,
                kind: EditKind::Removed,
                before: Some(a.clone()),
                after: None,
                position: None,
            }),
            (None, Some(b)) => edits.push(SchemaEdit {
                path,
                kind: EditKind::Added,
                before: None,
                after: Some(b.clone()),
                position: None,
            }),
            (None, None) => unreachable!(),
        }
    }
}

/// A node stripped of its children, for shell comparison: when anything
/// other than the children differs, the modification is reported at this
/// node rather than descending.
fn shell(node: &SchemaNode) -> SchemaNode {
    let mut out = node.clone();
    out.kind = match &node.kind {
        SchemaKind::Object { .. } => SchemaKind::Object { fields: Vec::new() },
        SchemaKind::Array {
            min_items,
            max_items,
            ..
        } => SchemaKind::Array {
            element: Box::new(SchemaNode::new(SchemaKind::Null)),
            min_items: *min_items,
            max_items: *max_items,
        },
        SchemaKind::Record { .. } => SchemaKind::Record {
            keys: Box::new(SchemaNode::new(SchemaKind::Null)),
            values: Box::new(SchemaNode::new(SchemaKind::Null)),
        },
        other => other.clone(),
    };
    out
}

fn modified(path: &[String], before: &SchemaNode, after: &SchemaNode) -> SchemaEdit {
    SchemaEdit {
        path: path.to_vec(),
        kind: EditKind::Modified,
        before: Some(before.clone()),
        after: Some(after.clone()),
        position: None,
    }
}

fn diff_nodes(
    path: &mut Vec<String>,
    before: &SchemaNode,
    after: &SchemaNode,
    edits: &mut Vec<SchemaEdit>,
) {
    if before == after {
        return;
    }

    match (&before.kind, &after.kind) {
        (SchemaKind::Object { fields: old }, SchemaKind::Object { fields: new }) => {
            if shell(before) != shell(after) {
                edits.push(modified(path, before, after));
                return;
            }

            let old_names: Vec<&str> = old.iter().map(|f| f.name.as_str()).collect();
            let new_names: Vec<&str> = new.iter().map(|f| f.name.as_str()).collect();

            // Shared fields must keep their relative order; a reorder is a
            // modification of the whole object, not field-level edits.
            let shared_old: Vec<&str> = old_names
                .iter()
                .filter(|n| new_names.contains(n))
                .copied()
                .collect();
            let shared_new: Vec<&str> = new_names
                .iter()
                .filter(|n| old_names.contains(n))
                .copied()
                .collect();
            if shared_old != shared_new {
                edits.push(modified(path, before, after));
                return;
            }

            for field in old {
                if !new_names.contains(&field.name.as_str()) {
                    path.push(field.name.clone());
                    edits.push(SchemaEdit {
                        path: path.clone(),
                        kind: EditKind::Removed,
                        before: Some(field.schema.clone()),
                        after: None,
                        position: None,
                    });
                    path.pop();
                }
            }

            for (position, field) in new.iter().enumerate() {
                if !old_names.contains(&field.name.as_str()) {
                    path.push(field.name.clone());
                    edits.push(SchemaEdit {
                        path: path.clone(),
                        kind: EditKind::Added,
                        before: None,
                        after: Some(field.schema.clone()),
                        position: Some(position),
                    });
                    path.pop();
                }
            }

            for field in new {
                if let Some(old_field) = old.iter().find(|f| f.name == field.name) {
                    path.push(field.name.clone());
                    diff_nodes(path, &old_field.schema, &field.schema, edits);
                    path.pop();
                }
            }
        }
        (
            SchemaKind::Array { element: old, .. },
            SchemaKind::Array { element: new, .. },
        ) => {
            if shell(before) != shell(after) {
                edits.push(modified(path, before, after));
                return;
            }
            path.push(ARRAY_ELEMENT.to_string());
            diff_nodes(path, old, new, edits);
            path.pop();
        }
        (
            SchemaKind::Record {
                keys: old_keys,
                values: old_values,
            },
            SchemaKind::Record {
                keys: new_keys,
                values: new_values,
            },
        ) => {
            if shell(before) != shell(after) {
                edits.push(modified(path, before, after));
                return;
            }
            path.push(RECORD_KEYS.to_string());
            diff_nodes(path, old_keys, new_keys, edits);
            path.pop();
            path.push(RECORD_VALUES.to_string());
            diff_nodes(path, old_values, new_values, edits);
            path.pop();
        }
        // Everything else, including kind changes and union/intersection
        // alternatives, is a leaf-level modification.
        _ => edits.push(modified(path, before, after)),
    }
}

/// Replay a diff over a canonical base tree. `apply_diff(a, diff(a, b))`
/// reproduces `b` exactly.
pub fn apply_diff(base: &SchemaNode, edits: &[SchemaEdit]) -> Result<SchemaNode> {
    let mut out = canonicalize(base);
    for edit in edits {
        apply_edit(&mut out, &edit.path, edit)?;
    }
    Ok(out)
}

fn apply_edit(node: &mut SchemaNode, path: &[String], edit: &SchemaEdit) -> Result<()> {
    if path.is_empty() {
        match edit.kind {
            EditKind::Modified => {
                *node = edit
                    .after
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("modified edit without an after node"))?;
                return Ok(());
            }
            _ => bail!("add/remove edit with an empty path"),
        }
    }

    let segment = &path[0];
    let rest = &path[1..];

    match (&mut node.kind, segment.as_str()) {
        (SchemaKind::Array { element, .. }, ARRAY_ELEMENT) => apply_edit(element, rest, edit),
        (SchemaKind::Record { keys, .. }, RECORD_KEYS) => apply_edit(keys, rest, edit),
        (SchemaKind::Record { values, .. }, RECORD_VALUES) => apply_edit(values, rest, edit),
        (SchemaKind::Object { fields }, name) => {
            if rest.is_empty() {
                match edit.kind {
                    EditKind::Added => {
                        let schema = edit
                            .after
                            .clone()
                            .ok_or_else(|| anyhow::anyhow!("added edit without an after node"))?;
                        let position = edit.position.unwrap_or(fields.len()).min(fields.len());
                        fields.insert(
                            position,
                            ObjectField {
                                name: name.to_string(),
                                schema,
                            },
                        );
                        Ok(())
                    }
                    EditKind::Removed => {
                        let index = fields
                            .iter()
                            .position(|f| f.name == *name)
                            .ok_or_else(|| anyhow::anyhow!("no field '{}' to remove", name))?;
                        fields.remove(index);
                        Ok(())
                    }
                    EditKind::Modified => {
                        let field = fields
                            .iter_mut()
                            .find(|f| f.name == *name)
                            .ok_or_else(|| anyhow::anyhow!("no field '{}' to modify", name))?;
                        field.schema = edit
                            .after
                            .clone()
                            .ok_or_else(|| anyhow::anyhow!("modified edit without an after node"))?;
                        Ok(())
                    }
                }
            } else {
                let field = fields
                    .iter_mut()
                    .find(|f| f.name == *name)
                    .ok_or_else(|| anyhow::anyhow!("no field '{}' on path", name))?;
                apply_edit(&mut field.schema, rest, edit)
            }
        }
        _ => bail!(
            "path segment '{}' does not match a {} node",
            segment,
            node.kind.label()
        ),
    }
}
