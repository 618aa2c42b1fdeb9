//! Canonicalization of author-facing schema trees.
//!
//! Authoring surfaces may wrap nodes (optional/nullable markers, unions
//! with a null branch, single-branch unions) and accumulate refinements in
//! any order. Structural equality and diffing operate on the canonical
//! form only: refinements deduplicated and sorted by kind, null-union
//! branches folded into `nullable`, single-branch unions unwrapped.

use super::node::{SchemaDocument, SchemaKind, SchemaNode};
use std::collections::BTreeMap;

/// Reduce a node to canonical form. Idempotent.
pub fn canonicalize(node: &SchemaNode) -> SchemaNode {
    let mut out = node.clone();
    canonicalize_in_place(&mut out);
    out
}

/// Reduce every schema in a document to canonical form.
pub fn canonicalize_document(doc: &SchemaDocument) -> SchemaDocument {
    let canon_types = |types: &BTreeMap<String, SchemaNode>| {
        types
            .iter()
            .map(|(tag, schema)| (tag.clone(), canonicalize(schema)))
            .collect()
    };

    SchemaDocument {
        collections: doc
            .collections
            .iter()
            .map(|(name, schema)| (name.clone(), canonicalize(schema)))
            .collect(),
        multi_collections: doc
            .multi_collections
            .iter()
            .map(|(name, types)| (name.clone(), canon_types(types)))
            .collect(),
        multi_models: doc
            .multi_models
            .iter()
            .map(|(name, types)| (name.clone(), canon_types(types)))
            .collect(),
    }
}

fn canonicalize_in_place(node: &mut SchemaNode) {
    match &mut node.kind {
        SchemaKind::Object { fields } => {
            for field in fields.iter_mut() {
                canonicalize_in_place(&mut field.schema);
            }
        }
        SchemaKind::Array { element, .. } => canonicalize_in_place(element),
        SchemaKind::Record { keys, values } => {
            canonicalize_in_place(keys);
            canonicalize_in_place(values);
        }
        SchemaKind::Intersection { parts } => {
            for part in parts.iter_mut() {
                canonicalize_in_place(part);
            }
        }
        SchemaKind::Union { variants } => {
            for variant in variants.iter_mut() {
                canonicalize_in_place(variant);
            }

            // Nested unions flatten into one alternative set.
            let mut flat = Vec::with_capacity(variants.len());
            for variant in variants.drain(..) {
                let bare_union = matches!(variant.kind, SchemaKind::Union { .. })
                    && variant.refinements.is_empty()
                    && variant.index.is_none();
                if bare_union {
                    node.nullable |= variant.nullable;
                    node.optional |= variant.optional;
                    if let SchemaKind::Union { variants: mut inner } = variant.kind {
                        flat.append(&mut inner);
                    }
                } else {
                    flat.push(variant);
                }
            }

            // A null branch is wrapper syntax for nullability.
            let had_null = flat.iter().any(|v| matches!(v.kind, SchemaKind::Null));
            flat.retain(|v| !matches!(v.kind, SchemaKind::Null));
            if had_null {
                node.nullable = true;
            }

            match flat.len() {
                0 => node.kind = SchemaKind::Null,
                1 => {
                    // Single-branch union unwraps, merging wrapper metadata
                    // and refinement pipes.
                    let inner = flat.into_iter().next().expect("one variant");
                    node.optional |= inner.optional;
                    node.nullable |= inner.nullable;
                    node.refinements.extend(inner.refinements);
                    if node.index.is_none() {
                        node.index = inner.index;
                    }
                    node.kind = inner.kind;
                }
                _ => node.kind = SchemaKind::Union { variants: flat },
            }
        }
        _ => {}
    }

    node.refinements.sort_by_key(|r| r.sort_key());
    node.refinements.dedup();
}

/// Canonical structural equality.
pub fn schemas_equal(a: &SchemaNode, b: &SchemaNode) -> bool {
    canonicalize(a) == canonicalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::node::Refinement;

    #[test]
    fn test_refinements_sorted_and_deduped() {
        let node = SchemaNode::string()
            .refine(Refinement::MaxLength { value: 10 })
            .refine(Refinement::MinLength { value: 2 })
            .refine(Refinement::MaxLength { value: 10 });

        let canon = canonicalize(&node);
        assert_eq!(
            canon.refinements,
            vec![
                Refinement::MinLength { value: 2 },
                Refinement::MaxLength { value: 10 },
            ]
        );
    }

    #[test]
    fn test_single_branch_union_unwraps() {
        let node = SchemaNode::new(SchemaKind::Union {
            variants: vec![SchemaNode::string()],
        });
        assert_eq!(canonicalize(&node), SchemaNode::string());
    }

    #[test]
    fn test_null_union_becomes_nullable() {
        let node = SchemaNode::new(SchemaKind::Union {
            variants: vec![
                SchemaNode::string(),
                SchemaNode::new(SchemaKind::Null),
            ],
        });
        let canon = canonicalize(&node);
        assert!(canon.nullable);
        assert_eq!(canon.kind, SchemaKind::String);
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let node = SchemaNode::new(SchemaKind::Union {
            variants: vec![
                SchemaNode::new(SchemaKind::Union {
                    variants: vec![
                        SchemaNode::string().refine(Refinement::NonEmpty),
                        SchemaNode::new(SchemaKind::Null),
                    ],
                }),
                SchemaNode::number(),
            ],
        });
        let once = canonicalize(&node);
        assert_eq!(canonicalize(&once), once);
    }

    #[test]
    fn test_equality_ignores_surface_syntax() {
        let direct = SchemaNode::string().nullable().refine(Refinement::NonEmpty);
        let wrapped = SchemaNode::new(SchemaKind::Union {
            variants: vec![
                SchemaNode::string().refine(Refinement::NonEmpty),
                SchemaNode::new(SchemaKind::Null),
            ],
        });
        assert!(schemas_equal(&direct, &wrapped));
    }
}
