//! The closed set of typed operations a migration can carry, plus the
//! declarative document-transform language they embed.
//!
//! Transforms are evaluated client-side, one document at a time, so the
//! database executor and the in-memory simulator share a single evaluation
//! path and invertibility is checkable before anything runs.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

fn is_false(v: &bool) -> bool {
    !v
}

/// One typed migration operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    CreateCollection {
        collection: String,
    },
    CreateMultiCollection {
        collection: String,
    },
    CreateMultiModelInstance {
        instance: String,
        model: String,
    },
    SeedCollection {
        collection: String,
        docs: Vec<Document>,
    },
    SeedMultiCollectionType {
        collection: String,
        #[serde(rename = "type")]
        type_tag: String,
        docs: Vec<Document>,
    },
    SeedMultiModelInstanceType {
        instance: String,
        #[serde(rename = "type")]
        type_tag: String,
        docs: Vec<Document>,
    },
    TransformCollection {
        collection: String,
        up: Vec<TransformStep>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        down: Option<Vec<TransformStep>>,
        #[serde(default, skip_serializing_if = "is_false")]
        lossy: bool,
    },
    TransformMultiCollectionType {
        collection: String,
        #[serde(rename = "type")]
        type_tag: String,
        up: Vec<TransformStep>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        down: Option<Vec<TransformStep>>,
        #[serde(default, skip_serializing_if = "is_false")]
        lossy: bool,
    },
    UpdateIndexes {
        collection: String,
    },
    RenameCollection {
        from: String,
        to: String,
    },
    RenameMultiCollection {
        from: String,
        to: String,
    },
}

impl Operation {
    /// True for operations that create physical collections; such
    /// migrations cannot be rolled back without data loss.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Operation::CreateCollection { .. }
                | Operation::CreateMultiCollection { .. }
                | Operation::CreateMultiModelInstance { .. }
        )
    }

    /// True when rolling this operation back would lose data: creations,
    /// and transforms marked lossy.
    pub fn is_irreversible(&self) -> bool {
        match self {
            op if op.is_create() => true,
            Operation::TransformCollection { lossy, .. }
            | Operation::TransformMultiCollectionType { lossy, .. } => *lossy,
            _ => false,
        }
    }

    /// The transform carried by this operation, if any.
    pub fn transform_spec(&self) -> Option<TransformSpec> {
        match self {
            Operation::TransformCollection {
                up, down, lossy, ..
            }
            | Operation::TransformMultiCollectionType {
                up, down, lossy, ..
            } => Some(TransformSpec {
                up: up.clone(),
                down: down.clone(),
                lossy: *lossy,
            }),
            _ => None,
        }
    }

    /// The physical collection this operation touches.
    pub fn collection(&self) -> &str {
        match self {
            Operation::CreateCollection { collection }
            | Operation::CreateMultiCollection { collection }
            | Operation::SeedCollection { collection, .. }
            | Operation::SeedMultiCollectionType { collection, .. }
            | Operation::TransformCollection { collection, .. }
            | Operation::TransformMultiCollectionType { collection, .. }
            | Operation::UpdateIndexes { collection } => collection,
            Operation::CreateMultiModelInstance { instance, .. }
            | Operation::SeedMultiModelInstanceType { instance, .. } => instance,
            Operation::RenameCollection { to, .. }
            | Operation::RenameMultiCollection { to, .. } => to,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Operation::CreateCollection { .. } => "createCollection",
            Operation::CreateMultiCollection { .. } => "createMultiCollection",
            Operation::CreateMultiModelInstance { .. } => "createMultiModelInstance",
            Operation::SeedCollection { .. } => "seedCollection",
            Operation::SeedMultiCollectionType { .. } => "seedMultiCollectionType",
            Operation::SeedMultiModelInstanceType { .. } => "seedMultiModelInstanceType",
            Operation::TransformCollection { .. } => "transformCollection",
            Operation::TransformMultiCollectionType { .. } => "transformMultiCollectionType",
            Operation::UpdateIndexes { .. } => "updateIndexes",
            Operation::RenameCollection { .. } => "renameCollection",
            Operation::RenameMultiCollection { .. } => "renameMultiCollection",
        }
    }
}

/// A pair of document rewrites: `up` applied on migrate, `down` on
/// rollback. A transform without a `down`, or marked `lossy`, cannot be
/// rolled back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub up: Vec<TransformStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<Vec<TransformStep>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub lossy: bool,
}

impl TransformSpec {
    /// The rollback form: down becomes up. None when this transform cannot
    /// be inverted.
    pub fn inverted(&self) -> Option<TransformSpec> {
        if self.lossy {
            return None;
        }
        let down = self.down.clone()?;
        Some(TransformSpec {
            up: down,
            down: Some(self.up.clone()),
            lossy: false,
        })
    }

    /// Apply the up steps to one document, in order.
    pub fn apply(&self, doc: &mut Document) {
        for step in &self.up {
            step.apply(doc);
        }
    }
}

/// One rewrite step. Field paths are dot-separated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformStep {
    Set { field: String, value: ValueExpr },
    Rename { from: String, to: String },
    Unset { field: String },
}

impl TransformStep {
    pub fn apply(&self, doc: &mut Document) {
        match self {
            TransformStep::Set { field, value } => {
                if let Some(resolved) = value.resolve(doc) {
                    set_path(doc, field, resolved);
                }
            }
            TransformStep::Rename { from, to } => {
                if let Some(value) = remove_path(doc, from) {
                    set_path(doc, to, value);
                }
            }
            TransformStep::Unset { field } => {
                remove_path(doc, field);
            }
        }
    }
}

/// Value side of a `set` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueExpr {
    /// A constant.
    Literal(Bson),
    /// Copy of another field's current value (dot path).
    Field(String),
    /// String concatenation of parts; non-string parts use their display
    /// rendering.
    Concat(Vec<ValueExpr>),
}

impl ValueExpr {
    /// Resolve against the current state of the document. `None` when a
    /// referenced field is absent: `set` then leaves the target untouched.
    pub fn resolve(&self, doc: &Document) -> Option<Bson> {
        match self {
            ValueExpr::Literal(value) => Some(value.clone()),
            ValueExpr::Field(path) => get_path(doc, path).cloned(),
            ValueExpr::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part.resolve(doc)? {
                        Bson::String(s) => out.push_str(&s),
                        other => out.push_str(&render_scalar(&other)),
                    }
                }
                Some(Bson::String(out))
            }
        }
    }
}

fn render_scalar(value: &Bson) -> String {
    match value {
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => n.to_string(),
        Bson::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(value);
        }
        current = value.as_document()?;
    }
    None
}

fn set_path(doc: &mut Document, path: &str, value: Bson) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for segment in &segments[..segments.len() - 1] {
        // Intermediate segments become documents, replacing scalars.
        if !matches!(current.get(*segment), Some(Bson::Document(_))) {
            current.insert(segment.to_string(), Bson::Document(Document::new()));
        }
        current = match current.get_mut(*segment) {
            Some(Bson::Document(inner)) => inner,
            _ => unreachable!("segment was just made a document"),
        };
    }
    current.insert(segments[segments.len() - 1].to_string(), value);
}

fn remove_path(doc: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => {
            let inner = doc.get_mut(head)?.as_document_mut()?;
            remove_path(inner, rest)
        }
    }
}
