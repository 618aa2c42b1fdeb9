//! The schema tree: the acceptable shape of documents in a collection.
//!
//! Nodes form an acyclic tree; `dbId` reference nodes are symbolic names,
//! not pointers, so cross-collection cycles express referential intent
//! without structural recursion.

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn is_false(v: &bool) -> bool {
    !v
}

/// One node of a schema tree plus its wrapper metadata, refinement pipe and
/// index metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaNode {
    #[serde(flatten)]
    pub kind: SchemaKind,

    /// Field may be absent entirely (`allowUndefined`).
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,

    /// Field may be BSON null (`allowNull`).
    #[serde(default, skip_serializing_if = "is_false")]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refinements: Vec<Refinement>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexOptions>,
}

impl SchemaNode {
    pub fn new(kind: SchemaKind) -> Self {
        SchemaNode {
            kind,
            optional: false,
            nullable: false,
            refinements: Vec::new(),
            index: None,
        }
    }

    pub fn string() -> Self {
        Self::new(SchemaKind::String)
    }

    pub fn number() -> Self {
        Self::new(SchemaKind::Number)
    }

    pub fn boolean() -> Self {
        Self::new(SchemaKind::Boolean)
    }

    pub fn date() -> Self {
        Self::new(SchemaKind::Date)
    }

    pub fn literal(value: impl Into<Bson>) -> Self {
        Self::new(SchemaKind::Literal {
            value: value.into(),
        })
    }

    pub fn db_id(tag: &str) -> Self {
        Self::new(SchemaKind::Reference {
            tag: tag.to_string(),
        })
    }

    pub fn object(fields: Vec<(&str, SchemaNode)>) -> Self {
        Self::new(SchemaKind::Object {
            fields: fields
                .into_iter()
                .map(|(name, schema)| ObjectField {
                    name: name.to_string(),
                    schema,
                })
                .collect(),
        })
    }

    pub fn array(element: SchemaNode) -> Self {
        Self::new(SchemaKind::Array {
            element: Box::new(element),
            min_items: None,
            max_items: None,
        })
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn refine(mut self, refinement: Refinement) -> Self {
        self.refinements.push(refinement);
        self
    }

    pub fn indexed(mut self, options: IndexOptions) -> Self {
        self.index = Some(options);
        self
    }

    /// The object fields if this node is an object.
    pub fn fields(&self) -> Option<&[ObjectField]> {
        match &self.kind {
            SchemaKind::Object { fields } => Some(fields),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&SchemaNode> {
        self.fields()?
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.schema)
    }
}

/// The closed set of node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SchemaKind {
    String,
    Number,
    Boolean,
    Date,
    Binary,
    Null,
    Literal {
        value: Bson,
    },
    Object {
        fields: Vec<ObjectField>,
    },
    Array {
        element: Box<SchemaNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_items: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<u64>,
    },
    /// Keys constrained by a string subschema, values by a value subschema.
    Record {
        keys: Box<SchemaNode>,
        values: Box<SchemaNode>,
    },
    Union {
        variants: Vec<SchemaNode>,
    },
    Intersection {
        parts: Vec<SchemaNode>,
    },
    /// Symbolic link to a named entity; also the id strategy for tagged ids.
    #[serde(rename = "dbId", alias = "refId")]
    Reference {
        tag: String,
    },
}

impl SchemaKind {
    /// Stable label used in diff output and validation messages.
    pub fn label(&self) -> &'static str {
        match self {
            SchemaKind::String => "string",
            SchemaKind::Number => "number",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Date => "date",
            SchemaKind::Binary => "binary",
            SchemaKind::Null => "null",
            SchemaKind::Literal { .. } => "literal",
            SchemaKind::Object { .. } => "object",
            SchemaKind::Array { .. } => "array",
            SchemaKind::Record { .. } => "record",
            SchemaKind::Union { .. } => "union",
            SchemaKind::Intersection { .. } => "intersection",
            SchemaKind::Reference { .. } => "dbId",
        }
    }
}

/// A named object field. Field order is significant: it reflects author
/// intent and determines id placement, so objects are vectors, not maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectField {
    pub name: String,
    pub schema: SchemaNode,
}

/// A single refinement in a node's pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Refinement {
    MinLength { value: u64 },
    MaxLength { value: u64 },
    MinValue { value: f64 },
    MaxValue { value: f64 },
    Regex { pattern: String },
    NonEmpty,
    Enum { values: Vec<Bson> },
    /// Refinements the canonical vocabulary does not understand are carried
    /// opaquely so diff never silently ignores them.
    Custom { name: String, payload: Bson },
}

impl Refinement {
    /// Sort key for canonical ordering: kind rank, then payload rendering
    /// so equal kinds order deterministically.
    pub fn sort_key(&self) -> (u8, String) {
        match self {
            Refinement::MinLength { value } => (0, value.to_string()),
            Refinement::MaxLength { value } => (1, value.to_string()),
            Refinement::MinValue { value } => (2, value.to_string()),
            Refinement::MaxValue { value } => (3, value.to_string()),
            Refinement::Regex { pattern } => (4, pattern.clone()),
            Refinement::NonEmpty => (5, String::new()),
            Refinement::Enum { values } => (6, format!("{:?}", values)),
            Refinement::Custom { name, payload } => (7, format!("{}:{:?}", name, payload)),
        }
    }
}

/// Index metadata carried by a schema node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IndexOptions {
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub case_insensitive: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sparse: bool,
    /// Collation locale, e.g. "en".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
}

impl IndexOptions {
    pub fn unique() -> Self {
        IndexOptions {
            unique: true,
            ..Default::default()
        }
    }

    /// Canonical form for comparison against driver-reported indexes: a
    /// case-insensitive index defaults to the "en" collation locale, so an
    /// explicit "en" is redundant.
    pub fn normalized(mut self) -> Self {
        if self.case_insensitive && self.collation.as_deref() == Some("en") {
            self.collation = None;
        }
        self
    }
}

/// How `_id` values are produced for documents of a given object schema.
#[derive(Debug, Clone, PartialEq)]
pub enum IdStrategy {
    /// Database-native object id, assigned by the driver.
    NativeObjectId,
    /// A constant id; at most one such document may exist.
    Literal(Bson),
    /// `"<tag>:" + ULID`, generated at insert time.
    Tagged(String),
}

impl IdStrategy {
    /// Derive the id strategy from an object schema's `_id` field. Every
    /// object schema has an implicit `_id`; unspecified means native.
    pub fn of(schema: &SchemaNode) -> IdStrategy {
        match schema.field("_id").map(|f| &f.kind) {
            Some(SchemaKind::Literal { value }) => IdStrategy::Literal(value.clone()),
            Some(SchemaKind::Reference { tag }) => IdStrategy::Tagged(tag.clone()),
            _ => IdStrategy::NativeObjectId,
        }
    }
}

/// The declared shape of a whole database: plain collections, multi-typed
/// collections, and multi-model templates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemaDocument {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub collections: BTreeMap<String, SchemaNode>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub multi_collections: BTreeMap<String, BTreeMap<String, SchemaNode>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub multi_models: BTreeMap<String, BTreeMap<String, SchemaNode>>,
}

impl SchemaDocument {
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
            && self.multi_collections.is_empty()
            && self.multi_models.is_empty()
    }

    /// Schema for one type tag of a multi-collection.
    pub fn multi_collection_type(&self, collection: &str, type_tag: &str) -> Option<&SchemaNode> {
        self.multi_collections.get(collection)?.get(type_tag)
    }

    /// Schema for one type tag of a multi-model template.
    pub fn multi_model_type(&self, model: &str, type_tag: &str) -> Option<&SchemaNode> {
        self.multi_models.get(model)?.get(type_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_field_order_is_significant() {
        let a = SchemaNode::object(vec![("x", SchemaNode::string()), ("y", SchemaNode::number())]);
        let b = SchemaNode::object(vec![("y", SchemaNode::number()), ("x", SchemaNode::string())]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_strategy() {
        let tagged = SchemaNode::object(vec![("_id", SchemaNode::db_id("user"))]);
        assert_eq!(IdStrategy::of(&tagged), IdStrategy::Tagged("user".into()));

        let literal = SchemaNode::object(vec![("_id", SchemaNode::literal("settings"))]);
        assert_eq!(
            IdStrategy::of(&literal),
            IdStrategy::Literal(Bson::String("settings".into()))
        );

        let implicit = SchemaNode::object(vec![("name", SchemaNode::string())]);
        assert_eq!(IdStrategy::of(&implicit), IdStrategy::NativeObjectId);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let yaml = r#"
kind: object
fields:
  - name: _id
    schema: { kind: dbId, tag: user }
  - name: email
    schema:
      kind: string
      refinements:
        - { kind: regex, pattern: "^[^@]+@[^@]+$" }
      index: { unique: true }
  - name: age
    schema: { kind: number, optional: true }
"#;
        let node: SchemaNode = serde_yaml::from_str(yaml).unwrap();
        let fields = node.fields().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].name, "_id");
        assert!(fields[2].schema.optional);
        assert_eq!(
            node.field("email").unwrap().index,
            Some(IndexOptions::unique())
        );

        let reserialized = serde_yaml::to_string(&node).unwrap();
        let reparsed: SchemaNode = serde_yaml::from_str(&reserialized).unwrap();
        assert_eq!(reparsed, node);
    }
}
