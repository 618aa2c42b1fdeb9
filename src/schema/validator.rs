//! Emission of driver-native `$jsonSchema` validators from schema trees.
//!
//! The emitted validator is installed at collection creation and enforces
//! the declared shape server-side; client-side validation (validate.rs)
//! remains the authoritative check for seeds and transforms because it
//! understands refinements the database cannot express.

use super::canonical::canonicalize;
use super::node::{Refinement, SchemaKind, SchemaNode};
use crate::constants::INFORMATION_DOCUMENT_ID;
use bson::{Bson, Document, doc};
use std::collections::BTreeMap;

/// ULID body: Crockford base32, 26 characters.
const ULID_PATTERN: &str = "[0-9A-HJKMNP-TV-Z]{26}";

/// Validator document for a plain collection.
pub fn collection_validator(schema: &SchemaNode) -> Document {
    let canonical = canonicalize(schema);
    doc! { "$jsonSchema": json_schema(&canonical) }
}

/// Validator for a multi-typed collection: any of the tagged type shapes,
/// or the reserved `_information` marker document.
pub fn multi_collection_validator(types: &BTreeMap<String, SchemaNode>) -> Document {
    let mut alternatives: Vec<Bson> = types
        .values()
        .map(|schema| Bson::Document(json_schema(&canonicalize(schema))))
        .collect();

    alternatives.push(Bson::Document(doc! {
        "properties": { "_id": { "enum": [INFORMATION_DOCUMENT_ID] } },
    }));

    doc! { "$jsonSchema": { "anyOf": alternatives } }
}

fn json_schema(node: &SchemaNode) -> Document {
    let mut schema = kind_schema(node);
    apply_refinements(&mut schema, &node.refinements);

    if node.nullable {
        return doc! { "anyOf": [ schema, { "bsonType": "null" } ] };
    }
    schema
}

fn kind_schema(node: &SchemaNode) -> Document {
    match &node.kind {
        SchemaKind::String => doc! { "bsonType": "string" },
        SchemaKind::Number => doc! { "bsonType": ["int", "long", "double"] },
        SchemaKind::Boolean => doc! { "bsonType": "bool" },
        SchemaKind::Date => doc! { "bsonType": "date" },
        SchemaKind::Binary => doc! { "bsonType": "binData" },
        SchemaKind::Null => doc! { "bsonType": "null" },
        SchemaKind::Literal { value } => doc! { "enum": [value.clone()] },
        SchemaKind::Reference { tag } => doc! {
            "bsonType": "string",
            "pattern": format!("^{}:{}$", regex::escape(tag), ULID_PATTERN),
        },
        SchemaKind::Object { fields } => {
            let mut properties = Document::new();
            let mut required = Vec::new();
            for field in fields {
                properties.insert(field.name.clone(), json_schema(&field.schema));
                if !field.schema.optional {
                    required.push(Bson::String(field.name.clone()));
                }
            }

            let mut out = doc! { "bsonType": "object", "properties": properties };
            if !required.is_empty() {
                out.insert("required", required);
            }
            // _id is implicit on every object shape
            if !fields.iter().any(|f| f.name == "_id") {
                out.get_document_mut("properties")
                    .expect("properties document")
                    .insert("_id", doc! {});
            }
            out.insert("additionalProperties", false);
            out
        }
        SchemaKind::Array {
            element,
            min_items,
            max_items,
        } => {
            let mut out = doc! { "bsonType": "array", "items": json_schema(element) };
            if let Some(min) = min_items {
                out.insert("minItems", *min as i64);
            }
            if let Some(max) = max_items {
                out.insert("maxItems", *max as i64);
            }
            out
        }
        SchemaKind::Record { values, .. } => doc! {
            "bsonType": "object",
            "additionalProperties": json_schema(values),
        },
        SchemaKind::Union { variants } => {
            let alternatives: Vec<Bson> = variants
                .iter()
                .map(|v| Bson::Document(json_schema(v)))
                .collect();
            doc! { "anyOf": alternatives }
        }
        SchemaKind::Intersection { parts } => {
            let all: Vec<Bson> = parts
                .iter()
                .map(|p| Bson::Document(json_schema(p)))
                .collect();
            doc! { "allOf": all }
        }
    }
}

fn apply_refinements(schema: &mut Document, refinements: &[Refinement]) {
    for refinement in refinements {
        match refinement {
            Refinement::MinLength { value } => {
                schema.insert("minLength", *value as i64);
            }
            Refinement::MaxLength { value } => {
                schema.insert("maxLength", *value as i64);
            }
            Refinement::MinValue { value } => {
                schema.insert("minimum", *value);
            }
            Refinement::MaxValue { value } => {
                schema.insert("maximum", *value);
            }
            Refinement::Regex { pattern } => {
                schema.insert("pattern", pattern.clone());
            }
            Refinement::NonEmpty => {
                if schema.get_str("bsonType") == Ok("array") {
                    schema.insert("minItems", 1i64);
                } else {
                    schema.insert("minLength", 1i64);
                }
            }
            Refinement::Enum { values } => {
                schema.insert("enum", values.clone());
            }
            // Not expressible server-side; enforced client-side only.
            Refinement::Custom { .. } => {}
        }
    }
}
