//! Document validation against a schema tree.
//!
//! Used for seed documents and transform results before they are written.
//! Issues are collected rather than failing fast, so the operator sees the
//! full picture in one run.

use super::canonical::canonicalize;
use super::node::{Refinement, SchemaKind, SchemaNode};
use crate::ident::parse_db_id;
use bson::{Bson, Document};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Render a set of issues as one semicolon-joined line for error messages.
pub fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate a document against an object schema. The schema is
/// canonicalized first; `_id` is always accepted even when the schema
/// leaves it implicit.
pub fn validate_document(doc: &Document, schema: &SchemaNode) -> Vec<ValidationIssue> {
    let canonical = canonicalize(schema);
    let mut issues = Vec::new();
    check_value(
        &Bson::Document(doc.clone()),
        &canonical,
        &mut String::new(),
        &mut issues,
        true,
    );
    issues
}

fn push(issues: &mut Vec<ValidationIssue>, path: &str, message: String) {
    issues.push(ValidationIssue {
        path: path.to_string(),
        message,
    });
}

fn join_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}

fn check_value(
    value: &Bson,
    schema: &SchemaNode,
    path: &mut String,
    issues: &mut Vec<ValidationIssue>,
    is_root: bool,
) {
    if matches!(value, Bson::Null) {
        if !schema.nullable && !matches!(schema.kind, SchemaKind::Null) {
            push(issues, path, "value must not be null".into());
        }
        return;
    }

    match &schema.kind {
        SchemaKind::String => {
            if !matches!(value, Bson::String(_)) {
                push(issues, path, format!("expected string, got {}", kind_of(value)));
                return;
            }
        }
        SchemaKind::Number => {
            if as_number(value).is_none() {
                push(issues, path, format!("expected number, got {}", kind_of(value)));
                return;
            }
        }
        SchemaKind::Boolean => {
            if !matches!(value, Bson::Boolean(_)) {
                push(issues, path, format!("expected boolean, got {}", kind_of(value)));
                return;
            }
        }
        SchemaKind::Date => {
            if !matches!(value, Bson::DateTime(_)) {
                push(issues, path, format!("expected date, got {}", kind_of(value)));
                return;
            }
        }
        SchemaKind::Binary => {
            if !matches!(value, Bson::Binary(_)) {
                push(issues, path, format!("expected binary, got {}", kind_of(value)));
                return;
            }
        }
        SchemaKind::Null => {
            push(issues, path, format!("expected null, got {}", kind_of(value)));
            return;
        }
        SchemaKind::Literal { value: expected } => {
            if value != expected {
                push(
                    issues,
                    path,
                    format!("expected literal {}, got {}", expected, value),
                );
                return;
            }
        }
        SchemaKind::Reference { tag } => {
            let ok = matches!(value, Bson::String(s)
                if parse_db_id(s).is_some_and(|id| id.tag == *tag));
            if !ok {
                push(
                    issues,
                    path,
                    format!("expected an id tagged '{}:', got {}", tag, value),
                );
                return;
            }
        }
        SchemaKind::Object { fields } => {
            let Bson::Document(doc) = value else {
                push(issues, path, format!("expected object, got {}", kind_of(value)));
                return;
            };

            for field in fields {
                let field_path = join_path(path, &field.name);
                match doc.get(&field.name) {
                    Some(field_value) => {
                        let mut fp = field_path;
                        check_value(field_value, &field.schema, &mut fp, issues, false);
                    }
                    None => {
                        // A missing root _id is assigned at insert time.
                        let implicit_id = is_root && field.name == "_id";
                        if !field.schema.optional && !implicit_id {
                            push(issues, &field_path, "required field is missing".into());
                        }
                    }
                }
            }

            let declared: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
            for key in doc.keys() {
                // _id is implicit on every object schema at the root
                if is_root && key == "_id" {
                    continue;
                }
                if !declared.contains(&key.as_str()) {
                    push(
                        issues,
                        &join_path(path, key),
                        "field is not declared in the schema".into(),
                    );
                }
            }
        }
        SchemaKind::Array {
            element,
            min_items,
            max_items,
        } => {
            let Bson::Array(items) = value else {
                push(issues, path, format!("expected array, got {}", kind_of(value)));
                return;
            };
            if let Some(min) = min_items {
                if (items.len() as u64) < *min {
                    push(issues, path, format!("array has fewer than {} items", min));
                }
            }
            if let Some(max) = max_items {
                if (items.len() as u64) > *max {
                    push(issues, path, format!("array has more than {} items", max));
                }
            }
            for (i, item) in items.iter().enumerate() {
                let mut item_path = join_path(path, &i.to_string());
                check_value(item, element, &mut item_path, issues, false);
            }
        }
        SchemaKind::Record { keys, values } => {
            let Bson::Document(doc) = value else {
                push(issues, path, format!("expected object, got {}", kind_of(value)));
                return;
            };
            for (key, entry) in doc {
                let mut key_path = join_path(path, key);
                check_value(&Bson::String(key.clone()), keys, &mut key_path, issues, false);
                check_value(entry, values, &mut key_path, issues, false);
            }
        }
        SchemaKind::Union { variants } => {
            let matches_any = variants.iter().any(|variant| {
                let mut probe = Vec::new();
                let mut probe_path = path.clone();
                check_value(value, variant, &mut probe_path, &mut probe, is_root);
                probe.is_empty()
            });
            if !matches_any {
                push(
                    issues,
                    path,
                    format!("value {} matches no union alternative", value),
                );
                return;
            }
        }
        SchemaKind::Intersection { parts } => {
            for part in parts {
                check_value(value, part, path, issues, is_root);
            }
        }
    }

    check_refinements(value, schema, path, issues);
}

fn check_refinements(
    value: &Bson,
    schema: &SchemaNode,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    for refinement in &schema.refinements {
        match refinement {
            Refinement::MinLength { value: min } => {
                if let Bson::String(s) = value {
                    if (s.chars().count() as u64) < *min {
                        push(issues, path, format!("shorter than {} characters", min));
                    }
                }
            }
            Refinement::MaxLength { value: max } => {
                if let Bson::String(s) = value {
                    if (s.chars().count() as u64) > *max {
                        push(issues, path, format!("longer than {} characters", max));
                    }
                }
            }
            Refinement::MinValue { value: min } => {
                if let Some(n) = as_number(value) {
                    if n < *min {
                        push(issues, path, format!("less than minimum {}", min));
                    }
                }
            }
            Refinement::MaxValue { value: max } => {
                if let Some(n) = as_number(value) {
                    if n > *max {
                        push(issues, path, format!("greater than maximum {}", max));
                    }
                }
            }
            Refinement::Regex { pattern } => {
                if let Bson::String(s) = value {
                    match regex::Regex::new(pattern) {
                        Ok(re) => {
                            if !re.is_match(s) {
                                push(issues, path, format!("does not match /{}/", pattern));
                            }
                        }
                        Err(_) => {
                            push(issues, path, format!("invalid pattern /{}/", pattern));
                        }
                    }
                }
            }
            Refinement::NonEmpty => {
                let empty = match value {
                    Bson::String(s) => s.is_empty(),
                    Bson::Array(items) => items.is_empty(),
                    _ => false,
                };
                if empty {
                    push(issues, path, "must not be empty".into());
                }
            }
            Refinement::Enum { values } => {
                if !values.contains(value) {
                    push(issues, path, format!("{} is not an allowed value", value));
                }
            }
            // Opaque refinements cannot be evaluated locally; they are
            // preserved for diffing and enforced by the database validator.
            Refinement::Custom { .. } => {}
        }
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn kind_of(value: &Bson) -> &'static str {
    match value {
        Bson::String(_) => "string",
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => "number",
        Bson::Boolean(_) => "boolean",
        Bson::DateTime(_) => "date",
        Bson::Binary(_) => "binary",
        Bson::Null => "null",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::ObjectId(_) => "objectId",
        _ => "value",
    }
}
