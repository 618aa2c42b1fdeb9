//! Migration file generation: a small `{{path}}` template language plus
//! the built-in templates behind `mongodbee generate`.
//!
//! Rendering supports dotted-path interpolation and `{{#if path}}…{{/if}}`
//! conditionals (nesting allowed). Values are stringified the way
//! `String(x)` would; missing paths render as the empty string.

use crate::ident::MigrationId;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Typed context handed to template rendering.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub id: MigrationId,
    pub name: String,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub parent: Option<MigrationId>,
    pub author: Option<String>,
    pub variables: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new(id: MigrationId, name: &str, parent: Option<MigrationId>) -> Self {
        TemplateContext {
            id,
            name: name.to_string(),
            description: None,
            timestamp: Utc::now(),
            parent,
            variables: BTreeMap::new(),
            author: None,
        }
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Flatten into the value tree templates interpolate from. Helper
    /// values are precomputed over the migration name, since the template
    /// language has no function application.
    pub fn to_value(&self) -> Value {
        let mut variables = Map::new();
        for (key, value) in &self.variables {
            variables.insert(key.clone(), Value::String(value.clone()));
        }

        let parent_info = self.parent.as_ref().map(|parent| {
            json!({
                "id": parent.to_string(),
                "name": parent.slug(),
            })
        });

        json!({
            "migration": {
                "id": self.id.to_string(),
                "name": self.name,
                "description": self.description,
                "timestamp": self.timestamp.to_rfc3339(),
                "parent": self.parent.as_ref().map(|p| p.to_string()),
                "author": self.author,
            },
            "variables": Value::Object(variables),
            "helpers": {
                "now": self.timestamp.to_rfc3339(),
                "uuid": uuid::Uuid::new_v4().to_string(),
                "camelCase": camel_case(&self.name),
                "pascalCase": pascal_case(&self.name),
                "snakeCase": snake_case(&self.name),
                "kebabCase": crate::ident::kebab_case(&self.name),
                "sanitize": sanitize(&self.name),
            },
            "parentInfo": parent_info,
        })
    }
}

/// Render a template against a context value.
pub fn render_template(template: &str, context: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        if let Some(condition) = after.strip_prefix("#if ") {
            let Some(close) = condition.find("}}") else {
                out.push_str("{{");
                rest = after;
                continue;
            };
            let path = condition[..close].trim();
            let body_start = &condition[close + 2..];
            let Some((body, tail)) = split_if_block(body_start) else {
                // unterminated block renders nothing
                rest = "";
                break;
            };
            if is_truthy(lookup(context, path)) {
                out.push_str(&render_template(body, context));
            }
            rest = tail;
        } else if let Some(close) = after.find("}}") {
            let path = after[..close].trim();
            out.push_str(&stringify(lookup(context, path)));
            rest = &after[close + 2..];
        } else {
            out.push_str("{{");
            rest = after;
        }
    }

    out.push_str(rest);
    out
}

/// Split an `{{#if}}` body from its matching `{{/if}}`, honoring nesting.
fn split_if_block(input: &str) -> Option<(&str, &str)> {
    let mut depth = 1;
    let mut cursor = 0;

    while let Some(next) = input[cursor..].find("{{") {
        let position = cursor + next;
        let after = &input[position + 2..];
        if after.starts_with("#if ") {
            depth += 1;
            cursor = position + 2;
        } else if let Some(tail) = after.strip_prefix("/if}}") {
            depth -= 1;
            if depth == 0 {
                let offset = input.len() - tail.len();
                return Some((&input[..position], &input[offset..]));
            }
            cursor = position + 2;
        } else {
            cursor = position + 2;
        }
    }
    None
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        _ => true,
    }
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

fn words(name: &str) -> Vec<String> {
    crate::ident::kebab_case(name)
        .split('-')
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

fn camel_case(name: &str) -> String {
    let words = words(name);
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        if i == 0 {
            out.push_str(word);
        } else {
            out.push_str(&capitalize(word));
        }
    }
    out
}

fn pascal_case(name: &str) -> String {
    words(name).iter().map(|w| capitalize(w)).collect()
}

fn snake_case(name: &str) -> String {
    words(name).join("_")
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Built-in template names, in the order they are advertised.
pub const TEMPLATE_NAMES: &[&str] = &[
    "empty",
    "create-collection",
    "seed-data",
    "transform-data",
    "add-index",
    "custom",
];

/// Look up a built-in template body.
pub fn builtin_template(name: &str) -> Option<&'static str> {
    match name {
        "empty" => Some(EMPTY),
        "create-collection" => Some(CREATE_COLLECTION),
        "seed-data" => Some(SEED_DATA),
        "transform-data" => Some(TRANSFORM_DATA),
        "add-index" => Some(ADD_INDEX),
        "custom" => Some(CUSTOM),
        _ => None,
    }
}

const EMPTY: &str = r#"# Migration {{migration.name}}
# Generated {{helpers.now}}
{{#if migration.description}}# {{migration.description}}
{{/if}}id: {{migration.id}}
name: {{migration.name}}
{{#if migration.parent}}parent: {{migration.parent}}
{{/if}}schemas: {}
operations: []
"#;

const CREATE_COLLECTION: &str = r#"# Migration {{migration.name}}
# Generated {{helpers.now}}
{{#if migration.description}}# {{migration.description}}
{{/if}}id: {{migration.id}}
name: {{migration.name}}
{{#if migration.parent}}parent: {{migration.parent}}
{{/if}}schemas:
  collections:
    {{variables.collection}}:
      kind: object
      fields:
        - name: _id
          schema: { kind: dbId, tag: {{variables.collection}} }
        # declare the document shape here
operations:
  - createCollection: { collection: {{variables.collection}} }
"#;

const SEED_DATA: &str = r#"# Migration {{migration.name}}
# Generated {{helpers.now}}
{{#if migration.description}}# {{migration.description}}
{{/if}}id: {{migration.id}}
name: {{migration.name}}
{{#if migration.parent}}parent: {{migration.parent}}
{{/if}}# carry the full schema state forward, then list the seed documents
schemas: {}
operations:
  - seedCollection:
      collection: {{variables.collection}}
      docs: []
"#;

const TRANSFORM_DATA: &str = r#"# Migration {{migration.name}}
# Generated {{helpers.now}}
{{#if migration.description}}# {{migration.description}}
{{/if}}id: {{migration.id}}
name: {{migration.name}}
{{#if migration.parent}}parent: {{migration.parent}}
{{/if}}# carry the full schema state forward, then fill in both directions
schemas: {}
operations:
  - transformCollection:
      collection: {{variables.collection}}
      up: []
      down: []
"#;

const ADD_INDEX: &str = r#"# Migration {{migration.name}}
# Generated {{helpers.now}}
{{#if migration.description}}# {{migration.description}}
{{/if}}id: {{migration.id}}
name: {{migration.name}}
{{#if migration.parent}}parent: {{migration.parent}}
{{/if}}# declare index metadata on the schema fields, then reconcile
schemas: {}
operations:
  - updateIndexes: { collection: {{variables.collection}} }
"#;

const CUSTOM: &str = r#"# Migration {{migration.name}}
# Generated {{helpers.now}}
{{#if migration.description}}# {{migration.description}}
{{/if}}id: {{migration.id}}
name: {{migration.name}}
{{#if migration.parent}}parent: {{migration.parent}}
{{/if}}schemas: {}
operations: []
# {{variables.note}}
"#;
