//! On-disk migration artifacts.
//!
//! A migration is authored as one YAML file named `<id>.yaml` in the
//! migrations directory. Loading replays the stored operation list through
//! the builder, so a hand-edited file gets exactly the same validation as
//! one produced through the API.

use super::builder::MigrationBuilder;
use super::operation::Operation;
use super::MigrationDefinition;
use crate::constants::MIGRATION_FILE_EXTENSION;
use crate::error::MigrateError;
use crate::ident::MigrationId;
use crate::schema::SchemaDocument;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Serialized form of a migration definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MigrationFile {
    pub id: MigrationId,
    pub name: String,
    #[serde(default)]
    pub parent: Option<MigrationId>,
    #[serde(default, skip_serializing_if = "SchemaDocument::is_empty")]
    pub schemas: SchemaDocument,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,
}

impl MigrationFile {
    pub fn from_definition(definition: &MigrationDefinition) -> Self {
        MigrationFile {
            id: definition.id.clone(),
            name: definition.name.clone(),
            parent: definition.parent.clone(),
            schemas: definition.schemas.clone(),
            operations: definition.operations.clone(),
        }
    }

    /// Validate through the builder and produce the immutable definition.
    pub fn into_definition(self) -> Result<MigrationDefinition, MigrateError> {
        let mut builder = MigrationBuilder::new(self.schemas.clone());
        for operation in self.operations {
            builder.push_operation(operation);
        }
        builder.into_definition(self.id, &self.name, self.parent)
    }

    pub fn render(&self) -> Result<String> {
        serde_yaml::to_string(self).context("failed to render migration file")
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, MIGRATION_FILE_EXTENSION)
    }
}

/// All migration artifacts in a directory, sorted by file name (and thus
/// by migration id). Returns an empty list for a missing directory.
pub fn discover_migration_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let pattern = dir.join(format!("*.{}", MIGRATION_FILE_EXTENSION));
    let pattern = pattern
        .to_str()
        .with_context(|| format!("migrations path {} is not valid UTF-8", dir.display()))?;

    let mut files: Vec<PathBuf> = glob::glob(pattern)
        .context("invalid migrations glob")?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    Ok(files)
}

/// Parse and validate one migration artifact.
pub fn load_migration_file(path: &Path) -> Result<MigrationDefinition> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: MigrationFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let definition = file
        .into_definition()
        .with_context(|| format!("invalid migration in {}", path.display()))?;
    Ok(definition)
}

/// Write a migration artifact into the migrations directory.
pub fn write_migration_file(dir: &Path, file: &MigrationFile) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(file.file_name());
    std::fs::write(&path, file.render()?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaNode;
    use bson::doc;

    fn sample_file() -> MigrationFile {
        let mut schemas = SchemaDocument::default();
        schemas.collections.insert(
            "user".into(),
            SchemaNode::object(vec![
                ("_id", SchemaNode::db_id("user")),
                ("name", SchemaNode::string()),
            ]),
        );
        MigrationFile {
            id: MigrationId::new("create-users"),
            name: "create-users".into(),
            parent: None,
            schemas,
            operations: vec![
                Operation::CreateCollection {
                    collection: "user".into(),
                },
                Operation::SeedCollection {
                    collection: "user".into(),
                    docs: vec![doc! { "name": "Alice" }],
                },
            ],
        }
    }

    #[test]
    fn test_render_parse_roundtrip() {
        let file = sample_file();
        let rendered = file.render().unwrap();
        let parsed: MigrationFile = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(parsed.id, file.id);
        assert_eq!(parsed.operations, file.operations);
    }

    #[test]
    fn test_into_definition_validates_seeds() {
        let mut file = sample_file();
        file.operations[1] = Operation::SeedCollection {
            collection: "user".into(),
            docs: vec![doc! { "name": 42 }],
        };
        assert!(file.into_definition().is_err());
    }

    #[test]
    fn test_discovery_sorts_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let first = sample_file();
        let mut second = sample_file();
        second.id = MigrationId::new("add-posts");
        second.name = "add-posts".into();
        second.parent = Some(first.id.clone());

        // written out of order on purpose
        write_migration_file(dir.path(), &second).unwrap();
        write_migration_file(dir.path(), &first).unwrap();

        let files = discover_migration_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].file_name().unwrap().to_str().unwrap() < files[1].file_name().unwrap().to_str().unwrap());

        let definition = load_migration_file(&files[0]).unwrap();
        assert_eq!(definition.name, "create-users");
    }
}
