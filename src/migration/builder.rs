//! Fluent authoring surface for migration operation lists.
//!
//! The builder is pure: it records typed operations and derives properties,
//! and `compile` validates everything (notably seed documents against the
//! migration's declared post-state) without touching a database. Scopes are
//! consuming handles, so an operation can only ever name the collection or
//! type its scope was opened for.

use super::operation::{Operation, TransformSpec};
use super::{MigrationDefinition, Property};
use crate::error::MigrateError;
use crate::ident::{MigrationId, parse_db_id};
use crate::schema::{IdStrategy, SchemaDocument, SchemaNode, format_issues, validate_document};
use bson::{Bson, Document};
use std::collections::BTreeSet;

/// The immutable output of a builder run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMigration {
    pub operations: Vec<Operation>,
    pub properties: BTreeSet<Property>,
}

#[derive(Debug)]
pub struct MigrationBuilder {
    schemas: SchemaDocument,
    operations: Vec<Operation>,
}

impl MigrationBuilder {
    /// Start building against the migration's declared post-state.
    pub fn new(schemas: SchemaDocument) -> Self {
        MigrationBuilder {
            schemas,
            operations: Vec::new(),
        }
    }

    /// Append a pre-built operation, used when replaying a stored
    /// operation list through the builder's validation.
    pub(crate) fn push_operation(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    /// Model tag of an instance created earlier in this operation list.
    fn model_of_instance(&self, instance: &str) -> Option<&str> {
        self.operations.iter().find_map(|op| match op {
            Operation::CreateMultiModelInstance {
                instance: created,
                model,
            } if created == instance => Some(model.as_str()),
            _ => None,
        })
    }

    /// Create a new collection and scope into it.
    pub fn create_collection(mut self, name: &str) -> CollectionScope {
        self.operations.push(Operation::CreateCollection {
            collection: name.to_string(),
        });
        CollectionScope {
            builder: self,
            name: name.to_string(),
        }
    }

    /// Scope into an existing collection without creating it.
    pub fn collection(self, name: &str) -> CollectionScope {
        CollectionScope {
            builder: self,
            name: name.to_string(),
        }
    }

    pub fn create_multi_collection(mut self, name: &str) -> MultiCollectionScope {
        self.operations.push(Operation::CreateMultiCollection {
            collection: name.to_string(),
        });
        MultiCollectionScope {
            builder: self,
            name: name.to_string(),
        }
    }

    pub fn multi_collection(self, name: &str) -> MultiCollectionScope {
        MultiCollectionScope {
            builder: self,
            name: name.to_string(),
        }
    }

    /// Instantiate a multi-model template as a physical collection.
    pub fn create_multi_model_instance(
        mut self,
        instance: &str,
        model: &str,
    ) -> MultiModelInstanceScope {
        self.operations.push(Operation::CreateMultiModelInstance {
            instance: instance.to_string(),
            model: model.to_string(),
        });
        MultiModelInstanceScope {
            builder: self,
            instance: instance.to_string(),
            model: model.to_string(),
        }
    }

    /// Reconcile the physical indexes of a collection with its schema.
    pub fn update_indexes(mut self, collection: &str) -> Self {
        self.operations.push(Operation::UpdateIndexes {
            collection: collection.to_string(),
        });
        self
    }

    pub fn rename_collection(mut self, from: &str, to: &str) -> Self {
        self.operations.push(Operation::RenameCollection {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn rename_multi_collection(mut self, from: &str, to: &str) -> Self {
        self.operations.push(Operation::RenameMultiCollection {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Finish: validate seeds and derive properties. Seed problems surface
    /// here, at plan time, never at apply time.
    pub fn compile(self) -> Result<CompiledMigration, MigrateError> {
        for operation in &self.operations {
            self.validate_operation(operation)?;
        }

        let mut properties = BTreeSet::new();
        if self.operations.iter().any(Operation::is_irreversible) {
            properties.insert(Property::Irreversible);
        }

        Ok(CompiledMigration {
            operations: self.operations,
            properties,
        })
    }

    /// Compile and assemble a full definition in one step.
    pub fn into_definition(
        self,
        id: MigrationId,
        name: &str,
        parent: Option<MigrationId>,
    ) -> Result<MigrationDefinition, MigrateError> {
        let schemas = self.schemas.clone();
        let compiled = self.compile()?;
        Ok(MigrationDefinition {
            id,
            name: name.to_string(),
            parent,
            schemas,
            operations: compiled.operations,
            properties: compiled.properties,
        })
    }

    fn validate_operation(&self, operation: &Operation) -> Result<(), MigrateError> {
        match operation {
            Operation::SeedCollection { collection, docs } => {
                // Unknown collections are caught by chain validation; only
                // declared schemas gate seeds.
                if let Some(schema) = self.schemas.collections.get(collection) {
                    validate_seed_docs(collection, None, schema, docs)?;
                }
                Ok(())
            }
            Operation::SeedMultiCollectionType {
                collection,
                type_tag,
                docs,
            } => {
                if let Some(schema) = self.schemas.multi_collection_type(collection, type_tag) {
                    validate_seed_docs(collection, Some(type_tag), schema, docs)?;
                }
                Ok(())
            }
            Operation::SeedMultiModelInstanceType {
                instance,
                type_tag,
                docs,
            } => {
                let schema = self
                    .model_of_instance(instance)
                    .and_then(|model| self.schemas.multi_model_type(model, type_tag));
                if let Some(schema) = schema {
                    validate_seed_docs(instance, Some(type_tag), schema, docs)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Validate seed documents against a declared schema, including the
/// invariant that documents of a tagged type carry ids of that tag.
fn validate_seed_docs(
    target: &str,
    type_tag: Option<&str>,
    schema: &SchemaNode,
    docs: &[Document],
) -> Result<(), MigrateError> {
    let target_label = match type_tag {
        Some(tag) => format!("{}/{}", target, tag),
        None => target.to_string(),
    };

    for (position, doc) in docs.iter().enumerate() {
        let issues = validate_document(doc, schema);
        if !issues.is_empty() {
            return Err(MigrateError::SeedInvalid {
                target: target_label,
                position,
                issues: format_issues(&issues),
            });
        }

        // In a multi-typed collection every document of type T carries an
        // id tagged "T:", unless T declares a literal id.
        if let Some(tag) = type_tag {
            if !matches!(IdStrategy::of(schema), IdStrategy::Literal(_)) {
                if let Some(id) = doc.get("_id") {
                    let tagged = matches!(id, Bson::String(s)
                        if parse_db_id(s).is_some_and(|parsed| parsed.tag == tag));
                    if !tagged {
                        return Err(MigrateError::SeedInvalid {
                            target: target_label,
                            position,
                            issues: format!("_id {} is not tagged '{}:'", id, tag),
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

/// Scope over one plain collection.
pub struct CollectionScope {
    builder: MigrationBuilder,
    name: String,
}

impl CollectionScope {
    /// Insert a fixed set of documents as part of this migration.
    pub fn seed(mut self, docs: Vec<Document>) -> Self {
        self.builder.operations.push(Operation::SeedCollection {
            collection: self.name.clone(),
            docs,
        });
        self
    }

    /// Rewrite every document via the given transform.
    pub fn transform(mut self, spec: TransformSpec) -> Self {
        self.builder.operations.push(Operation::TransformCollection {
            collection: self.name.clone(),
            up: spec.up,
            down: spec.down,
            lossy: spec.lossy,
        });
        self
    }

    pub fn end(self) -> MigrationBuilder {
        self.builder
    }
}

/// Scope over one multi-typed collection.
pub struct MultiCollectionScope {
    builder: MigrationBuilder,
    name: String,
}

impl MultiCollectionScope {
    pub fn r#type(self, tag: &str) -> MultiTypeScope {
        MultiTypeScope {
            scope: self,
            tag: tag.to_string(),
        }
    }

    pub fn end(self) -> MigrationBuilder {
        self.builder
    }
}

/// Scope over one tagged type within a multi-collection.
pub struct MultiTypeScope {
    scope: MultiCollectionScope,
    tag: String,
}

impl MultiTypeScope {
    pub fn seed(mut self, docs: Vec<Document>) -> Self {
        self.scope
            .builder
            .operations
            .push(Operation::SeedMultiCollectionType {
                collection: self.scope.name.clone(),
                type_tag: self.tag.clone(),
                docs,
            });
        self
    }

    pub fn transform(mut self, spec: TransformSpec) -> Self {
        self.scope
            .builder
            .operations
            .push(Operation::TransformMultiCollectionType {
                collection: self.scope.name.clone(),
                type_tag: self.tag.clone(),
                up: spec.up,
                down: spec.down,
                lossy: spec.lossy,
            });
        self
    }

    pub fn end(self) -> MultiCollectionScope {
        self.scope
    }
}

/// Scope over a freshly created multi-model instance.
pub struct MultiModelInstanceScope {
    builder: MigrationBuilder,
    instance: String,
    #[allow(dead_code)]
    model: String,
}

impl MultiModelInstanceScope {
    pub fn r#type(self, tag: &str) -> InstanceTypeScope {
        InstanceTypeScope {
            scope: self,
            tag: tag.to_string(),
        }
    }

    pub fn end(self) -> MigrationBuilder {
        self.builder
    }
}

/// Scope over one tagged type of a multi-model instance.
pub struct InstanceTypeScope {
    scope: MultiModelInstanceScope,
    tag: String,
}

impl InstanceTypeScope {
    pub fn seed(mut self, docs: Vec<Document>) -> Self {
        self.scope
            .builder
            .operations
            .push(Operation::SeedMultiModelInstanceType {
                instance: self.scope.instance.clone(),
                type_tag: self.tag.clone(),
                docs,
            });
        self
    }

    pub fn end(self) -> MultiModelInstanceScope {
        self.scope
    }
}
