pub mod builder;
pub mod file;
pub mod operation;

pub use builder::MigrationBuilder;
pub use file::{MigrationFile, discover_migration_files, load_migration_file};
pub use operation::{Operation, TransformSpec, TransformStep, ValueExpr};

use crate::ident::MigrationId;
use crate::schema::{SchemaDocument, canonicalize_document};
use bson::Bson;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Flags derived from a migration's operation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Property {
    /// The migration contains a create or a lossy transform and cannot be
    /// rolled back without data loss.
    Irreversible,
}

/// An immutable, fully validated migration definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationDefinition {
    pub id: MigrationId,
    pub name: String,
    pub parent: Option<MigrationId>,
    pub schemas: SchemaDocument,
    pub operations: Vec<Operation>,
    pub properties: BTreeSet<Property>,
}

impl MigrationDefinition {
    pub fn is_irreversible(&self) -> bool {
        self.properties.contains(&Property::Irreversible)
    }

    /// Content hash over the canonical schema tree and operation list.
    ///
    /// Seed document ids that look generated (tagged ULIDs) are replaced by
    /// their position in the seed list, so re-minting ids does not change
    /// the checksum while any change to actual content does.
    pub fn checksum(&self) -> String {
        let schemas = canonicalize_document(&self.schemas);
        let operations = sanitize_operations(&self.operations);

        let schema_json =
            serde_json::to_string(&schemas).expect("schema document serializes to json");
        let ops_json =
            serde_json::to_string(&operations).expect("operation list serializes to json");

        format!("{:x}", md5::compute(format!("{}\n{}", schema_json, ops_json)))
    }
}

fn sanitize_operations(operations: &[Operation]) -> Vec<Operation> {
    operations
        .iter()
        .map(|op| {
            let mut op = op.clone();
            match &mut op {
                Operation::SeedCollection { docs, .. }
                | Operation::SeedMultiCollectionType { docs, .. }
                | Operation::SeedMultiModelInstanceType { docs, .. } => {
                    for (position, doc) in docs.iter_mut().enumerate() {
                        let generated = matches!(doc.get("_id"), Some(Bson::String(s))
                            if crate::ident::parse_db_id(s).is_some());
                        if generated {
                            doc.insert("_id", format!("#{}", position));
                        }
                    }
                }
                _ => {}
            }
            op
        })
        .collect()
}
