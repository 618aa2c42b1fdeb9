pub mod canonical;
pub mod diff;
pub mod indexes;
pub mod node;
pub mod validate;
pub mod validator;

pub use canonical::{canonicalize, canonicalize_document, schemas_equal};
pub use diff::{EditKind, SchemaEdit, apply_diff, diff, diff_documents};
pub use indexes::{IndexAction, IndexChange, IndexSpec, diff_indexes, extract_indexes};
pub use node::{
    IdStrategy, IndexOptions, ObjectField, Refinement, SchemaDocument, SchemaKind, SchemaNode,
};
pub use validate::{ValidationIssue, format_issues, validate_document};
pub use validator::{collection_validator, multi_collection_validator};
