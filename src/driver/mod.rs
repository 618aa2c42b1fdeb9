//! Narrow adapter over the database driver.
//!
//! The engine never talks to `mongodb` directly; everything goes through
//! this capability set so `check` and the test suite can swap in the
//! in-memory backend with identical semantics.

pub mod memory;
pub mod mongo;

pub use memory::MemoryDriver;
pub use mongo::MongoDriver;

use crate::error::Result;
use crate::schema::{IndexOptions, IndexSpec};
use bson::{Bson, Document};

/// A physical index as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub path: String,
    pub options: IndexOptions,
}

/// Database capabilities the migration core depends on.
///
/// `find_batch` paginates in forward order: ascending `_id`, resuming
/// strictly after `after_id`. Both backends implement identical semantics.
#[allow(async_fn_in_trait)]
pub trait DriverAdapter: Sync {
    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn create_collection(
        &self,
        name: &str,
        validator: Option<Document>,
        indexes: &[IndexSpec],
    ) -> Result<()>;

    async fn drop_collection(&self, name: &str) -> Result<()>;

    async fn rename_collection(&self, from: &str, to: &str) -> Result<()>;

    async fn list_indexes(&self, name: &str) -> Result<Vec<IndexDefinition>>;

    async fn create_index(&self, name: &str, spec: &IndexSpec) -> Result<()>;

    async fn drop_index(&self, name: &str, index_name: &str) -> Result<()>;

    async fn find_batch(
        &self,
        name: &str,
        after_id: Option<&Bson>,
        limit: usize,
    ) -> Result<Vec<Document>>;

    /// Unordered bulk insert: documents that can be inserted are inserted;
    /// any per-document failure fails the call after the batch.
    async fn insert_many(&self, name: &str, docs: &[Document]) -> Result<()>;

    async fn replace_one(&self, name: &str, id: &Bson, doc: &Document) -> Result<()>;

    async fn delete_many(&self, name: &str, ids: &[Bson]) -> Result<u64>;

    async fn find_one(&self, name: &str, filter: &Document) -> Result<Option<Document>>;
}

/// Default physical name for a declared index path, mirroring the driver's
/// `<field>_1` convention.
pub fn index_name(path: &str) -> String {
    format!("{}_1", path.replace('.', "_"))
}
