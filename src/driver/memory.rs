//! In-memory driver backend.
//!
//! Backs `check` (the simulated shadow database) and the test suite.
//! Semantics mirror the real backend where the engine can observe them:
//! forward `_id` pagination, unique-index enforcement with duplicate-key
//! failures, unordered bulk inserts.

use super::{DriverAdapter, IndexDefinition, index_name};
use crate::error::{MigrateError, Result};
use crate::schema::IndexSpec;
use anyhow::anyhow;
use bson::{Bson, Document};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryCollection {
    /// Documents keyed by a total order over their `_id`.
    docs: BTreeMap<SortKey, Document>,
    indexes: BTreeMap<String, IndexSpec>,
    #[allow(dead_code)]
    validator: Option<Document>,
}

/// Total order over the `_id` values the engine produces (object ids,
/// tagged ULID strings, literals). Type rank first, then value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey(u8, String);

fn sort_key(id: &Bson) -> SortKey {
    match id {
        Bson::Int32(n) => SortKey(0, format!("{:020}", n)),
        Bson::Int64(n) => SortKey(0, format!("{:020}", n)),
        Bson::Double(n) => SortKey(0, format!("{:020.6}", n)),
        Bson::String(s) => SortKey(1, s.clone()),
        Bson::ObjectId(oid) => SortKey(2, oid.to_hex()),
        other => SortKey(3, other.to_string()),
    }
}

fn value_at_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
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

/// Comparable rendering of an indexed value, honoring case-insensitive
/// collation.
fn index_key(value: &Bson, spec: &IndexSpec) -> String {
    match value {
        Bson::String(s) if spec.options.case_insensitive => s.to_lowercase(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct MemoryDriver {
    collections: Mutex<BTreeMap<String, MemoryCollection>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all documents in one collection, in `_id` order.
    /// Test and inspection helper.
    pub async fn dump(&self, name: &str) -> Vec<Document> {
        let collections = self.collections.lock().await;
        collections
            .get(name)
            .map(|c| c.docs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn collection_exists(&self, name: &str) -> bool {
        self.collections.lock().await.contains_key(name)
    }
}

fn unique_violation(
    collection: &MemoryCollection,
    candidate: &Document,
    skip_id: Option<&Bson>,
) -> Option<String> {
    for spec in collection.indexes.values() {
        if !spec.options.unique {
            continue;
        }
        let Some(value) = value_at_path(candidate, &spec.path) else {
            continue;
        };
        if spec.options.sparse && matches!(value, Bson::Null) {
            continue;
        }
        let candidate_key = index_key(value, spec);

        for doc in collection.docs.values() {
            if let (Some(skip), Some(existing_id)) = (skip_id, doc.get("_id")) {
                if skip == existing_id {
                    continue;
                }
            }
            let Some(existing) = value_at_path(doc, &spec.path) else {
                continue;
            };
            if index_key(existing, spec) == candidate_key {
                return Some(format!(
                    "E11000 duplicate key error: index {} dup key {}",
                    index_name(&spec.path),
                    candidate_key
                ));
            }
        }
    }
    None
}

impl DriverAdapter for MemoryDriver {
    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.lock().await.keys().cloned().collect())
    }

    async fn create_collection(
        &self,
        name: &str,
        validator: Option<Document>,
        indexes: &[IndexSpec],
    ) -> Result<()> {
        let mut collections = self.collections.lock().await;
        if collections.contains_key(name) {
            return Err(MigrateError::Driver(anyhow!(
                "collection '{}' already exists",
                name
            )));
        }
        let mut collection = MemoryCollection {
            validator,
            ..Default::default()
        };
        for spec in indexes {
            collection
                .indexes
                .insert(index_name(&spec.path), spec.clone());
        }
        collections.insert(name.to_string(), collection);
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections.lock().await.remove(name);
        Ok(())
    }

    async fn rename_collection(&self, from: &str, to: &str) -> Result<()> {
        let mut collections = self.collections.lock().await;
        let collection = collections.remove(from).ok_or_else(|| {
            MigrateError::Driver(anyhow!("source collection '{}' does not exist", from))
        })?;
        if collections.contains_key(to) {
            collections.insert(from.to_string(), collection);
            return Err(MigrateError::Driver(anyhow!(
                "target collection '{}' already exists",
                to
            )));
        }
        collections.insert(to.to_string(), collection);
        Ok(())
    }

    async fn list_indexes(&self, name: &str) -> Result<Vec<IndexDefinition>> {
        let collections = self.collections.lock().await;
        Ok(collections
            .get(name)
            .map(|c| {
                c.indexes
                    .iter()
                    .map(|(index_name, spec)| IndexDefinition {
                        name: index_name.clone(),
                        path: spec.path.clone(),
                        options: spec.options.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_index(&self, name: &str, spec: &IndexSpec) -> Result<()> {
        let mut collections = self.collections.lock().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| MigrateError::Driver(anyhow!("no collection '{}'", name)))?;

        // A unique index build fails when existing documents collide.
        if spec.options.unique {
            let mut seen = BTreeMap::new();
            for doc in collection.docs.values() {
                let Some(value) = value_at_path(doc, &spec.path) else {
                    continue;
                };
                if spec.options.sparse && matches!(value, Bson::Null) {
                    continue;
                }
                let key = index_key(value, spec);
                if seen.insert(key.clone(), ()).is_some() {
                    return Err(MigrateError::Driver(anyhow!(
                        "E11000 duplicate key error building index {}: dup key {}",
                        index_name(&spec.path),
                        key
                    )));
                }
            }
        }

        collection
            .indexes
            .insert(index_name(&spec.path), spec.clone());
        Ok(())
    }

    async fn drop_index(&self, name: &str, index: &str) -> Result<()> {
        let mut collections = self.collections.lock().await;
        if let Some(collection) = collections.get_mut(name) {
            collection.indexes.remove(index);
        }
        Ok(())
    }

    async fn find_batch(
        &self,
        name: &str,
        after_id: Option<&Bson>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let collections = self.collections.lock().await;
        let Some(collection) = collections.get(name) else {
            return Ok(Vec::new());
        };

        let docs = match after_id {
            Some(id) => {
                let key = sort_key(id);
                collection
                    .docs
                    .range((std::ops::Bound::Excluded(key), std::ops::Bound::Unbounded))
                    .map(|(_, doc)| doc.clone())
                    .take(limit)
                    .collect()
            }
            None => collection.docs.values().take(limit).cloned().collect(),
        };
        Ok(docs)
    }

    async fn insert_many(&self, name: &str, docs: &[Document]) -> Result<()> {
        let mut collections = self.collections.lock().await;
        // Inserting into a missing collection creates it implicitly.
        let collection = collections.entry(name.to_string()).or_default();

        // ordered=false: attempt every document, then report failures.
        let mut failures = Vec::new();
        for doc in docs {
            let Some(id) = doc.get("_id") else {
                failures.push("document missing _id".to_string());
                continue;
            };
            let key = sort_key(id);
            if collection.docs.contains_key(&key) {
                failures.push(format!("E11000 duplicate key error: _id {}", id));
                continue;
            }
            if let Some(violation) = unique_violation(collection, doc, None) {
                failures.push(violation);
                continue;
            }
            collection.docs.insert(key, doc.clone());
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::Driver(anyhow!(
                "bulk write failed for {} document(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    async fn replace_one(&self, name: &str, id: &Bson, doc: &Document) -> Result<()> {
        let mut collections = self.collections.lock().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| MigrateError::Driver(anyhow!("no collection '{}'", name)))?;

        if let Some(violation) = unique_violation(collection, doc, Some(id)) {
            return Err(MigrateError::Driver(anyhow!("{}", violation)));
        }

        let key = sort_key(id);
        if !collection.docs.contains_key(&key) {
            return Err(MigrateError::Driver(anyhow!(
                "no document with _id {} in '{}'",
                id,
                name
            )));
        }

        let mut replacement = doc.clone();
        if !replacement.contains_key("_id") {
            replacement.insert("_id", id.clone());
        }
        collection.docs.insert(key, replacement);
        Ok(())
    }

    async fn delete_many(&self, name: &str, ids: &[Bson]) -> Result<u64> {
        let mut collections = self.collections.lock().await;
        let Some(collection) = collections.get_mut(name) else {
            return Ok(0);
        };
        let mut deleted = 0;
        for id in ids {
            if collection.docs.remove(&sort_key(id)).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn find_one(&self, name: &str, filter: &Document) -> Result<Option<Document>> {
        let collections = self.collections.lock().await;
        let Some(collection) = collections.get(name) else {
            return Ok(None);
        };

        Ok(collection
            .docs
            .values()
            .find(|doc| filter.iter().all(|(k, v)| value_at_path(doc, k) == Some(v)))
            .cloned())
    }
}
