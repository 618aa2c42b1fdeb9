//! The executor: apply or roll back a plan against a driver backend.
//!
//! The same code path runs against the real database and the in-memory
//! shadow; only the `DriverAdapter` implementation differs. Each plan
//! entry is bracketed by ledger writes, so any failure in between leaves a
//! dirty entry for the operator to inspect.

pub mod progress;

pub use progress::{ConsoleProgress, NullProgress, ProgressSink};

use crate::constants::INFORMATION_DOCUMENT_ID;
use crate::driver::{DriverAdapter, IndexDefinition, index_name};
use crate::error::{MigrateError, Result};
use crate::ident::{MigrationId, new_db_id, parse_db_id};
use crate::ledger::{Direction, Ledger};
use crate::planner::{CollectionKind, Plan, PlanEntry, PlanStep};
use crate::schema::{
    IdStrategy, IndexAction, IndexChange, IndexOptions, IndexSpec, SchemaDocument, SchemaNode,
    collection_validator, extract_indexes, format_issues, multi_collection_validator,
    validate_document,
};
use bson::{Bson, Document, doc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Cooperative cancellation flag, set from the signal handler. Honored
/// between operations and between batches; an in-flight batch always
/// completes or fails.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Ledger mutations that completed, in order.
    pub finished: Vec<MigrationId>,
    pub warnings: Vec<String>,
}

pub struct Executor<'a, D: DriverAdapter> {
    driver: &'a D,
    batch_size: usize,
    progress: &'a dyn ProgressSink,
    cancel: CancelFlag,
}

impl<'a, D: DriverAdapter> Executor<'a, D> {
    pub fn new(driver: &'a D, batch_size: usize) -> Self {
        Executor {
            driver,
            batch_size: batch_size.max(1),
            progress: &NullProgress,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Apply every entry of the plan, updating the ledger as it goes.
    pub async fn execute(&self, plan: &Plan) -> Result<ExecutionReport> {
        let ledger = Ledger::new(self.driver);
        let mut report = ExecutionReport::default();
        report.warnings.extend(plan.warnings.iter().cloned());

        for entry in &plan.entries {
            self.progress.migration_started(&entry.id, plan.direction);
            ledger
                .mark_applying(&entry.id, &entry.checksum, plan.direction)
                .await?;

            for step in &entry.steps {
                if self.cancel.is_cancelled() {
                    info!("Cancellation requested; leaving '{}' dirty", entry.id);
                    return Err(MigrateError::Cancelled);
                }
                self.execute_step(entry, step, &mut report.warnings).await?;
            }

            match plan.direction {
                Direction::Up => ledger.mark_applied(&entry.id).await?,
                Direction::Down => ledger.remove(&entry.id).await?,
            }
            self.progress.migration_finished(&entry.id);
            report.finished.push(entry.id.clone());
        }

        Ok(report)
    }

    async fn execute_step(
        &self,
        entry: &PlanEntry,
        step: &PlanStep,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        match step {
            PlanStep::CreateCollection { name, kind } => {
                self.progress
                    .step_started(&format!("create collection '{}'", name));
                self.create_collection(entry, name, kind).await
            }
            PlanStep::DropCollection { name } => {
                self.progress
                    .step_started(&format!("drop collection '{}'", name));
                self.driver.drop_collection(name).await
            }
            PlanStep::Seed {
                collection,
                type_tag,
                docs,
            } => {
                self.progress.step_started(&format!(
                    "seed {} document(s) into '{}'",
                    docs.len(),
                    collection
                ));
                self.seed(entry, collection, type_tag.as_deref(), docs).await
            }
            PlanStep::DeleteSeeded { collection, docs } => {
                self.progress.step_started(&format!(
                    "remove {} seeded document(s) from '{}'",
                    docs.len(),
                    collection
                ));
                self.delete_seeded(collection, docs, warnings).await
            }
            PlanStep::Transform {
                collection,
                type_tag,
                spec,
            } => {
                if spec.up.is_empty() {
                    return Ok(());
                }
                self.progress
                    .step_started(&format!("transform '{}'", collection));
                self.transform(entry, collection, type_tag.as_deref(), spec)
                    .await
            }
            PlanStep::ApplyIndexes {
                collection,
                actions,
            } => {
                self.progress
                    .step_started(&format!("update indexes on '{}'", collection));
                self.apply_index_actions(collection, actions).await
            }
            PlanStep::SyncIndexes {
                collection,
                desired,
            } => {
                self.progress
                    .step_started(&format!("sync indexes on '{}'", collection));
                self.sync_indexes(collection, desired).await
            }
            PlanStep::Rename { from, to } => {
                self.progress
                    .step_started(&format!("rename '{}' to '{}'", from, to));
                self.driver.rename_collection(from, to).await
            }
        }
    }

    async fn create_collection(
        &self,
        entry: &PlanEntry,
        name: &str,
        kind: &CollectionKind,
    ) -> Result<()> {
        let (validator, indexes) = match kind {
            CollectionKind::Plain => {
                let schema = entry.schemas.collections.get(name);
                (
                    schema.map(collection_validator),
                    schema.map(index_specs).unwrap_or_default(),
                )
            }
            CollectionKind::Multi => {
                let types = entry.schemas.multi_collections.get(name);
                (
                    types.map(multi_collection_validator),
                    types.map(merged_index_specs).unwrap_or_default(),
                )
            }
            CollectionKind::MultiModelInstance { model } => {
                let types = entry.schemas.multi_models.get(model);
                (
                    types.map(multi_collection_validator),
                    types.map(merged_index_specs).unwrap_or_default(),
                )
            }
        };

        self.driver
            .create_collection(name, validator, &indexes)
            .await?;

        let marker = match kind {
            CollectionKind::Plain => None,
            CollectionKind::Multi => Some(doc! {
                "_id": INFORMATION_DOCUMENT_ID,
                "kind": "multi-collection",
            }),
            CollectionKind::MultiModelInstance { model } => Some(doc! {
                "_id": INFORMATION_DOCUMENT_ID,
                "kind": "multi-model-instance",
                "modelTag": model.clone(),
            }),
        };
        if let Some(marker) = marker {
            self.driver.insert_many(name, &[marker]).await?;
        }
        Ok(())
    }

    async fn seed(
        &self,
        entry: &PlanEntry,
        collection: &str,
        type_tag: Option<&str>,
        docs: &[Document],
    ) -> Result<()> {
        let schema = self
            .resolve_schema(&entry.schemas, collection, type_tag)
            .await?;

        let mut prepared = Vec::with_capacity(docs.len());
        for (position, doc) in docs.iter().enumerate() {
            if let Some(schema) = &schema {
                let issues = validate_document(doc, schema);
                if !issues.is_empty() {
                    return Err(MigrateError::SeedInvalid {
                        target: collection.to_string(),
                        position,
                        issues: format_issues(&issues),
                    });
                }
            }

            let mut doc = doc.clone();
            if !doc.contains_key("_id") {
                doc.insert("_id", self.generate_id(schema.as_ref(), type_tag));
            }
            prepared.push(doc);
        }

        for batch in prepared.chunks(self.batch_size) {
            self.driver.insert_many(collection, batch).await?;
        }
        Ok(())
    }

    fn generate_id(&self, schema: Option<&SchemaNode>, type_tag: Option<&str>) -> Bson {
        let strategy = schema.map(IdStrategy::of);
        match (strategy, type_tag) {
            (Some(IdStrategy::Literal(value)), _) => value,
            (Some(IdStrategy::Tagged(tag)), _) => Bson::String(new_db_id(&tag)),
            // Documents in a multi-typed collection default to ids of
            // their type tag.
            (_, Some(tag)) => Bson::String(new_db_id(tag)),
            _ => Bson::ObjectId(bson::oid::ObjectId::new()),
        }
    }

    async fn delete_seeded(
        &self,
        collection: &str,
        docs: &[Document],
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let mut ids = Vec::new();

        for seeded in docs {
            let mut filter = seeded.clone();
            let generated_id = matches!(seeded.get("_id"), None | Some(Bson::String(_)))
                && seeded
                    .get_str("_id")
                    .map(|s| parse_db_id(s).is_some())
                    .unwrap_or(true);
            if generated_id {
                filter.remove("_id");
            }

            let found = self.driver.find_one(collection, &filter).await?;
            match found {
                Some(current) => {
                    if documents_equal_ignoring_id(&current, seeded) {
                        if let Some(id) = current.get("_id") {
                            ids.push(id.clone());
                        }
                    } else {
                        warnings.push(format!(
                            "seeded document in '{}' has diverged and was left untouched",
                            collection
                        ));
                    }
                }
                // Not found in its seeded form: edited or already removed.
                None => warnings.push(format!(
                    "seeded document in '{}' has diverged or was removed; left untouched",
                    collection
                )),
            }
        }

        for batch in ids.chunks(self.batch_size) {
            self.driver.delete_many(collection, batch).await?;
        }
        Ok(())
    }

    async fn transform(
        &self,
        entry: &PlanEntry,
        collection: &str,
        type_tag: Option<&str>,
        spec: &crate::migration::TransformSpec,
    ) -> Result<()> {
        let schema = self
            .resolve_schema(&entry.schemas, collection, type_tag)
            .await?;

        let mut after: Option<Bson> = None;
        let mut processed: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let batch = self
                .driver
                .find_batch(collection, after.as_ref(), self.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();
            after = batch.last().and_then(|d| d.get("_id").cloned());

            for original in batch {
                let Some(id) = original.get("_id").cloned() else {
                    continue;
                };
                if is_information_marker(&id) {
                    continue;
                }
                if let Some(tag) = type_tag {
                    if !document_belongs_to_type(&id, tag, schema.as_ref()) {
                        continue;
                    }
                }

                let mut transformed = original.clone();
                spec.apply(&mut transformed);
                if transformed == original {
                    continue;
                }
                if transformed.get("_id") != Some(&id) {
                    return Err(MigrateError::TransformInvalid {
                        collection: collection.to_string(),
                        id: id.to_string(),
                        issues: "transform must not change _id".into(),
                    });
                }

                if let Some(schema) = &schema {
                    let issues = validate_document(&transformed, schema);
                    if !issues.is_empty() {
                        return Err(MigrateError::TransformInvalid {
                            collection: collection.to_string(),
                            id: id.to_string(),
                            issues: format_issues(&issues),
                        });
                    }
                }

                self.driver.replace_one(collection, &id, &transformed).await?;
                processed += 1;
            }

            let estimated_remaining = (batch_len < self.batch_size).then_some(0);
            self.progress
                .transform_progress(collection, processed, estimated_remaining);
        }

        debug!("Transformed {} document(s) in '{}'", processed, collection);
        Ok(())
    }

    async fn apply_index_actions(
        &self,
        collection: &str,
        actions: &[IndexAction],
    ) -> Result<()> {
        for action in actions {
            let spec = IndexSpec {
                path: action.path.clone(),
                options: action.options.clone(),
            };
            match action.change {
                IndexChange::Unchanged => {}
                IndexChange::Add => self.driver.create_index(collection, &spec).await?,
                IndexChange::Drop => {
                    self.driver
                        .drop_index(collection, &index_name(&action.path))
                        .await?;
                }
                // Rebuild is a drop immediately followed by a create; both
                // writes happen inside the lock hold.
                IndexChange::Rebuild => {
                    self.driver
                        .drop_index(collection, &index_name(&action.path))
                        .await?;
                    self.driver.create_index(collection, &spec).await?;
                }
            }
        }
        Ok(())
    }

    /// Reconcile the physical indexes of a collection against the desired
    /// set: drop obsolete, create new, rebuild changed.
    async fn sync_indexes(
        &self,
        collection: &str,
        desired: &BTreeMap<String, IndexOptions>,
    ) -> Result<()> {
        let actual: Vec<IndexDefinition> = self.driver.list_indexes(collection).await?;
        let actual_by_path: BTreeMap<&str, &IndexDefinition> =
            actual.iter().map(|d| (d.path.as_str(), d)).collect();

        for existing in &actual {
            if !desired.contains_key(&existing.path) {
                self.driver.drop_index(collection, &existing.name).await?;
            }
        }

        for (path, options) in desired {
            let wanted = options.clone().normalized();
            let spec = IndexSpec {
                path: path.clone(),
                options: wanted.clone(),
            };
            match actual_by_path.get(path.as_str()) {
                None => self.driver.create_index(collection, &spec).await?,
                Some(existing) if existing.options.clone().normalized() != wanted => {
                    self.driver.drop_index(collection, &existing.name).await?;
                    self.driver.create_index(collection, &spec).await?;
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// The schema a write against this collection (and type) is validated
    /// with. Multi-model instances resolve their model through the
    /// `_information` marker.
    async fn resolve_schema(
        &self,
        schemas: &SchemaDocument,
        collection: &str,
        type_tag: Option<&str>,
    ) -> Result<Option<SchemaNode>> {
        match type_tag {
            None => Ok(schemas.collections.get(collection).cloned()),
            Some(tag) => {
                if let Some(schema) = schemas.multi_collection_type(collection, tag) {
                    return Ok(Some(schema.clone()));
                }
                let marker = self
                    .driver
                    .find_one(collection, &doc! { "_id": INFORMATION_DOCUMENT_ID })
                    .await?;
                let model = marker.and_then(|m| m.get_str("modelTag").ok().map(String::from));
                Ok(model
                    .and_then(|model| schemas.multi_model_type(&model, tag).cloned()))
            }
        }
    }
}

fn index_specs(schema: &SchemaNode) -> Vec<IndexSpec> {
    extract_indexes(schema)
        .into_iter()
        .map(|(path, options)| IndexSpec { path, options })
        .collect()
}

fn merged_index_specs(types: &BTreeMap<String, SchemaNode>) -> Vec<IndexSpec> {
    let mut merged: BTreeMap<String, IndexOptions> = BTreeMap::new();
    for schema in types.values() {
        merged.extend(extract_indexes(schema));
    }
    merged
        .into_iter()
        .map(|(path, options)| IndexSpec { path, options })
        .collect()
}

fn is_information_marker(id: &Bson) -> bool {
    matches!(id, Bson::String(s) if s == INFORMATION_DOCUMENT_ID)
}

/// Whether a document participates in a typed transform, judged by its id:
/// tagged ids match their tag, literal ids match the type's declared
/// literal.
fn document_belongs_to_type(id: &Bson, tag: &str, schema: Option<&SchemaNode>) -> bool {
    if let Bson::String(s) = id {
        if parse_db_id(s).is_some_and(|parsed| parsed.tag == tag) {
            return true;
        }
    }
    if let Some(schema) = schema {
        if let IdStrategy::Literal(literal) = IdStrategy::of(schema) {
            return id == &literal;
        }
    }
    false
}

/// Body equality ignoring `_id`, used to decide whether a seeded document
/// may be deleted on rollback.
fn documents_equal_ignoring_id(current: &Document, seeded: &Document) -> bool {
    let strip = |doc: &Document| {
        let mut out = doc.clone();
        out.remove("_id");
        out
    };
    strip(current) == strip(seeded)
}
