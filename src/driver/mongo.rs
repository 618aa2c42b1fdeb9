//! The real driver backend over `mongodb`.

use super::{DriverAdapter, IndexDefinition, index_name};
use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::schema::{IndexOptions, IndexSpec};
use bson::{Bson, Document, doc};
use futures_util::TryStreamExt;
use mongodb::options::{
    ClientOptions, Collation, CollationStrength, CreateCollectionOptions, FindOptions,
    InsertManyOptions,
};
use mongodb::{Client, Database, IndexModel};
use tracing::debug;

pub struct MongoDriver {
    client: Client,
    db: Database,
}

impl MongoDriver {
    /// Connect using the resolved database configuration. Driver tunables
    /// are standard URI options, so they are folded into the URI before
    /// parsing.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let uri = config.uri_with_options();
        let mut options = ClientOptions::parse(&uri).await?;
        options.app_name = Some("mongodbee".to_string());

        let client = Client::with_options(options)?;
        let db = client.database(&config.name);
        debug!("Connected to database '{}'", config.name);
        Ok(MongoDriver { client, db })
    }

    pub fn database_name(&self) -> &str {
        self.db.name()
    }
}

/// Physical collation for declared index options.
fn collation_for(options: &IndexOptions) -> Option<Collation> {
    if options.case_insensitive {
        let locale = options.collation.clone().unwrap_or_else(|| "en".to_string());
        Some(
            Collation::builder()
                .locale(locale)
                .strength(CollationStrength::Secondary)
                .build(),
        )
    } else {
        options
            .collation
            .clone()
            .map(|locale| Collation::builder().locale(locale).build())
    }
}

/// Declared-side view of a physical index.
fn options_from_model(model: &IndexModel) -> IndexOptions {
    let opts = model.options.as_ref();
    let collation = opts.and_then(|o| o.collation.as_ref());

    let case_insensitive = collation
        .is_some_and(|c| matches!(c.strength, Some(CollationStrength::Secondary)));

    IndexOptions {
        unique: opts.and_then(|o| o.unique).unwrap_or(false),
        sparse: opts.and_then(|o| o.sparse).unwrap_or(false),
        case_insensitive,
        collation: collation.map(|c| c.locale.clone()),
    }
    .normalized()
}

impl DriverAdapter for MongoDriver {
    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.db.list_collection_names(None).await?)
    }

    async fn create_collection(
        &self,
        name: &str,
        validator: Option<Document>,
        indexes: &[IndexSpec],
    ) -> Result<()> {
        let options = match validator {
            Some(validator) => CreateCollectionOptions::builder()
                .validator(validator)
                .build(),
            None => CreateCollectionOptions::default(),
        };
        self.db.create_collection(name, options).await?;

        for spec in indexes {
            self.create_index(name, spec).await?;
        }
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.db.collection::<Document>(name).drop(None).await?;
        Ok(())
    }

    async fn rename_collection(&self, from: &str, to: &str) -> Result<()> {
        let db_name = self.db.name();
        self.client
            .database("admin")
            .run_command(
                doc! {
                    "renameCollection": format!("{}.{}", db_name, from),
                    "to": format!("{}.{}", db_name, to),
                },
                None,
            )
            .await?;
        Ok(())
    }

    async fn list_indexes(&self, name: &str) -> Result<Vec<IndexDefinition>> {
        let cursor = self
            .db
            .collection::<Document>(name)
            .list_indexes(None)
            .await?;
        let models: Vec<IndexModel> = cursor.try_collect().await?;

        let mut out = Vec::new();
        for model in models {
            let physical_name = model
                .options
                .as_ref()
                .and_then(|o| o.name.clone())
                .unwrap_or_default();
            if physical_name == "_id_" {
                continue;
            }
            // Single-path indexes only; anything else is not ours to manage.
            let Some(path) = model.keys.keys().next().cloned() else {
                continue;
            };
            if model.keys.len() > 1 {
                continue;
            }
            out.push(IndexDefinition {
                name: physical_name,
                path,
                options: options_from_model(&model),
            });
        }
        Ok(out)
    }

    async fn create_index(&self, name: &str, spec: &IndexSpec) -> Result<()> {
        let mut index_options = mongodb::options::IndexOptions::builder()
            .name(index_name(&spec.path))
            .build();
        index_options.unique = spec.options.unique.then_some(true);
        index_options.sparse = spec.options.sparse.then_some(true);
        index_options.collation = collation_for(&spec.options);

        let model = IndexModel::builder()
            .keys(doc! { spec.path.clone(): 1 })
            .options(index_options)
            .build();
        self.db
            .collection::<Document>(name)
            .create_index(model, None)
            .await?;
        Ok(())
    }

    async fn drop_index(&self, name: &str, index: &str) -> Result<()> {
        self.db
            .collection::<Document>(name)
            .drop_index(index, None)
            .await?;
        Ok(())
    }

    async fn find_batch(
        &self,
        name: &str,
        after_id: Option<&Bson>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let filter = match after_id {
            Some(id) => doc! { "_id": { "$gt": id.clone() } },
            None => Document::new(),
        };
        let options = FindOptions::builder()
            .sort(doc! { "_id": 1 })
            .limit(limit as i64)
            .build();

        let cursor = self
            .db
            .collection::<Document>(name)
            .find(filter, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_many(&self, name: &str, docs: &[Document]) -> Result<()> {
        let options = InsertManyOptions::builder().ordered(false).build();
        self.db
            .collection::<Document>(name)
            .insert_many(docs.to_vec(), options)
            .await?;
        Ok(())
    }

    async fn replace_one(&self, name: &str, id: &Bson, document: &Document) -> Result<()> {
        self.db
            .collection::<Document>(name)
            .replace_one(doc! { "_id": id.clone() }, document.clone(), None)
            .await?;
        Ok(())
    }

    async fn delete_many(&self, name: &str, ids: &[Bson]) -> Result<u64> {
        let result = self
            .db
            .collection::<Document>(name)
            .delete_many(doc! { "_id": { "$in": ids.to_vec() } }, None)
            .await?;
        Ok(result.deleted_count)
    }

    async fn find_one(&self, name: &str, filter: &Document) -> Result<Option<Document>> {
        Ok(self
            .db
            .collection::<Document>(name)
            .find_one(filter.clone(), None)
            .await?)
    }
}
