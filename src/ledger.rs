//! The ledger: persistent record of applied migrations, and discovery of
//! dynamically created multi-model instances.
//!
//! Entries live in the reserved `__mongodbee_migrations` collection, keyed
//! by migration id. Because migration ids sort chronologically, forward
//! `_id` pagination returns entries in application order. Multi-model
//! instances are discovered by scanning collections for their
//! `_information` marker; there is deliberately no side registry, so the
//! ledger stays trustworthy after a restore from backup.

use crate::constants::{INFORMATION_DOCUMENT_ID, LEDGER_COLLECTION};
use crate::driver::DriverAdapter;
use crate::error::{MigrateError, Result};
use crate::ident::MigrationId;
use bson::{Bson, doc};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LedgerStatus {
    Applied,
    /// A run started this migration and did not finish; operator
    /// intervention is required.
    Dirty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    #[serde(rename = "_id")]
    pub migration_id: MigrationId,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub applied_at: DateTime<Utc>,
    pub direction: Direction,
    pub checksum: String,
    pub status: LedgerStatus,
}

pub struct Ledger<'a, D: DriverAdapter> {
    driver: &'a D,
}

impl<'a, D: DriverAdapter> Ledger<'a, D> {
    pub fn new(driver: &'a D) -> Self {
        Ledger { driver }
    }

    /// All entries in application order.
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        let mut after: Option<Bson> = None;

        loop {
            let batch = self
                .driver
                .find_batch(LEDGER_COLLECTION, after.as_ref(), 100)
                .await?;
            if batch.is_empty() {
                break;
            }
            after = batch.last().and_then(|d| d.get("_id").cloned());
            for doc in batch {
                let entry: LedgerEntry = bson::from_document(doc)
                    .map_err(|e| MigrateError::Driver(anyhow::Error::new(e).context(
                        "ledger entry does not parse; the ledger collection may be corrupted",
                    )))?;
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    /// Applied migration ids in application order.
    pub async fn list(&self) -> Result<Vec<MigrationId>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .map(|e| e.migration_id)
            .collect())
    }

    /// The most recent applied migration, if any.
    pub async fn head(&self) -> Result<Option<MigrationId>> {
        Ok(self.list().await?.into_iter().next_back())
    }

    /// Any entry left dirty by a crashed run.
    pub async fn dirty_entry(&self) -> Result<Option<LedgerEntry>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .find(|e| e.status == LedgerStatus::Dirty))
    }

    /// Open a dirty entry before touching user collections. Fails with
    /// `LedgerBusy` when any dirty entry already exists.
    pub async fn mark_applying(
        &self,
        id: &MigrationId,
        checksum: &str,
        direction: Direction,
    ) -> Result<()> {
        if let Some(dirty) = self.dirty_entry().await? {
            // Rolling back the dirty migration itself (repair) re-marks
            // its own entry; anything else is blocked.
            let repairing = direction == Direction::Down && dirty.migration_id == *id;
            if !repairing {
                return Err(MigrateError::LedgerBusy {
                    id: dirty.migration_id.to_string(),
                });
            }
        }

        let entry = LedgerEntry {
            migration_id: id.clone(),
            applied_at: Utc::now(),
            direction,
            checksum: checksum.to_string(),
            status: LedgerStatus::Dirty,
        };
        let doc = bson::to_document(&entry)
            .map_err(|e| MigrateError::Driver(anyhow::Error::new(e)))?;

        // Rollback reuses the entry of the migration being rolled back.
        if direction == Direction::Down {
            self.driver
                .delete_many(LEDGER_COLLECTION, &[Bson::String(id.to_string())])
                .await?;
        }
        self.driver.insert_many(LEDGER_COLLECTION, &[doc]).await?;
        Ok(())
    }

    /// Clear the dirty flag after a successful apply.
    pub async fn mark_applied(&self, id: &MigrationId) -> Result<()> {
        let current = self
            .driver
            .find_one(LEDGER_COLLECTION, &doc! { "_id": id.to_string() })
            .await?
            .ok_or_else(|| {
                MigrateError::Driver(anyhow::anyhow!("no ledger entry for '{}'", id))
            })?;

        let mut updated = current;
        updated.insert("status", "applied");
        self.driver
            .replace_one(LEDGER_COLLECTION, &Bson::String(id.to_string()), &updated)
            .await?;
        Ok(())
    }

    /// Remove the entry after a successful rollback.
    pub async fn remove(&self, id: &MigrationId) -> Result<()> {
        self.driver
            .delete_many(LEDGER_COLLECTION, &[Bson::String(id.to_string())])
            .await?;
        Ok(())
    }

    /// Names of collections that are instances of the given multi-model
    /// template, discovered through their `_information` marker document.
    pub async fn discover_multi_model_instances(&self, model_tag: &str) -> Result<Vec<String>> {
        let mut instances = Vec::new();
        for name in self.driver.list_collections().await? {
            if name.starts_with("__mongodbee_") {
                continue;
            }
            let marker = self
                .driver
                .find_one(&name, &doc! { "_id": INFORMATION_DOCUMENT_ID })
                .await?;
            if let Some(marker) = marker {
                let is_instance = marker.get_str("kind") == Ok("multi-model-instance")
                    && marker.get_str("modelTag") == Ok(model_tag);
                if is_instance {
                    instances.push(name);
                }
            }
        }
        Ok(instances)
    }
}
