//! Process-exclusive advisory lock.
//!
//! A sentinel document with `_id = "singleton"` in the reserved
//! `__mongodbee_locks` collection guards the ledger against concurrent
//! operators. The lock is released explicitly on clean exit; a crashed
//! run leaves it behind, and the operator may break a stale one with
//! `force-unlock`.

use crate::constants::{LOCK_COLLECTION, LOCK_DOCUMENT_ID, LOCK_STALE_TIMEOUT};
use crate::driver::DriverAdapter;
use crate::error::{MigrateError, Result};
use bson::{Bson, doc};
use chrono::Utc;
use tracing::warn;

#[derive(Debug)]
pub struct MigrationLock<'a, D: DriverAdapter> {
    driver: &'a D,
    owner: String,
}

impl<'a, D: DriverAdapter> MigrationLock<'a, D> {
    /// Try to acquire the lock for the given owner token. A stale lock
    /// (older than the timeout) is broken automatically with a warning.
    pub async fn acquire(driver: &'a D, owner: &str) -> Result<MigrationLock<'a, D>> {
        let sentinel = doc! {
            "_id": LOCK_DOCUMENT_ID,
            "owner": owner,
            "acquiredAt": bson::DateTime::from_chrono(Utc::now()),
        };

        if driver.insert_many(LOCK_COLLECTION, &[sentinel.clone()]).await.is_ok() {
            return Ok(MigrationLock {
                driver,
                owner: owner.to_string(),
            });
        }

        // Someone holds it; inspect the holder.
        let holder = driver
            .find_one(LOCK_COLLECTION, &doc! { "_id": LOCK_DOCUMENT_ID })
            .await?;

        let Some(holder) = holder else {
            // Released between our insert attempt and the read; retry once.
            driver.insert_many(LOCK_COLLECTION, &[sentinel]).await?;
            return Ok(MigrationLock {
                driver,
                owner: owner.to_string(),
            });
        };

        let acquired_at = holder
            .get_datetime("acquiredAt")
            .map(|dt| dt.to_chrono())
            .unwrap_or_else(|_| Utc::now());
        let age = Utc::now().signed_duration_since(acquired_at);

        if age.to_std().unwrap_or_default() > LOCK_STALE_TIMEOUT {
            warn!(
                "Breaking stale migration lock held by '{}' since {}",
                holder.get_str("owner").unwrap_or("unknown"),
                acquired_at
            );
            force_unlock(driver).await?;
            driver.insert_many(LOCK_COLLECTION, &[sentinel]).await?;
            return Ok(MigrationLock {
                driver,
                owner: owner.to_string(),
            });
        }

        Err(MigrateError::LockBusy {
            owner: holder.get_str("owner").unwrap_or("unknown").to_string(),
            acquired_at: acquired_at.to_rfc3339(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Release on clean exit. Not automatic: an async release cannot run
    /// in Drop, and a crashed run is supposed to leave the lock visible.
    pub async fn release(self) -> Result<()> {
        self.driver
            .delete_many(LOCK_COLLECTION, &[Bson::String(LOCK_DOCUMENT_ID.to_string())])
            .await?;
        Ok(())
    }
}

/// Unconditionally remove the lock document (`force-unlock`).
pub async fn force_unlock<D: DriverAdapter>(driver: &D) -> Result<()> {
    driver
        .delete_many(LOCK_COLLECTION, &[Bson::String(LOCK_DOCUMENT_ID.to_string())])
        .await?;
    Ok(())
}
