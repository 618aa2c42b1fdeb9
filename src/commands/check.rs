//! `mongodbee check`: validate the chain and dry-run the pending plan
//! against the in-memory shadow database. Never writes to the real one.

use super::{connect, load_chain};
use crate::config::Config;
use crate::constants::{INFORMATION_DOCUMENT_ID, LEDGER_COLLECTION};
use crate::driver::{DriverAdapter, MemoryDriver, MongoDriver};
use crate::executor::{Executor, NullProgress};
use crate::ledger::Ledger;
use crate::planner::{Target, plan};
use anyhow::{Context, Result};
use bson::doc;
use console::style;
use tracing::info;

pub async fn cmd_check(config: &Config) -> Result<()> {
    let chain = load_chain(config)?;
    println!(
        "Chain: {} migration(s) loaded from {}",
        chain.len(),
        config.paths.migrations.display()
    );

    let driver = connect(config).await?;
    let ledger = Ledger::new(&driver);
    let entries = ledger.entries().await?;

    // Chain/ledger reconciliation (checksums, divergence, dirty state)
    // happens inside the planner.
    let pending_plan = plan(&chain, &entries, Target::Head)
        .context("chain and ledger do not reconcile")?;

    if pending_plan.is_empty() {
        println!("{} database is up to date", style("✓").green());
        return Ok(());
    }

    // Replay against the shadow: collection names, markers and ledger are
    // hydrated from the live database; documents are not.
    let shadow = hydrate_shadow(&driver).await?;
    let report = Executor::new(&shadow, config.migration.batch_size)
        .with_progress(&NullProgress)
        .execute(&pending_plan)
        .await
        .context("simulated execution failed")?;

    println!(
        "{} {} migration(s) would be applied:",
        style("✓").green(),
        report.finished.len()
    );
    for entry in &pending_plan.entries {
        println!("  {} ({} step(s))", entry.id, entry.steps.len());
    }
    for warning in &report.warnings {
        println!("  {} {}", style("⚠").yellow(), warning);
    }

    Ok(())
}

/// Copy the structural state of the live database into a fresh memory
/// backend: collection names, `_information` markers, ledger entries.
pub(crate) async fn hydrate_shadow(driver: &MongoDriver) -> Result<MemoryDriver> {
    let shadow = MemoryDriver::new();

    for name in driver.list_collections().await? {
        if name == LEDGER_COLLECTION {
            let mut after = None;
            loop {
                let batch = driver.find_batch(&name, after.as_ref(), 100).await?;
                if batch.is_empty() {
                    break;
                }
                after = batch.last().and_then(|d| d.get("_id").cloned());
                shadow.insert_many(&name, &batch).await?;
            }
            continue;
        }

        shadow.create_collection(&name, None, &[]).await?;
        for index in driver.list_indexes(&name).await? {
            shadow
                .create_index(
                    &name,
                    &crate::schema::IndexSpec {
                        path: index.path,
                        options: index.options,
                    },
                )
                .await?;
        }
        if let Some(marker) = driver
            .find_one(&name, &doc! { "_id": INFORMATION_DOCUMENT_ID })
            .await?
        {
            shadow.insert_many(&name, &[marker]).await?;
        }
    }

    info!("Hydrated shadow database");
    Ok(shadow)
}
