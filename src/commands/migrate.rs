//! `mongodbee migrate`: apply pending migrations up to a target, and the
//! `force-unlock` escape hatch.

use super::{connect, load_chain, lock_owner};
use crate::config::Config;
use crate::executor::{CancelFlag, ConsoleProgress, Executor};
use crate::ident::MigrationId;
use crate::ledger::Ledger;
use crate::lock::{MigrationLock, force_unlock};
use crate::planner::{Target, plan};
use anyhow::{Context, Result};
use console::style;
use tracing::info;

pub async fn cmd_migrate(
    config: &Config,
    target: Option<String>,
    cancel: CancelFlag,
) -> Result<()> {
    if config.migration.dry_run {
        info!("dryRun is set; running check instead");
        return super::cmd_check(config).await;
    }

    let target = match target {
        Some(raw) => Target::Id(raw.parse::<MigrationId>()?),
        None => Target::Head,
    };

    let chain = load_chain(config)?;
    let driver = connect(config).await?;
    let lock = MigrationLock::acquire(&driver, &lock_owner()).await?;

    // Everything between lock acquisition and release; the lock is freed
    // on every clean exit path, success or failure.
    let outcome = async {
        let ledger = Ledger::new(&driver);
        let entries = ledger.entries().await?;
        let pending_plan = plan(&chain, &entries, target)?;

        if pending_plan.is_empty() {
            println!("{} database is up to date", style("✓").green());
            return anyhow::Ok(());
        }

        if !config.migration.backup {
            println!(
                "{} migration.backup is disabled; proceeding without one",
                style("⚠").yellow()
            );
        }

        let progress = ConsoleProgress;
        let report = Executor::new(&driver, config.migration.batch_size)
            .with_progress(&progress)
            .with_cancel(cancel)
            .execute(&pending_plan)
            .await?;

        for warning in &report.warnings {
            println!("  {} {}", style("⚠").yellow(), warning);
        }
        println!(
            "{} applied {} migration(s)",
            style("✓").green(),
            report.finished.len()
        );
        Ok(())
    }
    .await;

    // A failed migration must not be masked by a failed release; only
    // surface the release error when the operation itself succeeded.
    if let Err(release_err) = lock.release().await {
        return outcome.and(Err(release_err.into()));
    }
    outcome
}

pub async fn cmd_force_unlock(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Break the migration lock? Only do this when no other run is active")
            .default(false)
            .interact()
            .context("confirmation failed; pass --yes to skip the prompt")?;
        if !confirmed {
            println!("aborted");
            return Ok(());
        }
    }

    let driver = connect(config).await?;
    force_unlock(&driver).await?;
    println!("{} lock removed", style("✓").green());
    Ok(())
}
