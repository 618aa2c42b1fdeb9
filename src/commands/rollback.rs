//! `mongodbee rollback`: walk the ledger back N steps, or repair a dirty
//! migration.

use super::{connect, load_chain, lock_owner};
use crate::config::Config;
use crate::executor::{CancelFlag, ConsoleProgress, Executor};
use crate::ledger::Ledger;
use crate::lock::MigrationLock;
use crate::planner::{Plan, Target, plan, plan_repair};
use anyhow::{Context, Result, bail};
use console::style;

pub async fn cmd_rollback(
    config: &Config,
    steps: usize,
    repair: bool,
    yes: bool,
    cancel: CancelFlag,
) -> Result<()> {
    let chain = load_chain(config)?;
    let driver = connect(config).await?;
    let lock = MigrationLock::acquire(&driver, &lock_owner()).await?;

    let outcome = async {
        let ledger = Ledger::new(&driver);

        let rollback_plan: Plan = if repair {
            let Some(dirty) = ledger.dirty_entry().await? else {
                bail!("--repair given but the ledger has no dirty entry");
            };
            println!(
                "Repairing dirty migration {}",
                style(&dirty.migration_id).yellow()
            );
            plan_repair(&chain, &dirty)?
        } else {
            let entries = ledger.entries().await?;
            plan(&chain, &entries, Target::Back(steps))?
        };

        if rollback_plan.is_empty() {
            println!("{} nothing to roll back", style("✓").green());
            return anyhow::Ok(());
        }

        println!("Rolling back {} migration(s):", rollback_plan.entries.len());
        for entry in &rollback_plan.entries {
            println!("  {}", entry.id);
        }
        for warning in &rollback_plan.warnings {
            println!("  {} {}", style("⚠").yellow(), warning);
        }

        if !yes && console::user_attended() {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt("Proceed with rollback?")
                .default(false)
                .interact()
                .context("confirmation failed; pass --yes to skip the prompt")?;
            if !confirmed {
                println!("aborted");
                return Ok(());
            }
        }

        let progress = ConsoleProgress;
        let report = Executor::new(&driver, config.migration.batch_size)
            .with_progress(&progress)
            .with_cancel(cancel)
            .execute(&rollback_plan)
            .await?;

        for warning in &report.warnings {
            println!("  {} {}", style("⚠").yellow(), warning);
        }
        println!(
            "{} rolled back {} migration(s)",
            style("✓").green(),
            report.finished.len()
        );
        Ok(())
    }
    .await;

    // A failed rollback must not be masked by a failed release; only
    // surface the release error when the operation itself succeeded.
    if let Err(release_err) = lock.release().await {
        return outcome.and(Err(release_err.into()));
    }
    outcome
}
