//! `mongodbee status`: applied/pending/dirty report.
//!
//! Read-only: takes no lock, so concurrent status calls always succeed and
//! observe some serialized state of the ledger.

use super::{connect, load_chain};
use crate::config::Config;
use crate::ledger::{Ledger, LedgerStatus};
use anyhow::Result;
use console::style;
use serde_json::json;

pub async fn cmd_status(config: &Config, json: bool) -> Result<()> {
    let chain = load_chain(config)?;
    let driver = connect(config).await?;
    let ledger = Ledger::new(&driver);
    let entries = ledger.entries().await?;

    let applied_ids: Vec<_> = entries.iter().map(|e| e.migration_id.clone()).collect();
    let dirty: Vec<_> = entries
        .iter()
        .filter(|e| e.status == LedgerStatus::Dirty)
        .map(|e| e.migration_id.to_string())
        .collect();
    let divergent: Vec<String> = applied_ids
        .iter()
        .enumerate()
        .filter(|(i, id)| chain.migrations().get(*i).map(|m| &m.id) != Some(*id))
        .map(|(_, id)| id.to_string())
        .collect();
    let pending: Vec<String> = chain
        .migrations()
        .iter()
        .skip(applied_ids.len())
        .map(|m| m.id.to_string())
        .collect();

    if json {
        let report = json!({
            "database": config.database.name,
            "applied": applied_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
            "pending": pending,
            "dirty": dirty,
            "divergent": divergent,
            "clean": dirty.is_empty() && divergent.is_empty(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Migration status for database '{}'",
        style(&config.database.name).cyan()
    );

    for entry in &entries {
        let marker = match entry.status {
            LedgerStatus::Applied => style("✓").green(),
            LedgerStatus::Dirty => style("✗").red(),
        };
        println!(
            "  {} {} ({} {})",
            marker,
            entry.migration_id,
            entry.direction,
            entry.applied_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    for id in &pending {
        println!("  {} {} (pending)", style("·").dim(), id);
    }

    if !dirty.is_empty() {
        println!(
            "\n{} dirty migration(s): {}",
            style("✗").red(),
            dirty.join(", ")
        );
        println!("  A previous run did not finish. Inspect the database, then");
        println!("  either `rollback --repair` or restore from backup.");
    }
    if !divergent.is_empty() {
        println!(
            "\n{} ledger entries unknown to the chain: {}",
            style("✗").red(),
            divergent.join(", ")
        );
    }
    if dirty.is_empty() && divergent.is_empty() {
        println!("\n{} clean", style("✓").green());
    }

    Ok(())
}
