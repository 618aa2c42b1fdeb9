//! Progress reporting for long-running plan execution.
//!
//! The executor emits through a sink so the library surface never prints;
//! the CLI installs the console sink, tests and `check` the silent one.

use crate::ident::MigrationId;
use crate::ledger::Direction;
use console::style;

pub trait ProgressSink: Send + Sync {
    fn migration_started(&self, _id: &MigrationId, _direction: Direction) {}

    fn step_started(&self, _description: &str) {}

    /// Emitted after every transform batch. `estimated_remaining` is known
    /// only once the final short batch has been read.
    fn transform_progress(
        &self,
        _collection: &str,
        _processed: u64,
        _estimated_remaining: Option<u64>,
    ) {
    }

    fn migration_finished(&self, _id: &MigrationId) {}

    fn warning(&self, _message: &str) {}
}

/// Silent sink for `check` and tests.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}

/// Human-facing sink used by the CLI.
#[derive(Debug, Default)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn migration_started(&self, id: &MigrationId, direction: Direction) {
        let arrow = match direction {
            Direction::Up => style("↑").green(),
            Direction::Down => style("↓").yellow(),
        };
        println!("  {} {}", arrow, id);
    }

    fn step_started(&self, description: &str) {
        println!("    {}", style(description).dim());
    }

    fn transform_progress(
        &self,
        collection: &str,
        processed: u64,
        estimated_remaining: Option<u64>,
    ) {
        match estimated_remaining {
            Some(0) => println!(
                "    {} {} document(s) transformed",
                style(collection).cyan(),
                processed
            ),
            Some(remaining) => println!(
                "    {} {} transformed, ~{} remaining",
                style(collection).cyan(),
                processed,
                remaining
            ),
            None => println!(
                "    {} {} transformed...",
                style(collection).cyan(),
                processed
            ),
        }
    }

    fn migration_finished(&self, id: &MigrationId) {
        println!("  {} {}", style("✓").green(), id);
    }

    fn warning(&self, message: &str) {
        println!("  {} {}", style("⚠").yellow(), message);
    }
}
