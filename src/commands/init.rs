//! `mongodbee init`: scaffold a project.

use crate::config::default_config_template;
use crate::constants::CONFIG_FILENAME;
use crate::ident::MigrationId;
use crate::migration::file::write_migration_file;
use crate::migration::MigrationFile;
use crate::schema::SchemaDocument;
use anyhow::{Context, Result, bail};
use console::style;
use std::path::Path;

pub async fn cmd_init(root: &Path, database_name: &str) -> Result<()> {
    let config_path = root.join(CONFIG_FILENAME);
    if config_path.exists() {
        bail!("{} already exists; refusing to overwrite", config_path.display());
    }

    std::fs::create_dir_all(root.join("migrations")).context("failed to create migrations/")?;
    std::fs::create_dir_all(root.join("schemas")).context("failed to create schemas/")?;
    std::fs::write(&config_path, default_config_template(database_name))
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    // Root migration: empty schema state, no operations.
    let id = MigrationId::new("init");
    let root_migration = MigrationFile {
        id,
        name: "init".to_string(),
        parent: None,
        schemas: SchemaDocument::default(),
        operations: Vec::new(),
    };
    let migration_path = write_migration_file(&root.join("migrations"), &root_migration)?;

    println!("{} {}", style("created").green(), config_path.display());
    println!("{} {}", style("created").green(), migration_path.display());
    println!(
        "\nEdit {} and run {} to get started.",
        CONFIG_FILENAME,
        style("mongodbee migrate").cyan()
    );
    Ok(())
}
