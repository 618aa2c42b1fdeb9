//! `mongodbee generate`: render a new migration file from a template.

use super::load_chain;
use crate::config::Config;
use crate::constants::MIGRATION_FILE_EXTENSION;
use crate::ident::{MigrationId, kebab_case};
use crate::templates::{TemplateContext, builtin_template, render_template, TEMPLATE_NAMES};
use anyhow::{Context, Result, bail};
use console::style;
use std::collections::BTreeMap;

pub async fn cmd_generate(
    config: &Config,
    name: &str,
    template: &str,
    mut variables: BTreeMap<String, String>,
    description: Option<String>,
) -> Result<()> {
    let Some(body) = builtin_template(template) else {
        bail!(
            "unknown template '{}'; available: {}",
            template,
            TEMPLATE_NAMES.join(", ")
        );
    };

    // The new migration chains onto the current head, if any.
    let parent = match load_chain(config) {
        Ok(chain) => chain.head().map(|m| m.id.clone()),
        Err(err) => return Err(err).context("cannot generate onto a broken chain"),
    };

    // Collection-oriented templates default their target to the name.
    variables
        .entry("collection".to_string())
        .or_insert_with(|| kebab_case(name).replace('-', "_"));

    let id = MigrationId::new(name);
    let mut context = TemplateContext::new(id.clone(), &kebab_case(name), parent);
    context.description = description;
    let rendered = render_template(body, &context.with_variables(variables).to_value());

    std::fs::create_dir_all(&config.paths.migrations)
        .with_context(|| format!("failed to create {}", config.paths.migrations.display()))?;
    let path = config
        .paths
        .migrations
        .join(format!("{}.{}", id, MIGRATION_FILE_EXTENSION));
    std::fs::write(&path, rendered)
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("{} {}", style("created").green(), path.display());
    Ok(())
}
