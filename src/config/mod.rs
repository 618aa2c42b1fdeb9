pub mod builder;
pub mod merge;
pub mod types;

#[cfg(test)]
mod tests;

pub use builder::ConfigBuilder;
pub use types::*;

use crate::constants::CONFIG_FILENAME;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Load the raw configuration file. A missing file yields an empty input
/// (everything can still come from env vars and CLI arguments).
pub fn load_config(config_file: &str) -> Result<(ConfigInput, PathBuf)> {
    let config_dir = Path::new(config_file)
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let config_input = if Path::new(config_file).exists() {
        let contents = std::fs::read_to_string(config_file)
            .with_context(|| format!("failed to read {}", config_file))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", config_file))?
    } else {
        ConfigInput::default()
    };

    Ok((config_input, config_dir))
}

/// Initial configuration file written by `init`.
pub fn default_config_template(database_name: &str) -> String {
    format!(
        r#"# {config} - mongodbee configuration
database:
  uri: mongodb://localhost:27017
  name: {name}
  # options:
  #   connectTimeoutMS: 10000
  #   maxPoolSize: 10

paths:
  migrations: migrations
  schemas: schemas

migration:
  batchSize: 500
  operationTimeoutMS: 30000
  backup: true

# environments:
#   production:
#     database:
#       uri: mongodb://db.internal:27017
"#,
        config = CONFIG_FILENAME,
        name = database_name,
    )
}
