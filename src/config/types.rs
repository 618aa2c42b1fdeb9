use clap::Args;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw configuration input - all fields optional for merging.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigInput {
    pub database: Option<DatabaseInput>,
    pub paths: Option<PathsInput>,
    pub migration: Option<MigrationInput>,
    /// Presentation-only options; parsed but ignored by the core.
    pub cli: Option<serde_yaml::Value>,
    /// Per-environment overrides, deep-merged over the base config.
    pub environments: Option<BTreeMap<String, ConfigInput>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseInput {
    pub uri: Option<String>,
    pub name: Option<String>,
    pub options: Option<DatabaseOptionsInput>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseOptionsInput {
    #[serde(rename = "connectTimeoutMS")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(rename = "maxPoolSize")]
    pub max_pool_size: Option<u32>,
    #[serde(rename = "minPoolSize")]
    pub min_pool_size: Option<u32>,
    #[serde(rename = "maxIdleTimeMS")]
    pub max_idle_time_ms: Option<u64>,
    pub ssl: Option<bool>,
    #[serde(rename = "authSource")]
    pub auth_source: Option<String>,
    #[serde(rename = "readPreference")]
    pub read_preference: Option<String>,
    #[serde(rename = "writeConcern")]
    pub write_concern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PathsInput {
    pub migrations: Option<String>,
    pub schemas: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationInput {
    #[serde(rename = "batchSize")]
    pub batch_size: Option<usize>,
    #[serde(rename = "operationTimeoutMS")]
    pub operation_timeout_ms: Option<u64>,
    pub backup: Option<bool>,
    #[serde(rename = "dryRun")]
    pub dry_run: Option<bool>,
}

/// Resolved configuration with all defaults applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub paths: PathsConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub uri: String,
    pub name: String,
    pub options: DatabaseOptions,
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseOptions {
    pub connect_timeout_ms: Option<u64>,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
    pub max_idle_time_ms: Option<u64>,
    pub ssl: Option<bool>,
    pub auth_source: Option<String>,
    pub read_preference: Option<String>,
    pub write_concern: Option<String>,
}

impl DatabaseConfig {
    /// The connection URI with driver tunables folded in as standard URI
    /// options. Options already present in the URI are left alone.
    pub fn uri_with_options(&self) -> String {
        let mut params: Vec<(&str, String)> = Vec::new();
        let o = &self.options;

        if let Some(v) = o.connect_timeout_ms {
            params.push(("connectTimeoutMS", v.to_string()));
        }
        if let Some(v) = o.max_pool_size {
            params.push(("maxPoolSize", v.to_string()));
        }
        if let Some(v) = o.min_pool_size {
            params.push(("minPoolSize", v.to_string()));
        }
        if let Some(v) = o.max_idle_time_ms {
            params.push(("maxIdleTimeMS", v.to_string()));
        }
        if let Some(v) = o.ssl {
            params.push(("tls", v.to_string()));
        }
        if let Some(v) = &o.auth_source {
            params.push(("authSource", v.clone()));
        }
        if let Some(v) = &o.read_preference {
            params.push(("readPreference", v.clone()));
        }
        if let Some(v) = &o.write_concern {
            params.push(("w", v.clone()));
        }

        let mut uri = self.uri.clone();
        for (key, value) in params {
            let already_set = uri
                .to_ascii_lowercase()
                .contains(&format!("{}=", key.to_ascii_lowercase()));
            if already_set {
                continue;
            }
            let separator = if uri.contains('?') { '&' } else { '?' };
            uri.push(separator);
            uri.push_str(key);
            uri.push('=');
            uri.push_str(&value);
        }
        uri
    }
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub migrations: PathBuf,
    pub schemas: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub batch_size: usize,
    pub operation_timeout_ms: u64,
    /// Advisory flag: operators are expected to have a backup before
    /// destructive runs.
    pub backup: bool,
    pub dry_run: bool,
}

// CLI argument groups for command-specific options
#[derive(Debug, Clone, Default, Args)]
pub struct DatabaseArgs {
    #[arg(long, help = "MongoDB connection URI")]
    pub uri: Option<String>,

    #[arg(long = "db-name", help = "Target database name")]
    pub db_name: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct PathArgs {
    #[arg(long, help = "Migrations directory path")]
    pub migrations_dir: Option<String>,

    #[arg(long, help = "Schema files directory path")]
    pub schemas_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct MigrationArgs {
    #[arg(long, help = "Seed/transform batch size")]
    pub batch_size: Option<usize>,

    #[arg(long, help = "Plan and simulate without touching the database")]
    pub dry_run: bool,
}

// Conversion functions from CLI args to config input
impl From<DatabaseArgs> for DatabaseInput {
    fn from(args: DatabaseArgs) -> Self {
        Self {
            uri: args.uri,
            name: args.db_name,
            options: None, // driver options come from file or env only
        }
    }
}

impl From<PathArgs> for PathsInput {
    fn from(args: PathArgs) -> Self {
        Self {
            migrations: args.migrations_dir,
            schemas: args.schemas_dir,
        }
    }
}

impl From<MigrationArgs> for MigrationInput {
    fn from(args: MigrationArgs) -> Self {
        Self {
            batch_size: args.batch_size,
            operation_timeout_ms: None,
            backup: None,
            dry_run: args.dry_run.then_some(true),
        }
    }
}
