use crate::config::{merge::Merge, types::*};
use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_OPERATION_TIMEOUT_MS};
use crate::error::MigrateError;
use std::path::PathBuf;

/// Layered resolution: file < environment override < `MONGODBEE_*`
/// variables < CLI arguments.
pub struct ConfigBuilder {
    file: ConfigInput,
    cli: ConfigInput,
    environment: Option<String>,
    read_env_vars: bool,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            file: ConfigInput::default(),
            cli: ConfigInput::default(),
            environment: None,
            read_env_vars: true,
        }
    }

    pub fn with_file(mut self, file_input: ConfigInput) -> Self {
        self.file = self.file.merge(file_input);
        self
    }

    pub fn with_cli_args(mut self, cli_input: ConfigInput) -> Self {
        self.cli = self.cli.merge(cli_input);
        self
    }

    /// Select a named environment override from the file's `environments`
    /// section. Defaults to `MONGODBEE_ENV` when unset.
    pub fn with_environment(mut self, name: Option<String>) -> Self {
        self.environment = name;
        self
    }

    /// Disable process-environment lookups; used by tests.
    pub fn without_env_vars(mut self) -> Self {
        self.read_env_vars = false;
        self
    }

    pub fn resolve(self) -> Result<Config, MigrateError> {
        let mut input = self.file.clone();

        let environment = self.environment.clone().or_else(|| {
            self.read_env_vars
                .then(|| std::env::var("MONGODBEE_ENV").ok())
                .flatten()
        });
        if let Some(name) = environment {
            let overrides = self
                .file
                .environments
                .as_ref()
                .and_then(|envs| envs.get(&name))
                .cloned()
                .ok_or_else(|| {
                    MigrateError::ConfigInvalid(format!(
                        "environment '{}' is not defined in the configuration",
                        name
                    ))
                })?;
            input = input.merge(overrides);
        }

        if self.read_env_vars {
            input = input.merge(env_var_input());
        }
        input = input.merge(self.cli);

        resolve_input(input)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Mirror of the config keys as `MONGODBEE_` environment variables.
fn env_var_input() -> ConfigInput {
    fn var(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    let database = {
        let uri = var("MONGODBEE_DB_URI");
        let name = var("MONGODBEE_DB_NAME");
        (uri.is_some() || name.is_some()).then(|| DatabaseInput {
            uri,
            name,
            options: None,
        })
    };

    let paths = {
        let migrations = var("MONGODBEE_MIGRATIONS_PATH");
        let schemas = var("MONGODBEE_SCHEMAS_PATH");
        (migrations.is_some() || schemas.is_some()).then(|| PathsInput {
            migrations,
            schemas,
        })
    };

    let migration = {
        let batch_size = var("MONGODBEE_BATCH_SIZE").and_then(|v| v.parse().ok());
        let operation_timeout_ms =
            var("MONGODBEE_OPERATION_TIMEOUT_MS").and_then(|v| v.parse().ok());
        let backup = var("MONGODBEE_BACKUP").and_then(|v| v.parse().ok());
        let dry_run = var("MONGODBEE_DRY_RUN").and_then(|v| v.parse().ok());
        (batch_size.is_some()
            || operation_timeout_ms.is_some()
            || backup.is_some()
            || dry_run.is_some())
        .then_some(MigrationInput {
            batch_size,
            operation_timeout_ms,
            backup,
            dry_run,
        })
    };

    ConfigInput {
        database,
        paths,
        migration,
        cli: None,
        environments: None,
    }
}

fn resolve_input(input: ConfigInput) -> Result<Config, MigrateError> {
    let missing = |key: &str| MigrateError::ConfigInvalid(format!("'{}' is required", key));

    let database_input = input.database.unwrap_or_default();
    let database = DatabaseConfig {
        uri: database_input.uri.ok_or_else(|| missing("database.uri"))?,
        name: database_input.name.ok_or_else(|| missing("database.name"))?,
        options: database_input
            .options
            .map(|o| DatabaseOptions {
                connect_timeout_ms: o.connect_timeout_ms,
                max_pool_size: o.max_pool_size,
                min_pool_size: o.min_pool_size,
                max_idle_time_ms: o.max_idle_time_ms,
                ssl: o.ssl,
                auth_source: o.auth_source,
                read_preference: o.read_preference,
                write_concern: o.write_concern,
            })
            .unwrap_or_default(),
    };

    let paths_input = input.paths.unwrap_or_default();
    let paths = PathsConfig {
        migrations: paths_input
            .migrations
            .map(PathBuf::from)
            .ok_or_else(|| missing("paths.migrations"))?,
        schemas: paths_input
            .schemas
            .map(PathBuf::from)
            .ok_or_else(|| missing("paths.schemas"))?,
    };

    let migration_input = input.migration.unwrap_or_default();
    let batch_size = migration_input.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    if batch_size == 0 {
        return Err(MigrateError::ConfigInvalid(
            "'migration.batchSize' must be at least 1".into(),
        ));
    }
    let migration = MigrationConfig {
        batch_size,
        operation_timeout_ms: migration_input
            .operation_timeout_ms
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS),
        backup: migration_input.backup.unwrap_or(true),
        dry_run: migration_input.dry_run.unwrap_or(false),
    };

    Ok(Config {
        database,
        paths,
        migration,
    })
}
