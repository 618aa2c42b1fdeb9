use crate::config::types::*;

/// Trait for merging optional configuration values: the right-hand side
/// wins wherever it is set.
pub trait Merge<T> {
    fn merge(self, other: T) -> T;
}

impl<T> Merge<Option<T>> for Option<T> {
    fn merge(self, other: Option<T>) -> Option<T> {
        other.or(self)
    }
}

impl Merge<ConfigInput> for ConfigInput {
    fn merge(self, other: ConfigInput) -> ConfigInput {
        ConfigInput {
            database: match (self.database, other.database) {
                (Some(a), Some(b)) => Some(a.merge_with(b)),
                (a, b) => b.or(a),
            },
            paths: match (self.paths, other.paths) {
                (Some(a), Some(b)) => Some(a.merge_with(b)),
                (a, b) => b.or(a),
            },
            migration: match (self.migration, other.migration) {
                (Some(a), Some(b)) => Some(a.merge_with(b)),
                (a, b) => b.or(a),
            },
            cli: other.cli.or(self.cli),
            // Overrides do not nest further environments.
            environments: other.environments.or(self.environments),
        }
    }
}

// Custom merge implementations for nested sections
impl DatabaseInput {
    pub fn merge_with(self, other: DatabaseInput) -> DatabaseInput {
        DatabaseInput {
            uri: other.uri.or(self.uri),
            name: other.name.or(self.name),
            options: match (self.options, other.options) {
                (Some(a), Some(b)) => Some(a.merge_with(b)),
                (a, b) => b.or(a),
            },
        }
    }
}

impl DatabaseOptionsInput {
    pub fn merge_with(self, other: DatabaseOptionsInput) -> DatabaseOptionsInput {
        DatabaseOptionsInput {
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            max_pool_size: other.max_pool_size.or(self.max_pool_size),
            min_pool_size: other.min_pool_size.or(self.min_pool_size),
            max_idle_time_ms: other.max_idle_time_ms.or(self.max_idle_time_ms),
            ssl: other.ssl.or(self.ssl),
            auth_source: other.auth_source.or(self.auth_source),
            read_preference: other.read_preference.or(self.read_preference),
            write_concern: other.write_concern.or(self.write_concern),
        }
    }
}

impl PathsInput {
    pub fn merge_with(self, other: PathsInput) -> PathsInput {
        PathsInput {
            migrations: other.migrations.or(self.migrations),
            schemas: other.schemas.or(self.schemas),
        }
    }
}

impl MigrationInput {
    pub fn merge_with(self, other: MigrationInput) -> MigrationInput {
        MigrationInput {
            batch_size: other.batch_size.or(self.batch_size),
            operation_timeout_ms: other.operation_timeout_ms.or(self.operation_timeout_ms),
            backup: other.backup.or(self.backup),
            dry_run: other.dry_run.or(self.dry_run),
        }
    }
}
