use crate::config::merge::Merge;
use crate::config::types::*;
use crate::config::{ConfigBuilder, load_config};
use crate::error::MigrateError;
use std::collections::BTreeMap;

fn minimal_input() -> ConfigInput {
    ConfigInput {
        database: Some(DatabaseInput {
            uri: Some("mongodb://localhost:27017".into()),
            name: Some("app".into()),
            options: None,
        }),
        paths: Some(PathsInput {
            migrations: Some("migrations".into()),
            schemas: Some("schemas".into()),
        }),
        migration: None,
        cli: None,
        environments: None,
    }
}

#[test]
fn test_config_input_merge_cli_wins() {
    let file = minimal_input();
    let cli = ConfigInput {
        database: Some(DatabaseInput {
            uri: None,
            name: Some("other".into()),
            options: None,
        }),
        ..Default::default()
    };

    let merged = file.merge(cli);
    let database = merged.database.unwrap();
    assert_eq!(database.uri.as_deref(), Some("mongodb://localhost:27017"));
    assert_eq!(database.name.as_deref(), Some("other"));
}

#[test]
fn test_resolve_applies_defaults() {
    let config = ConfigBuilder::new()
        .without_env_vars()
        .with_file(minimal_input())
        .resolve()
        .unwrap();

    assert_eq!(config.migration.batch_size, 500);
    assert_eq!(config.migration.operation_timeout_ms, 30_000);
    assert!(config.migration.backup);
    assert!(!config.migration.dry_run);
    assert_eq!(config.paths.migrations.to_str().unwrap(), "migrations");
}

#[test]
fn test_resolve_requires_database_uri() {
    let mut input = minimal_input();
    input.database.as_mut().unwrap().uri = None;

    let err = ConfigBuilder::new()
        .without_env_vars()
        .with_file(input)
        .resolve()
        .unwrap_err();
    assert!(matches!(err, MigrateError::ConfigInvalid(_)));
    assert!(err.to_string().contains("database.uri"));
}

#[test]
fn test_environment_overrides_deep_merge() {
    let mut input = minimal_input();
    let mut environments = BTreeMap::new();
    environments.insert(
        "production".to_string(),
        ConfigInput {
            database: Some(DatabaseInput {
                uri: Some("mongodb://db.internal:27017".into()),
                name: None,
                options: None,
            }),
            ..Default::default()
        },
    );
    input.environments = Some(environments);

    let config = ConfigBuilder::new()
        .without_env_vars()
        .with_file(input.clone())
        .with_environment(Some("production".into()))
        .resolve()
        .unwrap();
    assert_eq!(config.database.uri, "mongodb://db.internal:27017");
    // name inherited from the base config
    assert_eq!(config.database.name, "app");

    let err = ConfigBuilder::new()
        .without_env_vars()
        .with_file(input)
        .with_environment(Some("staging".into()))
        .resolve()
        .unwrap_err();
    assert!(matches!(err, MigrateError::ConfigInvalid(_)));
}

#[test]
fn test_uri_with_options_appends_missing_params() {
    let config = DatabaseConfig {
        uri: "mongodb://localhost:27017/?maxPoolSize=5".into(),
        name: "app".into(),
        options: DatabaseOptions {
            connect_timeout_ms: Some(10_000),
            max_pool_size: Some(20),
            auth_source: Some("admin".into()),
            ..Default::default()
        },
    };

    let uri = config.uri_with_options();
    assert!(uri.contains("connectTimeoutMS=10000"));
    assert!(uri.contains("authSource=admin"));
    // existing value wins over the config option
    assert!(uri.contains("maxPoolSize=5"));
    assert!(!uri.contains("maxPoolSize=20"));
}

#[test]
fn test_cli_section_is_parsed_and_ignored() {
    let yaml = r#"
database:
  uri: mongodb://localhost:27017
  name: app
paths:
  migrations: migrations
  schemas: schemas
cli:
  color: always
  spinner: dots
"#;
    let input: ConfigInput = serde_yaml::from_str(yaml).unwrap();
    assert!(input.cli.is_some());

    ConfigBuilder::new()
        .without_env_vars()
        .with_file(input)
        .resolve()
        .unwrap();
}

#[test]
fn test_zero_batch_size_rejected() {
    let mut input = minimal_input();
    input.migration = Some(MigrationInput {
        batch_size: Some(0),
        operation_timeout_ms: None,
        backup: None,
        dry_run: None,
    });

    let err = ConfigBuilder::new()
        .without_env_vars()
        .with_file(input)
        .resolve()
        .unwrap_err();
    assert!(err.to_string().contains("batchSize"));
}

#[test]
fn test_load_config_missing_file_is_empty() {
    let (input, _root) = load_config("does-not-exist.yaml").unwrap();
    assert!(input.database.is_none());
}
