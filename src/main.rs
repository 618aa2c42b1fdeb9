use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use mongodbee::commands;
use mongodbee::config;
use mongodbee::constants::CONFIG_FILENAME;
use mongodbee::error::MigrateError;
use mongodbee::executor::CancelFlag;
use std::collections::BTreeMap;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value = CONFIG_FILENAME, global = true)]
    config_file: String,

    /// Select an environment override from the configuration
    #[arg(long, global = true)]
    env: Option<String>,

    /// Enable verbose output (info level)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress all non-essential output (error level only)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Enable debug output (debug level)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a mongodbee project in the current directory
    Init {
        /// Database name written into the generated config
        #[arg(default_value = "app")]
        database_name: String,
    },

    /// Generate a new migration file from a template
    Generate {
        /// Human-readable migration name
        name: String,

        /// Template to render
        #[arg(long, default_value = "empty")]
        template: String,

        /// Template variables as key=value pairs
        #[arg(long = "var", value_parser = parse_key_val)]
        variables: Vec<(String, String)>,

        /// Description recorded in the file header
        #[arg(long)]
        description: Option<String>,

        #[command(flatten)]
        path_args: config::PathArgs,
    },

    /// Show applied, pending and dirty migrations
    Status {
        /// Machine-readable output
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        database_args: config::DatabaseArgs,

        #[command(flatten)]
        path_args: config::PathArgs,
    },

    /// Validate the chain and dry-run pending migrations
    Check {
        #[command(flatten)]
        database_args: config::DatabaseArgs,

        #[command(flatten)]
        path_args: config::PathArgs,
    },

    /// Apply pending migrations
    Migrate {
        /// Target migration id (defaults to the chain head)
        target: Option<String>,

        #[command(flatten)]
        database_args: config::DatabaseArgs,

        #[command(flatten)]
        path_args: config::PathArgs,

        #[command(flatten)]
        migration_args: config::MigrationArgs,
    },

    /// Roll back applied migrations
    Rollback {
        /// How many migrations to roll back
        #[arg(default_value = "1")]
        steps: usize,

        /// Roll back only the dirty migration left by a failed run
        #[arg(long)]
        repair: bool,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,

        #[command(flatten)]
        database_args: config::DatabaseArgs,

        #[command(flatten)]
        path_args: config::PathArgs,

        #[command(flatten)]
        migration_args: config::MigrationArgs,
    },

    /// Remove a stale migration lock
    ForceUnlock {
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,

        #[command(flatten)]
        database_args: config::DatabaseArgs,
    },
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("'{}' is not a key=value pair", raw))
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();
    initialize_logging(&cli);

    let cancel = CancelFlag::new();
    spawn_signal_listener(cancel.clone());

    match run_main(cli, cancel).await {
        Ok(()) => {}
        Err(err) => {
            eprintln!("error: {:#}", err);
            std::process::exit(exit_code_for(&err));
        }
    }
}

/// Map an error to the documented exit codes: 1 validation, 2 runtime,
/// 3 lock contention, 4 divergent ledger.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<MigrateError>())
        .map(MigrateError::exit_code)
        .unwrap_or(2)
}

fn spawn_signal_listener(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt; finishing the in-flight batch");
            cancel.cancel();
        }
        // A second interrupt aborts immediately.
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

fn initialize_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn" // default level
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    fmt().with_env_filter(filter).with_target(false).init();
}

async fn run_main(cli: Cli, cancel: CancelFlag) -> Result<()> {
    match &cli.command {
        Commands::Init { database_name } => {
            commands::cmd_init(std::path::Path::new("."), database_name).await
        }
        _ => {
            let (file_config, _root_dir) = config::load_config(&cli.config_file)?;

            match cli.command {
                Commands::Init { .. } => unreachable!(),
                Commands::Generate {
                    name,
                    template,
                    variables,
                    description,
                    path_args,
                } => {
                    let cli_config = config::ConfigInput {
                        database: None,
                        paths: Some(path_args.into()),
                        migration: None,
                        cli: None,
                        environments: None,
                    };
                    let resolved = resolve(file_config, cli_config, cli.env.clone())?;

                    info!("Generating migration '{}'", name);
                    let variables: BTreeMap<String, String> = variables.into_iter().collect();
                    commands::cmd_generate(&resolved, &name, &template, variables, description)
                        .await
                }
                Commands::Status {
                    json,
                    database_args,
                    path_args,
                } => {
                    let cli_config = config::ConfigInput {
                        database: Some(database_args.into()),
                        paths: Some(path_args.into()),
                        migration: None,
                        cli: None,
                        environments: None,
                    };
                    let resolved = resolve(file_config, cli_config, cli.env.clone())?;

                    info!("Checking migration status");
                    commands::cmd_status(&resolved, json).await
                }
                Commands::Check {
                    database_args,
                    path_args,
                } => {
                    let cli_config = config::ConfigInput {
                        database: Some(database_args.into()),
                        paths: Some(path_args.into()),
                        migration: None,
                        cli: None,
                        environments: None,
                    };
                    let resolved = resolve(file_config, cli_config, cli.env.clone())?;

                    info!("Validating chain against the shadow database");
                    commands::cmd_check(&resolved).await
                }
                Commands::Migrate {
                    target,
                    database_args,
                    path_args,
                    migration_args,
                } => {
                    let cli_config = config::ConfigInput {
                        database: Some(database_args.into()),
                        paths: Some(path_args.into()),
                        migration: Some(migration_args.into()),
                        cli: None,
                        environments: None,
                    };
                    let resolved = resolve(file_config, cli_config, cli.env.clone())?;

                    info!("Applying pending migrations");
                    commands::cmd_migrate(&resolved, target, cancel).await
                }
                Commands::Rollback {
                    steps,
                    repair,
                    yes,
                    database_args,
                    path_args,
                    migration_args,
                } => {
                    let cli_config = config::ConfigInput {
                        database: Some(database_args.into()),
                        paths: Some(path_args.into()),
                        migration: Some(migration_args.into()),
                        cli: None,
                        environments: None,
                    };
                    let resolved = resolve(file_config, cli_config, cli.env.clone())?;

                    info!("Rolling back {} migration(s)", steps);
                    commands::cmd_rollback(&resolved, steps, repair, yes, cancel).await
                }
                Commands::ForceUnlock { yes, database_args } => {
                    let cli_config = config::ConfigInput {
                        database: Some(database_args.into()),
                        paths: None,
                        migration: None,
                        cli: None,
                        environments: None,
                    };
                    let resolved = resolve(file_config, cli_config, cli.env.clone())?;

                    commands::cmd_force_unlock(&resolved, yes).await
                }
            }
        }
    }
}

fn resolve(
    file_config: config::ConfigInput,
    cli_config: config::ConfigInput,
    environment: Option<String>,
) -> Result<config::Config> {
    Ok(config::ConfigBuilder::new()
        .with_file(file_config)
        .with_environment(environment)
        .with_cli_args(cli_config)
        .resolve()?)
}
