pub mod check;
pub mod generate;
pub mod init;
pub mod migrate;
pub mod rollback;
pub mod status;

pub use check::cmd_check;
pub use generate::cmd_generate;
pub use init::cmd_init;
pub use migrate::{cmd_force_unlock, cmd_migrate};
pub use rollback::cmd_rollback;
pub use status::cmd_status;

use crate::chain::Chain;
use crate::config::Config;
use crate::driver::MongoDriver;
use anyhow::{Context, Result};

/// Owner token recorded in the lock document.
pub(crate) fn lock_owner() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
    format!("{}:{}", host, std::process::id())
}

pub(crate) async fn connect(config: &Config) -> Result<MongoDriver> {
    MongoDriver::connect(&config.database)
        .await
        .with_context(|| {
            format!(
                "failed to connect to database '{}'",
                config.database.name
            )
        })
}

pub(crate) fn load_chain(config: &Config) -> Result<Chain> {
    Chain::load(&config.paths.migrations).with_context(|| {
        format!(
            "failed to load migration chain from {}",
            config.paths.migrations.display()
        )
    })
}
