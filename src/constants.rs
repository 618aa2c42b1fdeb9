use std::time::Duration;

// Reserved collection and document names
pub const LEDGER_COLLECTION: &str = "__mongodbee_migrations";
pub const LOCK_COLLECTION: &str = "__mongodbee_locks";
pub const LOCK_DOCUMENT_ID: &str = "singleton";
pub const INFORMATION_DOCUMENT_ID: &str = "_information";

// Lock management
pub const LOCK_STALE_TIMEOUT: Duration = Duration::from_secs(600);

// Executor defaults
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;

// Configuration file name
pub const CONFIG_FILENAME: &str = "mongodbee.yaml";

// Environment variable prefix mirroring config keys
pub const ENV_PREFIX: &str = "MONGODBEE_";

// Migration artifact extension
pub const MIGRATION_FILE_EXTENSION: &str = "yaml";
