use thiserror::Error;

/// Engine error taxonomy. Every failure the core can surface to the
/// operator is one of these variants; command-level plumbing wraps them in
/// `anyhow::Error` and `main` maps them back to process exit codes.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("migration '{id}' was modified after being recorded (checksum {recorded} != {computed})")]
    ChainTampered {
        id: String,
        recorded: String,
        computed: String,
    },

    #[error("migration '{id}' references unknown parent '{parent}'")]
    ParentMissing { id: String, parent: String },

    #[error("multiple root migrations found ('{first}' and '{second}'); exactly one must have no parent")]
    RootAmbiguous { first: String, second: String },

    #[error("no root migration found; exactly one migration must have no parent")]
    RootMissing,

    #[error("migration chain is not a single linear sequence: {0}")]
    ChainMalformed(String),

    #[error("schema change at '{path}' in migration '{id}' is not covered by any operation")]
    SchemaDriftUncovered { id: String, path: String },

    #[error("seed document {position} for '{target}' failed validation: {issues}")]
    SeedInvalid {
        target: String,
        position: usize,
        issues: String,
    },

    #[error("transform result for {id} in '{collection}' violates the target schema: {issues}")]
    TransformInvalid {
        collection: String,
        id: String,
        issues: String,
    },

    #[error("ledger has a dirty entry for '{id}'; a previous run did not finish")]
    LedgerBusy { id: String },

    #[error("ledger contains migrations unknown to the chain: {ids:?}")]
    LedgerDivergent { ids: Vec<String> },

    #[error("migration lock is held by '{owner}' since {acquired_at} (use force-unlock if it is stale)")]
    LockBusy { owner: String, acquired_at: String },

    #[error("migration '{id}' is irreversible and cannot be rolled back")]
    IrreversibleRollback { id: String },

    #[error("database driver error: {0}")]
    Driver(#[source] anyhow::Error),

    #[error("operation cancelled; in-flight migration marked dirty")]
    Cancelled,
}

impl MigrateError {
    /// Process exit code for this error. 0 is reserved for success.
    pub fn exit_code(&self) -> i32 {
        match self {
            MigrateError::ConfigInvalid(_)
            | MigrateError::ChainTampered { .. }
            | MigrateError::ParentMissing { .. }
            | MigrateError::RootAmbiguous { .. }
            | MigrateError::RootMissing
            | MigrateError::ChainMalformed(_)
            | MigrateError::SchemaDriftUncovered { .. }
            | MigrateError::SeedInvalid { .. }
            | MigrateError::IrreversibleRollback { .. } => 1,
            MigrateError::TransformInvalid { .. }
            | MigrateError::LedgerBusy { .. }
            | MigrateError::Driver(_)
            | MigrateError::Cancelled => 2,
            MigrateError::LockBusy { .. } => 3,
            MigrateError::LedgerDivergent { .. } => 4,
        }
    }

    pub fn driver(err: impl Into<anyhow::Error>) -> Self {
        MigrateError::Driver(err.into())
    }
}

impl From<mongodb::error::Error> for MigrateError {
    fn from(err: mongodb::error::Error) -> Self {
        MigrateError::Driver(err.into())
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::RootMissing.exit_code(), 1);
        assert_eq!(
            MigrateError::SeedInvalid {
                target: "user".into(),
                position: 0,
                issues: "bad".into()
            }
            .exit_code(),
            1
        );
        assert_eq!(MigrateError::Cancelled.exit_code(), 2);
        assert_eq!(
            MigrateError::LockBusy {
                owner: "x".into(),
                acquired_at: "now".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(
            MigrateError::LedgerDivergent { ids: vec![] }.exit_code(),
            4
        );
    }
}
