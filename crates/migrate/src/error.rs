//! Error types for the migration engine
//!
//! Three error families, matching how failures propagate: validation errors
//! block before anything executes, execution errors are per-migration and
//! gated by `stop_on_first_error`, storage errors are fatal to the current
//! call.

use thiserror::Error;

/// Result type alias for migration engine operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Top-level error type for the migration engine.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Plan construction failed; nothing was executed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A migration script failed while executing.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Version-history bookkeeping failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Invalid engine configuration, rejected at construction.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Migration file I/O failed.
    #[error("Migration file error: {0}")]
    Io(#[from] std::io::Error),

    /// Log serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Log export failed.
    #[error("Export error: {0}")]
    Export(String),
}

/// Blocking errors raised while building a migration plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Checksum mismatch for migration {version}: recorded {recorded}, computed {computed}")]
    ChecksumMismatch {
        version: String,
        recorded: String,
        computed: String,
    },

    #[error("Cyclic dependency involving migrations: {versions:?}")]
    CyclicDependency { versions: Vec<String> },

    #[error("Unsafe operation in migration {version}: {statement}")]
    UnsafeOperation { version: String, statement: String },

    #[error("Migration {version} depends on unknown or unapplied version {dependency}")]
    MissingDependency { version: String, dependency: String },

    #[error("Duplicate migration version {version}")]
    DuplicateVersion { version: String },

    #[error("Malformed migration version '{version}': expected three digits")]
    MalformedVersion { version: String },

    #[error("Migration {version} has no down script but require_rollback is set")]
    IrreversibleMigration { version: String },
}

impl ValidationError {
    /// The single version this error is about, when there is one. Cycles
    /// involve several versions and return `None`.
    pub fn version(&self) -> Option<&str> {
        match self {
            ValidationError::ChecksumMismatch { version, .. }
            | ValidationError::UnsafeOperation { version, .. }
            | ValidationError::MissingDependency { version, .. }
            | ValidationError::DuplicateVersion { version }
            | ValidationError::MalformedVersion { version }
            | ValidationError::IrreversibleMigration { version } => Some(version),
            ValidationError::CyclicDependency { .. } => None,
        }
    }
}

/// Per-migration execution failures.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("Migration {version} timed out after {timeout_ms}ms")]
    Timeout { version: String, timeout_ms: u64 },

    #[error("Migration {version} failed after {attempts} attempt(s): {message}")]
    Driver {
        version: String,
        attempts: u32,
        message: String,
    },

    #[error("Migration {version} has no down script and cannot be rolled back")]
    MissingDownScript { version: String },
}

/// Failures of the version-history store itself.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Storage connectivity failure: {0}")]
    Connectivity(String),

    #[error("Migration schema corruption: {0}")]
    SchemaCorruption(String),
}

/// Error returned by a lifecycle hook. Hooks are best-effort side channels,
/// so these are logged and never propagated to the governing migration.
#[derive(Debug, Clone, Error)]
#[error("Hook '{hook}' failed on {event}: {message}")]
pub struct HookError {
    pub hook: String,
    pub event: String,
    pub message: String,
}
