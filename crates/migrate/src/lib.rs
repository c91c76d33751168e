//! Stratum: a versioned schema migration engine.
//!
//! Migrations are plain SQL files named `NNN_name.sql`. The engine validates
//! them (ordering, checksum drift, dependency cycles, destructive-statement
//! screening), applies them in dependency order with retry and timeout
//! handling, records every version in a bookkeeping table, and supports
//! rolling back via embedded down scripts.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stratum_migrate::{create_migration_system, MigrationConfig, PostgresDatabase, RunOptions};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Arc::new(PostgresDatabase::connect("postgres://localhost/app").await?);
//! let system = create_migration_system(db, MigrationConfig::default())?;
//! system.service.initialize().await?;
//! let results = system.service.run_migrations(RunOptions::default()).await?;
//! for result in results {
//!     println!("{}: {}", result.version, if result.success { "ok" } else { "failed" });
//! }
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod config;
pub mod database;
pub mod error;
pub mod hooks;
pub mod memory;
pub mod monitor;
pub mod runner;
pub mod service;
pub mod source;
pub mod storage;
pub mod types;
pub mod validator;

pub use checksum::migration_checksum;
pub use config::MigrationConfig;
pub use database::{Database, DbError, PostgresDatabase, Row};
pub use error::{
    ExecutionError, HookError, MigrateResult, MigrationError, StorageError, ValidationError,
};
pub use hooks::{HookContext, HookEvent, HookRegistry, HookSignal, MigrationHook};
pub use memory::MemoryDatabase;
pub use monitor::{ExportFormat, LogFilter, MigrationMonitor};
pub use runner::{MigrationRunner, RollbackOptions, RunOptions};
pub use service::{create_migration_system, MigrationService, MigrationSystem};
pub use source::{generate_filename, parse_version_from_filename, MigrationSource};
pub use storage::MigrationStorage;
pub use types::{
    LogAction, LogLevel, Migration, MigrationHealthCheck, MigrationLogEntry, MigrationPlan,
    MigrationRecord, MigrationResult, MigrationStats, MigrationStatus,
};
pub use validator::{MigrationValidator, ValidateOptions};
