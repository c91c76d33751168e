//! Engine configuration
//!
//! A fully-typed configuration struct with defaults applied once at
//! construction and validated eagerly, so misconfiguration fails at startup
//! rather than at first use. Table names are allow-listed before they are
//! ever interpolated into SQL.

use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MigrateResult, MigrationError};
use crate::types::LogLevel;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// Configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory containing `NNN_name.sql` migration files.
    pub migrations_path: PathBuf,
    /// Version-history table name.
    pub table_name: String,
    /// Persisted log table name.
    pub log_table_name: String,
    /// Emit structured log lines for lifecycle events.
    pub enable_logging: bool,
    /// Minimum level captured by the monitor.
    pub log_level: LogLevel,
    /// Per-script execution timeout.
    pub timeout: Duration,
    /// Retry attempts after a failed or timed-out script.
    pub retries: u32,
    /// Compare loaded checksums against applied records.
    pub validate_checksums: bool,
    /// Allow rollback operations at all.
    pub enable_rollback: bool,
    /// Reject migrations that lack a down script at load time.
    pub require_rollback: bool,
    /// Continue past per-migration failures, collecting mixed results.
    pub enable_batch_mode: bool,
    /// Concurrency ceiling per target database. Schema changes are
    /// deliberately serialized; the only accepted value is 1.
    pub max_concurrent_migrations: usize,
    /// Spawn the periodic health-check task on initialize().
    pub enable_health_checks: bool,
    /// Interval between periodic health checks.
    pub health_check_interval: Duration,
    /// Mirror the in-memory log ring to the persisted log table.
    pub persist_logs: bool,
    /// Retention horizon for persisted log rows (logs only, never version
    /// history).
    pub log_retention: Duration,
    /// Capacity of the in-memory log ring buffer.
    pub log_buffer_size: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_path: PathBuf::from("migrations"),
            table_name: "__schema_migrations".to_string(),
            log_table_name: "__migration_logs".to_string(),
            enable_logging: true,
            log_level: LogLevel::Info,
            timeout: Duration::from_millis(30_000),
            retries: 3,
            validate_checksums: true,
            enable_rollback: true,
            require_rollback: false,
            enable_batch_mode: false,
            max_concurrent_migrations: 1,
            enable_health_checks: false,
            health_check_interval: Duration::from_secs(30),
            persist_logs: false,
            log_retention: Duration::from_secs(30 * 24 * 3600),
            log_buffer_size: 1000,
        }
    }
}

impl MigrationConfig {
    /// Validate the configuration, returning it unchanged on success.
    pub fn validated(self) -> MigrateResult<Self> {
        validate_identifier(&self.table_name)?;
        validate_identifier(&self.log_table_name)?;
        if self.table_name == self.log_table_name {
            return Err(MigrationError::Configuration(format!(
                "version table and log table must differ, both are '{}'",
                self.table_name
            )));
        }
        if self.timeout.is_zero() {
            return Err(MigrationError::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_migrations != 1 {
            return Err(MigrationError::Configuration(
                "max_concurrent_migrations must be 1; migrations run serialized".to_string(),
            ));
        }
        if self.enable_health_checks && self.health_check_interval < Duration::from_secs(1) {
            return Err(MigrationError::Configuration(
                "health_check_interval must be at least one second".to_string(),
            ));
        }
        if self.log_buffer_size == 0 {
            return Err(MigrationError::Configuration(
                "log_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

/// Allow-list a configured identifier before it is interpolated into SQL.
/// Parameter binding cannot cover table names, so this is the injection
/// barrier for configuration values.
pub fn validate_identifier(name: &str) -> MigrateResult<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(MigrationError::Configuration(format!(
            "'{}' is not a valid SQL identifier",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MigrationConfig::default().validated().unwrap();
        assert_eq!(config.table_name, "__schema_migrations");
        assert_eq!(config.retries, 3);
        assert_eq!(config.timeout, Duration::from_millis(30_000));
        assert_eq!(config.max_concurrent_migrations, 1);
    }

    #[test]
    fn hostile_table_names_are_rejected() {
        for name in [
            "migrations; DROP TABLE users--",
            "bad name",
            "",
            "tab\"le",
            "1starts_with_digit",
        ] {
            let config = MigrationConfig {
                table_name: name.to_string(),
                ..Default::default()
            };
            assert!(config.validated().is_err(), "accepted {name:?}");
        }
    }

    #[test]
    fn zero_timeout_and_non_serial_concurrency_fail_fast() {
        let config = MigrationConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validated().is_err());

        for concurrency in [0, 2, 8] {
            let config = MigrationConfig {
                max_concurrent_migrations: concurrency,
                ..Default::default()
            };
            assert!(config.validated().is_err(), "{concurrency}");
        }
    }
}
