//! Core types for the migration engine
//!
//! Defines the fundamental structures used throughout the system: migration
//! definitions, persisted records, execution plans and results, log entries,
//! and derived stats/health reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// A versioned schema migration definition, typically loaded from a
/// `NNN_name.sql` file. Immutable once loaded; the checksum is recomputed on
/// every load and compared against the recorded value to detect drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    /// Three-digit numeric version string, e.g. `"001"`.
    pub version: String,
    /// Human-readable name.
    pub name: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Forward schema-change script, opaque SQL text.
    pub up: String,
    /// Reverse script; absent means the migration cannot be rolled back.
    pub down: Option<String>,
    /// Drift-detection checksum of up + down.
    pub checksum: String,
    /// Versions that must be applied before this one.
    pub dependencies: Vec<String>,
    /// When the definition was created.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a migration version in the history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Running => "running",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MigrationStatus::Pending),
            "running" => Some(MigrationStatus::Running),
            "completed" => Some(MigrationStatus::Completed),
            "failed" => Some(MigrationStatus::Failed),
            "rolled_back" => Some(MigrationStatus::RolledBack),
            _ => None,
        }
    }
}

/// One persisted row per version ever attempted. Upserted by version so
/// retries after partial failure are safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub version: String,
    pub name: String,
    pub checksum: String,
    pub status: MigrationStatus,
    pub applied_at: DateTime<Utc>,
    pub execution_time_ms: i64,
    pub error: Option<String>,
}

/// The validator's output: an ordered batch of pending migrations plus any
/// blocking errors and non-blocking warnings. Built fresh for every
/// run/rollback/validate call.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    /// Pending migrations in execution order.
    pub migrations: Vec<Migration>,
    /// Blocking errors; a non-empty list aborts before the runner starts.
    pub errors: Vec<ValidationError>,
    /// Non-blocking observations (e.g. unsafe statements waived by `force`).
    pub warnings: Vec<String>,
}

impl MigrationPlan {
    pub fn is_executable(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Per-migration outcome of an apply or rollback batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    pub version: String,
    pub success: bool,
    pub execution_time_ms: i64,
    pub error: Option<String>,
}

/// Lifecycle action recorded in the migration log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Start,
    Complete,
    Fail,
    Rollback,
    Validate,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Start => "start",
            LogAction::Complete => "complete",
            LogAction::Fail => "fail",
            LogAction::Rollback => "rollback",
            LogAction::Validate => "validate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(LogAction::Start),
            "complete" => Some(LogAction::Complete),
            "fail" => Some(LogAction::Fail),
            "rollback" => Some(LogAction::Rollback),
            "validate" => Some(LogAction::Validate),
            _ => None,
        }
    }
}

/// Severity of a log entry. Ordered so threshold filtering can compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// One append-only entry in the migration log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationLogEntry {
    pub id: Uuid,
    pub migration_id: String,
    pub action: LogAction,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub level: LogLevel,
}

/// Aggregate statistics over a sliding window of migration records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub running: usize,
    pub average_execution_ms: f64,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

/// Derived health report; computed on demand, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationHealthCheck {
    pub is_healthy: bool,
    pub last_migration_time: Option<DateTime<Utc>>,
    pub pending_migrations: usize,
    pub failed_migrations: usize,
    pub total_migrations: usize,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Sort migrations ascending by numeric version. Version strings are
/// zero-padded to three digits so lexicographic order matches numeric order,
/// but parse defensively in case a malformed version slipped past validation.
pub fn sort_migrations_by_version(migrations: &mut [Migration]) {
    migrations.sort_by_key(|m| version_ordinal(&m.version));
}

/// Numeric ordinal of a version string; malformed versions sort last.
pub fn version_ordinal(version: &str) -> u32 {
    version.parse::<u32>().unwrap_or(u32::MAX)
}
