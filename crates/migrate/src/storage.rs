//! Version-history storage
//!
//! Durable bookkeeping for migration records and persisted logs, backed by
//! the external relational store through the [`Database`] handle. All writes
//! are upserts keyed by version so retries after partial failure are safe.
//! Any write failure is a [`StorageError`] and is fatal to the enclosing
//! operation.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::config::MigrationConfig;
use crate::database::{row_i64, row_str, Database, Row};
use crate::error::{MigrateResult, StorageError};
use crate::types::{LogAction, LogLevel, MigrationLogEntry, MigrationRecord, MigrationStatus};

pub struct MigrationStorage {
    db: Arc<dyn Database>,
    table: String,
    log_table: String,
}

impl MigrationStorage {
    /// Table names come from a validated [`MigrationConfig`], which is the
    /// allow-list barrier for the interpolation below.
    pub fn new(db: Arc<dyn Database>, config: &MigrationConfig) -> Self {
        Self {
            db,
            table: config.table_name.clone(),
            log_table: config.log_table_name.clone(),
        }
    }

    /// Idempotent bootstrap of the version table, the log table, and the log
    /// indexes. Safe to call any number of times.
    pub async fn ensure_schema(&self) -> MigrateResult<()> {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n    \
                    version TEXT PRIMARY KEY,\n    \
                    name TEXT NOT NULL,\n    \
                    checksum TEXT NOT NULL,\n    \
                    applied_at BIGINT NOT NULL,\n    \
                    status TEXT NOT NULL,\n    \
                    execution_time_ms BIGINT NOT NULL DEFAULT 0,\n    \
                    error TEXT\n\
                )",
                self.table
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n    \
                    id TEXT PRIMARY KEY,\n    \
                    migration_id TEXT NOT NULL,\n    \
                    action TEXT NOT NULL,\n    \
                    timestamp BIGINT NOT NULL,\n    \
                    message TEXT NOT NULL,\n    \
                    details TEXT,\n    \
                    level TEXT NOT NULL\n\
                )",
                self.log_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_migration_id ON {t} (migration_id)",
                t = self.log_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_timestamp ON {t} (timestamp)",
                t = self.log_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_action ON {t} (action)",
                t = self.log_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_level ON {t} (level)",
                t = self.log_table
            ),
        ];
        for sql in &statements {
            self.write(sql, &[]).await?;
        }
        Ok(())
    }

    /// Record the first (or retried) execution attempt for a version.
    pub async fn record_start(
        &self,
        version: &str,
        name: &str,
        checksum: &str,
    ) -> MigrateResult<()> {
        let sql = format!(
            "INSERT INTO {} (version, name, checksum, applied_at, status, execution_time_ms, error) \
             VALUES ($1, $2, $3, $4, 'running', 0, NULL) \
             ON CONFLICT (version) DO UPDATE SET \
                name = EXCLUDED.name, \
                checksum = EXCLUDED.checksum, \
                applied_at = EXCLUDED.applied_at, \
                status = 'running', \
                error = NULL",
            self.table
        );
        self.write(
            &sql,
            &[
                json!(version),
                json!(name),
                json!(checksum),
                json!(Utc::now().timestamp_millis()),
            ],
        )
        .await
    }

    pub async fn record_complete(&self, version: &str, execution_time_ms: i64) -> MigrateResult<()> {
        let sql = format!(
            "UPDATE {} SET status = 'completed', execution_time_ms = $2, error = NULL \
             WHERE version = $1",
            self.table
        );
        self.write(&sql, &[json!(version), json!(execution_time_ms)])
            .await
    }

    pub async fn record_failure(&self, version: &str, error: &str) -> MigrateResult<()> {
        let sql = format!(
            "UPDATE {} SET status = 'failed', error = $2 WHERE version = $1",
            self.table
        );
        self.write(&sql, &[json!(version), json!(error)]).await
    }

    pub async fn record_rollback(&self, version: &str) -> MigrateResult<()> {
        let sql = format!(
            "UPDATE {} SET status = 'rolled_back' WHERE version = $1",
            self.table
        );
        self.write(&sql, &[json!(version)]).await
    }

    /// Versions with a completed record, ascending.
    pub async fn get_applied_versions(&self) -> MigrateResult<Vec<String>> {
        let sql = format!(
            "SELECT version FROM {} WHERE status = 'completed' ORDER BY version ASC",
            self.table
        );
        let rows = self.read(&sql, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row_str(row, "version"))
            .collect())
    }

    pub async fn get_latest_version(&self) -> MigrateResult<Option<String>> {
        let sql = format!(
            "SELECT version FROM {} WHERE status = 'completed' ORDER BY version DESC LIMIT 1",
            self.table
        );
        let rows = self.read(&sql, &[]).await?;
        Ok(rows.first().and_then(|row| row_str(row, "version")))
    }

    /// Full record for one version, if it was ever attempted.
    pub async fn get_record(&self, version: &str) -> MigrateResult<Option<MigrationRecord>> {
        let sql = format!(
            "SELECT version, name, checksum, applied_at, status, execution_time_ms, error \
             FROM {} WHERE version = $1",
            self.table
        );
        let rows = self.read(&sql, &[json!(version)]).await?;
        rows.first().map(Self::record_from_row).transpose()
    }

    /// Most recent records first.
    pub async fn get_history(&self, limit: usize) -> MigrateResult<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT version, name, checksum, applied_at, status, execution_time_ms, error \
             FROM {} ORDER BY applied_at DESC, version DESC LIMIT $1",
            self.table
        );
        let rows = self.read(&sql, &[json!(limit as i64)]).await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    /// Trivial connectivity probe used by the health monitor.
    pub async fn ping(&self) -> MigrateResult<()> {
        self.read("SELECT 1", &[]).await.map(|_| ())
    }

    pub async fn insert_log(&self, entry: &MigrationLogEntry) -> MigrateResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, migration_id, action, timestamp, message, details, level) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
            self.log_table
        );
        let details = entry
            .details
            .as_ref()
            .map(|d| json!(d.to_string()))
            .unwrap_or(Value::Null);
        self.write(
            &sql,
            &[
                json!(entry.id.to_string()),
                json!(entry.migration_id),
                json!(entry.action.as_str()),
                json!(entry.timestamp.timestamp_millis()),
                json!(entry.message),
                details,
                json!(entry.level.as_str()),
            ],
        )
        .await
    }

    /// Newest persisted log entries, up to `limit`.
    pub async fn load_logs(&self, limit: usize) -> MigrateResult<Vec<MigrationLogEntry>> {
        let sql = format!(
            "SELECT id, migration_id, action, timestamp, message, details, level \
             FROM {} ORDER BY timestamp DESC LIMIT $1",
            self.log_table
        );
        let rows = self.read(&sql, &[json!(limit as i64)]).await?;
        Ok(rows.iter().filter_map(Self::log_from_row).collect())
    }

    /// Delete persisted logs, optionally scoped to one migration.
    pub async fn delete_logs(&self, migration_id: Option<&str>) -> MigrateResult<()> {
        match migration_id {
            Some(id) => {
                let sql = format!("DELETE FROM {} WHERE migration_id = $1", self.log_table);
                self.write(&sql, &[json!(id)]).await
            }
            None => {
                let sql = format!("DELETE FROM {}", self.log_table);
                self.write(&sql, &[]).await
            }
        }
    }

    /// Retention cleanup: drop persisted log rows older than `cutoff`. Never
    /// touches version-history rows.
    pub async fn cleanup_logs_before(&self, cutoff: DateTime<Utc>) -> MigrateResult<()> {
        let sql = format!("DELETE FROM {} WHERE timestamp < $1", self.log_table);
        self.write(&sql, &[json!(cutoff.timestamp_millis())]).await
    }

    async fn write(&self, sql: &str, params: &[Value]) -> MigrateResult<()> {
        self.db
            .execute(sql, params)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::Connectivity(e.to_string()).into())
    }

    async fn read(&self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>> {
        self.db
            .query(sql, params)
            .await
            .map_err(|e| StorageError::Connectivity(e.to_string()).into())
    }

    fn record_from_row(row: &Row) -> MigrateResult<MigrationRecord> {
        let version = row_str(row, "version")
            .ok_or_else(|| StorageError::SchemaCorruption("record missing version".to_string()))?;
        let status_text = row_str(row, "status").unwrap_or_default();
        let status = MigrationStatus::parse(&status_text).ok_or_else(|| {
            StorageError::SchemaCorruption(format!(
                "record {} has unknown status '{}'",
                version, status_text
            ))
        })?;
        let applied_at = Utc
            .timestamp_millis_opt(row_i64(row, "applied_at").unwrap_or(0))
            .single()
            .unwrap_or_else(Utc::now);
        Ok(MigrationRecord {
            name: row_str(row, "name").unwrap_or_default(),
            checksum: row_str(row, "checksum").unwrap_or_default(),
            status,
            applied_at,
            execution_time_ms: row_i64(row, "execution_time_ms").unwrap_or(0),
            error: row_str(row, "error"),
            version,
        })
    }

    fn log_from_row(row: &Row) -> Option<MigrationLogEntry> {
        let id = row_str(row, "id")?.parse().ok()?;
        let action = LogAction::parse(&row_str(row, "action")?)?;
        let level = LogLevel::parse(&row_str(row, "level")?)?;
        let timestamp = Utc
            .timestamp_millis_opt(row_i64(row, "timestamp")?)
            .single()?;
        let details = row_str(row, "details").and_then(|d| serde_json::from_str(&d).ok());
        Some(MigrationLogEntry {
            id,
            migration_id: row_str(row, "migration_id")?,
            action,
            timestamp,
            message: row_str(row, "message").unwrap_or_default(),
            details,
            level,
        })
    }
}
