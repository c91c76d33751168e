//! Migration monitoring
//!
//! Structured observability over the runner's lifecycle events: a bounded
//! in-memory log ring (optionally mirrored to the persisted log table),
//! windowed statistics, and on-demand health diagnostics. The monitor only
//! reads engine state; it never blocks a running migration, and a storage
//! outage makes it report unhealthy instead of crashing the host.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::config::MigrationConfig;
use crate::error::{MigrateResult, MigrationError};
use crate::storage::MigrationStorage;
use crate::types::{
    LogAction, LogLevel, MigrationHealthCheck, MigrationLogEntry, MigrationStats, MigrationStatus,
};

/// Sliding window for stats and health checks.
const STATS_WINDOW: Duration = Duration::from_secs(7 * 24 * 3600);
/// Failure rate above this fraction flags the engine unhealthy.
const FAILURE_RATE_THRESHOLD: f64 = 0.10;
/// Average execution time above this flags slow migrations.
const SLOW_AVERAGE_MS: f64 = 30_000.0;
/// How many records to pull when aggregating the window.
const HISTORY_SCAN_LIMIT: usize = 1000;

/// Filter for log queries. Results are always newest-first.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub migration_id: Option<String>,
    pub action: Option<LogAction>,
    pub level: Option<LogLevel>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl LogFilter {
    fn matches(&self, entry: &MigrationLogEntry) -> bool {
        if let Some(id) = &self.migration_id {
            if &entry.migration_id != id {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(level) = self.level {
            if entry.level != level {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// Log export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

pub struct MigrationMonitor {
    ring: Mutex<VecDeque<MigrationLogEntry>>,
    capacity: usize,
    storage: Arc<MigrationStorage>,
    persist: bool,
    enable_logging: bool,
    min_level: LogLevel,
    loaded: AtomicBool,
}

impl MigrationMonitor {
    pub fn new(storage: Arc<MigrationStorage>, config: &MigrationConfig) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(config.log_buffer_size)),
            capacity: config.log_buffer_size,
            storage,
            persist: config.persist_logs,
            enable_logging: config.enable_logging,
            min_level: config.log_level,
            loaded: AtomicBool::new(false),
        }
    }

    /// Warm the ring from the persisted log table, once. Later calls are
    /// no-ops so `initialize()` stays idempotent.
    pub async fn load_persisted(&self) -> MigrateResult<()> {
        if !self.persist || self.loaded.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut logs = self.storage.load_logs(self.capacity).await?;
        logs.reverse(); // oldest first, so eviction order stays correct
        let mut ring = self.ring.lock().expect("log ring poisoned");
        ring.clear();
        for entry in logs {
            ring.push_back(entry);
        }
        Ok(())
    }

    /// Append a lifecycle event: ring buffer, persisted table (best-effort),
    /// and one formatted line on the process logging sink. Events below the
    /// configured level are dropped.
    pub async fn log_event(
        &self,
        migration_id: &str,
        action: LogAction,
        message: &str,
        details: Option<Value>,
        level: LogLevel,
    ) {
        if level < self.min_level {
            return;
        }
        let entry = MigrationLogEntry {
            id: Uuid::new_v4(),
            migration_id: migration_id.to_string(),
            action,
            timestamp: Utc::now(),
            message: message.to_string(),
            details,
            level,
        };

        if self.enable_logging {
            match level {
                LogLevel::Debug => tracing::debug!(
                    migration = %entry.migration_id,
                    action = action.as_str(),
                    "{message}"
                ),
                LogLevel::Info => tracing::info!(
                    migration = %entry.migration_id,
                    action = action.as_str(),
                    "{message}"
                ),
                LogLevel::Warn => tracing::warn!(
                    migration = %entry.migration_id,
                    action = action.as_str(),
                    "{message}"
                ),
                LogLevel::Error => tracing::error!(
                    migration = %entry.migration_id,
                    action = action.as_str(),
                    "{message}"
                ),
            }
        }

        {
            let mut ring = self.ring.lock().expect("log ring poisoned");
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(entry.clone());
        }

        if self.persist {
            // Log persistence is best-effort; a storage outage must not fail
            // the migration that emitted the event.
            if let Err(err) = self.storage.insert_log(&entry).await {
                tracing::warn!(error = %err, "failed to persist migration log entry");
            }
        }
    }

    /// Filtered logs, newest-first, paginated by offset/limit.
    pub fn get_logs(&self, filter: &LogFilter) -> Vec<MigrationLogEntry> {
        let ring = self.ring.lock().expect("log ring poisoned");
        // Reverse iteration keeps ties newest-first under the stable sort.
        let mut matched: Vec<MigrationLogEntry> = ring
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    pub fn get_migration_logs(&self, migration_id: &str, limit: usize) -> Vec<MigrationLogEntry> {
        self.get_logs(&LogFilter {
            migration_id: Some(migration_id.to_string()),
            limit: Some(limit),
            ..Default::default()
        })
    }

    pub fn get_recent_logs(&self, limit: usize) -> Vec<MigrationLogEntry> {
        self.get_logs(&LogFilter {
            limit: Some(limit),
            ..Default::default()
        })
    }

    pub fn get_error_logs(&self, limit: usize) -> Vec<MigrationLogEntry> {
        self.get_logs(&LogFilter {
            level: Some(LogLevel::Error),
            limit: Some(limit),
            ..Default::default()
        })
    }

    /// Remove matching entries from memory and, if persistence is enabled,
    /// from the log table.
    pub async fn clear_logs(&self, migration_id: Option<&str>) -> MigrateResult<()> {
        {
            let mut ring = self.ring.lock().expect("log ring poisoned");
            match migration_id {
                Some(id) => ring.retain(|e| e.migration_id != id),
                None => ring.clear(),
            }
        }
        if self.persist {
            self.storage.delete_logs(migration_id).await?;
        }
        Ok(())
    }

    /// Serialize the filtered log set to JSON or CSV.
    pub fn export_logs(&self, filter: &LogFilter, format: ExportFormat) -> MigrateResult<String> {
        let entries = self.get_logs(filter);
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&entries)?),
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                writer
                    .write_record([
                        "id",
                        "migration_id",
                        "action",
                        "timestamp",
                        "message",
                        "details",
                        "level",
                    ])
                    .map_err(|e| MigrationError::Export(e.to_string()))?;
                for entry in &entries {
                    writer
                        .write_record([
                            entry.id.to_string(),
                            entry.migration_id.clone(),
                            entry.action.as_str().to_string(),
                            entry.timestamp.to_rfc3339(),
                            entry.message.clone(),
                            entry
                                .details
                                .as_ref()
                                .map(|d| d.to_string())
                                .unwrap_or_default(),
                            entry.level.as_str().to_string(),
                        ])
                        .map_err(|e| MigrationError::Export(e.to_string()))?;
                }
                let bytes = writer
                    .into_inner()
                    .map_err(|e| MigrationError::Export(e.to_string()))?;
                String::from_utf8(bytes).map_err(|e| MigrationError::Export(e.to_string()))
            }
        }
    }

    /// Aggregate statistics over the trailing window (7 days).
    pub async fn get_stats(&self) -> MigrateResult<MigrationStats> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(STATS_WINDOW).unwrap_or(chrono::Duration::days(7));
        let records = self.storage.get_history(HISTORY_SCAN_LIMIT).await?;
        let windowed: Vec<_> = records
            .into_iter()
            .filter(|r| r.applied_at >= cutoff)
            .collect();

        let completed: Vec<_> = windowed
            .iter()
            .filter(|r| r.status == MigrationStatus::Completed)
            .collect();
        let failed = windowed
            .iter()
            .filter(|r| r.status == MigrationStatus::Failed)
            .count();
        let rolled_back = windowed
            .iter()
            .filter(|r| r.status == MigrationStatus::RolledBack)
            .count();
        let running = windowed
            .iter()
            .filter(|r| {
                r.status == MigrationStatus::Running || r.status == MigrationStatus::Pending
            })
            .count();

        let average_execution_ms = if completed.is_empty() {
            0.0
        } else {
            completed.iter().map(|r| r.execution_time_ms as f64).sum::<f64>()
                / completed.len() as f64
        };

        Ok(MigrationStats {
            total: windowed.len(),
            completed: completed.len(),
            failed,
            rolled_back,
            running,
            average_execution_ms,
            last_completed_at: completed.iter().map(|r| r.applied_at).max(),
            oldest_pending_at: windowed
                .iter()
                .filter(|r| {
                    r.status == MigrationStatus::Running || r.status == MigrationStatus::Pending
                })
                .map(|r| r.applied_at)
                .min(),
        })
    }

    /// Derive the health report. `pending_migrations` is the count of loaded
    /// definitions not yet applied, supplied by the service since only it
    /// sees the definition set.
    pub async fn health_check(&self, pending_migrations: usize) -> MigrationHealthCheck {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        let stats = match self.get_stats().await {
            Ok(stats) => Some(stats),
            Err(err) => {
                issues.push(format!("migration history is unreadable: {}", err));
                recommendations.push(
                    "Check database connectivity and the migration table schema".to_string(),
                );
                None
            }
        };

        if let Some(stats) = &stats {
            if stats.failed > 0 {
                issues.push(format!(
                    "{} migration(s) failed in the last 7 days",
                    stats.failed
                ));
                recommendations.push(
                    "Inspect the failed records, fix the root cause, and re-run".to_string(),
                );
            }

            let attempts = stats.completed + stats.failed;
            if attempts > 0 {
                let rate = stats.failed as f64 / attempts as f64;
                if rate > FAILURE_RATE_THRESHOLD {
                    issues.push(format!(
                        "failure rate {:.0}% exceeds {:.0}% over the monitoring window",
                        rate * 100.0,
                        FAILURE_RATE_THRESHOLD * 100.0
                    ));
                    recommendations.push(
                        "Review recent migration scripts for environment-specific assumptions"
                            .to_string(),
                    );
                }
            }

            if stats.average_execution_ms > SLOW_AVERAGE_MS {
                issues.push(format!(
                    "average execution time {:.0}ms exceeds {:.0}ms",
                    stats.average_execution_ms, SLOW_AVERAGE_MS
                ));
                recommendations.push(
                    "Split slow migrations into smaller steps or raise the timeout deliberately"
                        .to_string(),
                );
            }
        }

        for stuck in self.stuck_migrations() {
            issues.push(format!(
                "migration {} has a start log with no completion",
                stuck
            ));
            recommendations.push(format!(
                "Verify whether {} is still executing server-side before retrying",
                stuck
            ));
        }

        if let Err(err) = self.storage.ping().await {
            issues.push(format!("storage connectivity probe failed: {}", err));
            recommendations.push("Check the database connection settings".to_string());
        }

        let (failed, total, last) = stats
            .as_ref()
            .map(|s| (s.failed, s.total, s.last_completed_at))
            .unwrap_or((0, 0, None));

        MigrationHealthCheck {
            is_healthy: issues.is_empty(),
            last_migration_time: last,
            pending_migrations,
            failed_migrations: failed,
            total_migrations: total,
            issues,
            recommendations,
        }
    }

    /// Migrations with a `start` log not followed by a `complete`/`fail`/
    /// `rollback` log within the window.
    fn stuck_migrations(&self) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(STATS_WINDOW).unwrap_or(chrono::Duration::days(7));
        let ring = self.ring.lock().expect("log ring poisoned");
        let mut open: HashMap<String, bool> = HashMap::new();
        for entry in ring.iter() {
            if entry.timestamp < cutoff {
                continue;
            }
            match entry.action {
                LogAction::Start => {
                    open.insert(entry.migration_id.clone(), true);
                }
                LogAction::Complete | LogAction::Fail | LogAction::Rollback => {
                    open.insert(entry.migration_id.clone(), false);
                }
                LogAction::Validate => {}
            }
        }
        let mut stuck: Vec<String> = open
            .into_iter()
            .filter_map(|(id, is_open)| is_open.then_some(id))
            .collect();
        stuck.sort();
        stuck
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;
    use serde_json::json;

    fn monitor_with(config: MigrationConfig) -> (Arc<MemoryDatabase>, MigrationMonitor) {
        let db = Arc::new(MemoryDatabase::new());
        let storage = Arc::new(MigrationStorage::new(db.clone(), &config));
        (db.clone(), MigrationMonitor::new(storage, &config))
    }

    fn monitor() -> (Arc<MemoryDatabase>, MigrationMonitor) {
        monitor_with(MigrationConfig::default())
    }

    #[tokio::test]
    async fn ring_buffer_evicts_oldest_first() {
        let config = MigrationConfig {
            log_buffer_size: 3,
            ..Default::default()
        };
        let (_db, monitor) = monitor_with(config);
        for i in 0..5 {
            monitor
                .log_event(&format!("{:03}", i), LogAction::Start, "starting", None, LogLevel::Info)
                .await;
        }
        let logs = monitor.get_recent_logs(10);
        assert_eq!(logs.len(), 3);
        let ids: Vec<&str> = logs.iter().map(|l| l.migration_id.as_str()).collect();
        assert_eq!(ids, vec!["004", "003", "002"]);
    }

    #[tokio::test]
    async fn get_logs_filters_and_paginates_newest_first() {
        let (_db, monitor) = monitor();
        for i in 0..15 {
            let id = if i % 2 == 0 { "001" } else { "002" };
            monitor
                .log_event(id, LogAction::Start, &format!("event {i}"), None, LogLevel::Info)
                .await;
        }
        let logs = monitor.get_logs(&LogFilter {
            migration_id: Some("001".to_string()),
            limit: Some(10),
            ..Default::default()
        });
        assert!(logs.len() <= 10);
        assert!(logs.iter().all(|l| l.migration_id == "001"));
        assert!(logs.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[tokio::test]
    async fn events_below_threshold_are_dropped() {
        let config = MigrationConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        let (_db, monitor) = monitor_with(config);
        monitor
            .log_event("001", LogAction::Start, "quiet", None, LogLevel::Info)
            .await;
        monitor
            .log_event("001", LogAction::Fail, "loud", None, LogLevel::Error)
            .await;
        let logs = monitor.get_recent_logs(10);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "loud");
        assert_eq!(monitor.get_error_logs(10).len(), 1);
    }

    #[tokio::test]
    async fn stats_aggregate_the_window() {
        let (db, monitor) = monitor();
        let storage = MigrationStorage::new(db, &MigrationConfig::default());
        storage.record_start("001", "a", "x").await.unwrap();
        storage.record_complete("001", 100).await.unwrap();
        storage.record_start("002", "b", "y").await.unwrap();
        storage.record_complete("002", 300).await.unwrap();
        storage.record_start("003", "c", "z").await.unwrap();
        storage.record_failure("003", "boom").await.unwrap();

        let stats = monitor.get_stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.average_execution_ms - 200.0).abs() < f64::EPSILON);
        assert!(stats.last_completed_at.is_some());
    }

    #[tokio::test]
    async fn unhealthy_when_failure_rate_exceeds_threshold() {
        let (db, monitor) = monitor();
        let storage = MigrationStorage::new(db, &MigrationConfig::default());
        storage.record_start("001", "a", "x").await.unwrap();
        storage.record_complete("001", 10).await.unwrap();
        storage.record_start("002", "b", "y").await.unwrap();
        storage.record_failure("002", "boom").await.unwrap();

        let health = monitor.health_check(0).await;
        assert!(!health.is_healthy);
        assert!(!health.issues.is_empty());
        assert_eq!(health.issues.len(), health.recommendations.len());
        assert_eq!(health.failed_migrations, 1);
    }

    #[tokio::test]
    async fn stuck_migrations_are_flagged() {
        let (_db, monitor) = monitor();
        monitor
            .log_event("005", LogAction::Start, "starting", None, LogLevel::Info)
            .await;
        let health = monitor.health_check(0).await;
        assert!(!health.is_healthy);
        assert!(health.issues.iter().any(|i| i.contains("005")));

        monitor
            .log_event("005", LogAction::Complete, "done", None, LogLevel::Info)
            .await;
        let health = monitor.health_check(0).await;
        assert!(health.is_healthy);
    }

    #[tokio::test]
    async fn broken_storage_reports_unhealthy_not_panic() {
        let (db, monitor) = monitor();
        db.set_ping_ok(false);
        let health = monitor.health_check(2).await;
        assert!(!health.is_healthy);
        assert_eq!(health.pending_migrations, 2);
        assert!(health
            .issues
            .iter()
            .any(|i| i.contains("connectivity probe failed")));
    }

    #[tokio::test]
    async fn export_round_trips_json_and_escapes_csv() {
        let (_db, monitor) = monitor();
        monitor
            .log_event(
                "001",
                LogAction::Complete,
                "said \"done\", moved on",
                Some(json!({"rows": 3})),
                LogLevel::Info,
            )
            .await;

        let json_out = monitor
            .export_logs(&LogFilter::default(), ExportFormat::Json)
            .unwrap();
        let parsed: Vec<MigrationLogEntry> = serde_json::from_str(&json_out).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].migration_id, "001");

        let csv_out = monitor
            .export_logs(&LogFilter::default(), ExportFormat::Csv)
            .unwrap();
        assert!(csv_out.starts_with("id,migration_id,action"));
        // Embedded quotes are doubled per RFC 4180.
        assert!(csv_out.contains("\"said \"\"done\"\", moved on\""));
    }

    #[tokio::test]
    async fn clear_logs_scopes_to_migration_id() {
        let (_db, monitor) = monitor();
        monitor
            .log_event("001", LogAction::Start, "a", None, LogLevel::Info)
            .await;
        monitor
            .log_event("002", LogAction::Start, "b", None, LogLevel::Info)
            .await;
        monitor.clear_logs(Some("001")).await.unwrap();
        let logs = monitor.get_recent_logs(10);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].migration_id, "002");
        monitor.clear_logs(None).await.unwrap();
        assert!(monitor.get_recent_logs(10).is_empty());
    }

    #[tokio::test]
    async fn load_persisted_is_idempotent() {
        let config = MigrationConfig {
            persist_logs: true,
            ..Default::default()
        };
        let (_db, monitor) = monitor_with(config);
        monitor
            .log_event("001", LogAction::Start, "persisted", None, LogLevel::Info)
            .await;

        monitor.clear_logs(None).await.unwrap();
        // clear_logs wiped the table too, so reload from an entry we re-add.
        monitor
            .log_event("001", LogAction::Complete, "persisted again", None, LogLevel::Info)
            .await;

        monitor.load_persisted().await.unwrap();
        let count = monitor.get_recent_logs(100).len();
        monitor.load_persisted().await.unwrap();
        assert_eq!(monitor.get_recent_logs(100).len(), count);
    }
}
