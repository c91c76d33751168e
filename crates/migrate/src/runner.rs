//! Migration runner
//!
//! Applies or rolls back migrations against the live database, in plan
//! order, honoring the timeout and retry policy. Execution is sequential:
//! the concurrency ceiling for schema changes is 1 per target, a deliberate
//! safety trade-off. Timeouts are at-least-once -- the timer winning the
//! race does not cancel the statement server-side, so scripts must be
//! written idempotently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::RwLock;

use crate::database::Database;
use crate::error::{ExecutionError, MigrateResult, MigrationError};
use crate::hooks::{HookContext, HookEvent, HookRegistry, HookSignal};
use crate::monitor::MigrationMonitor;
use crate::storage::MigrationStorage;
use crate::types::{
    version_ordinal, LogAction, LogLevel, Migration, MigrationPlan, MigrationResult,
};

/// Rough per-statement cost used for dry-run estimates.
const DRY_RUN_ESTIMATE_MS: i64 = 25;

/// Options for an apply batch.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Plan and report without touching the database.
    pub dry_run: bool,
    /// Waive checksum-drift and unsafe-operation blocks (validator-level).
    pub force: bool,
    /// Abort the batch on the first failure, or collect and continue.
    /// `None` defers to the engine's batch-mode configuration.
    pub stop_on_first_error: Option<bool>,
    /// Per-script timeout override.
    pub timeout: Option<Duration>,
    /// Retry-count override.
    pub retries: Option<u32>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            stop_on_first_error: None,
            timeout: None,
            retries: None,
        }
    }
}

/// Options for a rollback batch. `to` and `steps` are mutually exclusive;
/// `to` wins if both are set.
#[derive(Debug, Clone)]
pub struct RollbackOptions {
    /// Roll back every applied version greater than this one.
    pub to: Option<String>,
    /// Or: roll back the last N applied versions.
    pub steps: Option<usize>,
    /// Skip versions without a down script instead of failing.
    pub force: bool,
    /// `None` defers to the engine's batch-mode configuration.
    pub stop_on_first_error: Option<bool>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            to: None,
            steps: None,
            force: false,
            stop_on_first_error: None,
            timeout: None,
            retries: None,
        }
    }
}

pub struct MigrationRunner {
    db: Arc<dyn Database>,
    storage: Arc<MigrationStorage>,
    monitor: Arc<MigrationMonitor>,
    hooks: Arc<RwLock<HookRegistry>>,
    timeout: Duration,
    retries: u32,
    /// Default when an options struct leaves `stop_on_first_error` unset;
    /// batch-mode configurations flip this to false.
    stop_on_first_error: bool,
    enable_rollback: bool,
}

impl MigrationRunner {
    pub fn new(
        db: Arc<dyn Database>,
        storage: Arc<MigrationStorage>,
        monitor: Arc<MigrationMonitor>,
        hooks: Arc<RwLock<HookRegistry>>,
        timeout: Duration,
        retries: u32,
        stop_on_first_error: bool,
        enable_rollback: bool,
    ) -> Self {
        Self {
            db,
            storage,
            monitor,
            hooks,
            timeout,
            retries,
            stop_on_first_error,
            enable_rollback,
        }
    }

    /// Execute the pending migrations of a validated plan, in order. Always
    /// returns one result per attempted version, even on partial failure.
    pub async fn apply(
        &self,
        plan: &MigrationPlan,
        options: &RunOptions,
    ) -> MigrateResult<Vec<MigrationResult>> {
        if options.dry_run {
            return Ok(self.simulate(plan));
        }

        let timeout = options.timeout.unwrap_or(self.timeout);
        let retries = options.retries.unwrap_or(self.retries);
        let stop_on_first_error = options
            .stop_on_first_error
            .unwrap_or(self.stop_on_first_error);
        let mut results = Vec::with_capacity(plan.migrations.len());

        for migration in &plan.migrations {
            if let HookSignal::Abort(reason) = self
                .dispatch(HookEvent::BeforeMigration, migration, 1, None)
                .await
            {
                tracing::warn!(
                    migration = %migration.version,
                    reason = %reason,
                    "migration aborted by hook"
                );
                results.push(MigrationResult {
                    version: migration.version.clone(),
                    success: false,
                    execution_time_ms: 0,
                    error: Some(format!("aborted by hook: {}", reason)),
                });
                if stop_on_first_error {
                    break;
                }
                continue;
            }
            self.dispatch(HookEvent::OnMigrationStart, migration, 1, None)
                .await;

            self.storage
                .record_start(&migration.version, &migration.name, &migration.checksum)
                .await?;
            self.monitor
                .log_event(
                    &migration.version,
                    LogAction::Start,
                    &format!("applying {} - {}", migration.version, migration.name),
                    None,
                    LogLevel::Info,
                )
                .await;

            let started = Instant::now();
            let outcome = self
                .execute_script(&migration.version, &migration.up, timeout, retries)
                .await;
            let elapsed_ms = started.elapsed().as_millis() as i64;

            match outcome {
                Ok(()) => {
                    self.storage
                        .record_complete(&migration.version, elapsed_ms)
                        .await?;
                    self.dispatch(HookEvent::AfterMigration, migration, 1, None)
                        .await;
                    self.dispatch(HookEvent::OnMigrationComplete, migration, 1, None)
                        .await;
                    self.monitor
                        .log_event(
                            &migration.version,
                            LogAction::Complete,
                            &format!("applied {} in {}ms", migration.version, elapsed_ms),
                            Some(json!({ "execution_time_ms": elapsed_ms })),
                            LogLevel::Info,
                        )
                        .await;
                    results.push(MigrationResult {
                        version: migration.version.clone(),
                        success: true,
                        execution_time_ms: elapsed_ms,
                        error: None,
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    self.storage
                        .record_failure(&migration.version, &message)
                        .await?;
                    self.dispatch(HookEvent::OnMigrationFail, migration, 1, Some(&message))
                        .await;
                    self.monitor
                        .log_event(
                            &migration.version,
                            LogAction::Fail,
                            &message,
                            None,
                            LogLevel::Error,
                        )
                        .await;
                    results.push(MigrationResult {
                        version: migration.version.clone(),
                        success: false,
                        execution_time_ms: elapsed_ms,
                        error: Some(message),
                    });
                    if stop_on_first_error {
                        break;
                    }
                }
            }
        }
        Ok(results)
    }

    /// Roll back applied versions above a target (or the last N), newest
    /// first. A version without a down script fails with
    /// [`ExecutionError::MissingDownScript`] unless `force` skips it.
    pub async fn rollback(
        &self,
        definitions: &[Migration],
        applied: &[String],
        options: &RollbackOptions,
    ) -> MigrateResult<Vec<MigrationResult>> {
        if !self.enable_rollback {
            return Err(MigrationError::Configuration(
                "rollback is disabled by configuration".to_string(),
            ));
        }

        let timeout = options.timeout.unwrap_or(self.timeout);
        let retries = options.retries.unwrap_or(self.retries);
        let stop_on_first_error = options
            .stop_on_first_error
            .unwrap_or(self.stop_on_first_error);
        let targets = rollback_targets(applied, options);
        let mut results = Vec::with_capacity(targets.len());

        for version in &targets {
            let Some(migration) = definitions.iter().find(|m| &m.version == version) else {
                let err = ExecutionError::MissingDownScript {
                    version: version.clone(),
                };
                if options.force {
                    self.monitor
                        .log_event(
                            version,
                            LogAction::Rollback,
                            &format!("skipping {}: definition not found", version),
                            None,
                            LogLevel::Warn,
                        )
                        .await;
                    results.push(skipped(version));
                    continue;
                }
                results.push(failed(version, &err.to_string()));
                if stop_on_first_error {
                    break;
                }
                continue;
            };

            let Some(down) = migration.down.as_deref() else {
                let err = ExecutionError::MissingDownScript {
                    version: version.clone(),
                };
                if options.force {
                    // Skip log only: the stored record keeps its status.
                    self.monitor
                        .log_event(
                            version,
                            LogAction::Rollback,
                            &format!("skipping {}: no down script (forced)", version),
                            None,
                            LogLevel::Warn,
                        )
                        .await;
                    results.push(skipped(version));
                    continue;
                }
                self.monitor
                    .log_event(version, LogAction::Fail, &err.to_string(), None, LogLevel::Error)
                    .await;
                results.push(failed(version, &err.to_string()));
                if stop_on_first_error {
                    break;
                }
                continue;
            };

            if let HookSignal::Abort(reason) = self
                .dispatch(HookEvent::BeforeRollback, migration, 1, None)
                .await
            {
                results.push(failed(version, &format!("aborted by hook: {}", reason)));
                if stop_on_first_error {
                    break;
                }
                continue;
            }

            let started = Instant::now();
            let outcome = self
                .execute_script(version, down, timeout, retries)
                .await;
            let elapsed_ms = started.elapsed().as_millis() as i64;

            match outcome {
                Ok(()) => {
                    self.storage.record_rollback(version).await?;
                    self.dispatch(HookEvent::AfterRollback, migration, 1, None)
                        .await;
                    self.monitor
                        .log_event(
                            version,
                            LogAction::Rollback,
                            &format!("rolled back {} in {}ms", version, elapsed_ms),
                            None,
                            LogLevel::Info,
                        )
                        .await;
                    results.push(MigrationResult {
                        version: version.clone(),
                        success: true,
                        execution_time_ms: elapsed_ms,
                        error: None,
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    self.storage.record_failure(version, &message).await?;
                    self.dispatch(HookEvent::OnMigrationFail, migration, 1, Some(&message))
                        .await;
                    self.monitor
                        .log_event(version, LogAction::Fail, &message, None, LogLevel::Error)
                        .await;
                    results.push(MigrationResult {
                        version: version.clone(),
                        success: false,
                        execution_time_ms: elapsed_ms,
                        error: Some(message),
                    });
                    if stop_on_first_error {
                        break;
                    }
                }
            }
        }
        Ok(results)
    }

    /// Replay the plan without any database call, reporting estimated
    /// execution times.
    fn simulate(&self, plan: &MigrationPlan) -> Vec<MigrationResult> {
        plan.migrations
            .iter()
            .map(|migration| {
                let statements = migration
                    .up
                    .split(';')
                    .filter(|s| !s.trim().is_empty())
                    .count()
                    .max(1) as i64;
                MigrationResult {
                    version: migration.version.clone(),
                    success: true,
                    execution_time_ms: statements * DRY_RUN_ESTIMATE_MS,
                    error: None,
                }
            })
            .collect()
    }

    /// Run one script with the timeout/retry policy. The final failure after
    /// exhausting retries is surfaced, never swallowed. Retries are
    /// immediate; there is no backoff.
    async fn execute_script(
        &self,
        version: &str,
        script: &str,
        timeout: Duration,
        retries: u32,
    ) -> Result<(), ExecutionError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match tokio::time::timeout(timeout, self.db.execute(script, &[])).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(err)) => {
                    if attempt > retries {
                        return Err(ExecutionError::Driver {
                            version: version.to_string(),
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }
                    tracing::warn!(
                        migration = version,
                        attempt,
                        error = %err,
                        "migration script failed, retrying"
                    );
                }
                Err(_) => {
                    if attempt > retries {
                        return Err(ExecutionError::Timeout {
                            version: version.to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    tracing::warn!(
                        migration = version,
                        attempt,
                        timeout_ms = timeout.as_millis() as u64,
                        "migration script timed out, retrying"
                    );
                }
            }
        }
    }

    async fn dispatch(
        &self,
        event: HookEvent,
        migration: &Migration,
        attempt: u32,
        error: Option<&str>,
    ) -> HookSignal {
        let registry = self.hooks.read().await;
        if registry.is_empty() {
            return HookSignal::Continue;
        }
        let ctx = HookContext {
            event,
            migration: migration.clone(),
            attempt,
            error: error.map(|e| e.to_string()),
        };
        registry.dispatch(&ctx).await
    }
}

fn rollback_targets(applied: &[String], options: &RollbackOptions) -> Vec<String> {
    let mut sorted: Vec<String> = applied.to_vec();
    sorted.sort_by_key(|v| version_ordinal(v));
    sorted.reverse();
    match (&options.to, options.steps) {
        (Some(to), _) => {
            let floor = version_ordinal(to);
            sorted
                .into_iter()
                .filter(|v| version_ordinal(v) > floor)
                .collect()
        }
        (None, Some(steps)) => sorted.into_iter().take(steps).collect(),
        (None, None) => sorted.into_iter().take(1).collect(),
    }
}

fn failed(version: &str, message: &str) -> MigrationResult {
    MigrationResult {
        version: version.to_string(),
        success: false,
        execution_time_ms: 0,
        error: Some(message.to_string()),
    }
}

fn skipped(version: &str) -> MigrationResult {
    MigrationResult {
        version: version.to_string(),
        success: true,
        execution_time_ms: 0,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::migration_checksum;
    use crate::config::MigrationConfig;
    use crate::memory::MemoryDatabase;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;

    fn migration(version: &str, up: &str, down: Option<&str>) -> Migration {
        Migration {
            version: version.to_string(),
            name: format!("m{version}"),
            description: None,
            checksum: migration_checksum(up, down),
            up: up.to_string(),
            down: down.map(|d| d.to_string()),
            dependencies: Vec::new(),
            created_at: Utc::now(),
        }
    }

    struct Fixture {
        db: Arc<MemoryDatabase>,
        storage: Arc<MigrationStorage>,
        runner: MigrationRunner,
    }

    fn fixture() -> Fixture {
        fixture_with(HookRegistry::new())
    }

    fn fixture_with(hooks: HookRegistry) -> Fixture {
        let config = MigrationConfig::default();
        let db = Arc::new(MemoryDatabase::new());
        let storage = Arc::new(MigrationStorage::new(db.clone(), &config));
        let monitor = Arc::new(MigrationMonitor::new(storage.clone(), &config));
        let runner = MigrationRunner::new(
            db.clone(),
            storage.clone(),
            monitor,
            Arc::new(RwLock::new(hooks)),
            Duration::from_millis(200),
            3,
            true,
            true,
        );
        Fixture { db, storage, runner }
    }

    fn plan(migrations: Vec<Migration>) -> MigrationPlan {
        MigrationPlan {
            migrations,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn applies_pending_migrations_in_order() {
        let f = fixture();
        let plan = plan(vec![
            migration("001", "CREATE TABLE IF NOT EXISTS a(id TEXT)", None),
            migration("002", "CREATE TABLE IF NOT EXISTS b(id TEXT)", None),
        ]);
        let results = f.runner.apply(&plan, &RunOptions::default()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(
            f.storage.get_applied_versions().await.unwrap(),
            vec!["001", "002"]
        );

        let scripts: Vec<String> = f
            .db
            .executed_sql()
            .into_iter()
            .filter(|s| s.starts_with("CREATE TABLE IF NOT EXISTS"))
            .collect();
        assert_eq!(
            scripts,
            vec![
                "CREATE TABLE IF NOT EXISTS a(id TEXT)",
                "CREATE TABLE IF NOT EXISTS b(id TEXT)"
            ]
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let f = fixture();
        f.db.fail_matching("CREATE TABLE IF NOT EXISTS flaky", 2);
        let plan = plan(vec![migration(
            "001",
            "CREATE TABLE IF NOT EXISTS flaky(id TEXT)",
            None,
        )]);
        let results = f.runner.apply(&plan, &RunOptions::default()).await.unwrap();
        assert!(results[0].success);
        assert_eq!(f.storage.get_applied_versions().await.unwrap(), vec!["001"]);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_final_error() {
        let f = fixture();
        f.db.fail_matching("CREATE TABLE IF NOT EXISTS doomed", 10);
        let plan = plan(vec![
            migration("001", "CREATE TABLE IF NOT EXISTS doomed(id TEXT)", None),
            migration("002", "CREATE TABLE IF NOT EXISTS fine(id TEXT)", None),
        ]);
        let results = f.runner.apply(&plan, &RunOptions::default()).await.unwrap();

        // stop_on_first_error: partial results, second never attempted.
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        let error = results[0].error.as_deref().unwrap();
        assert!(error.contains("4 attempt(s)"), "{error}");

        let record = f.storage.get_record("001").await.unwrap().unwrap();
        assert_eq!(record.status, crate::types::MigrationStatus::Failed);
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn batch_mode_collects_mixed_results() {
        let f = fixture();
        f.db.fail_matching("CREATE TABLE IF NOT EXISTS doomed", 10);
        let plan = plan(vec![
            migration("001", "CREATE TABLE IF NOT EXISTS doomed(id TEXT)", None),
            migration("002", "CREATE TABLE IF NOT EXISTS fine(id TEXT)", None),
        ]);
        let options = RunOptions {
            stop_on_first_error: Some(false),
            ..Default::default()
        };
        let results = f.runner.apply(&plan, &options).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success);
        assert_eq!(f.storage.get_applied_versions().await.unwrap(), vec!["002"]);
    }

    #[tokio::test]
    async fn batch_default_applies_when_options_leave_it_unset() {
        let config = MigrationConfig::default();
        let db = Arc::new(MemoryDatabase::new());
        let storage = Arc::new(MigrationStorage::new(db.clone(), &config));
        let monitor = Arc::new(MigrationMonitor::new(storage.clone(), &config));
        let runner = MigrationRunner::new(
            db.clone(),
            storage.clone(),
            monitor,
            Arc::new(RwLock::new(HookRegistry::new())),
            Duration::from_millis(200),
            0,
            false, // batch-mode engine: keep going by default
            true,
        );

        db.fail_matching("CREATE TABLE IF NOT EXISTS doomed", 10);
        let plan = plan(vec![
            migration("001", "CREATE TABLE IF NOT EXISTS doomed(id TEXT)", None),
            migration("002", "CREATE TABLE IF NOT EXISTS fine(id TEXT)", None),
        ]);
        let results = runner.apply(&plan, &RunOptions::default()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success);

        // An explicit override still wins over the engine default.
        db.fail_matching("CREATE TABLE IF NOT EXISTS doomed", 10);
        let options = RunOptions {
            stop_on_first_error: Some(true),
            ..Default::default()
        };
        let results = runner.apply(&plan, &options).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn timeouts_count_as_failures() {
        struct SlowDb;

        #[async_trait]
        impl crate::database::Database for SlowDb {
            async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64, crate::database::DbError> {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(1)
            }
            async fn query(
                &self,
                _sql: &str,
                _params: &[Value],
            ) -> Result<Vec<crate::database::Row>, crate::database::DbError> {
                Ok(Vec::new())
            }
        }

        let config = MigrationConfig::default();
        let slow = Arc::new(SlowDb);
        let bookkeeping = Arc::new(MemoryDatabase::new());
        let storage = Arc::new(MigrationStorage::new(bookkeeping, &config));
        let monitor = Arc::new(MigrationMonitor::new(storage.clone(), &config));
        let runner = MigrationRunner::new(
            slow,
            storage,
            monitor,
            Arc::new(RwLock::new(HookRegistry::new())),
            Duration::from_millis(5),
            0,
            true,
            true,
        );

        let plan = plan(vec![migration("001", "SELECT pg_sleep(10)", None)]);
        let results = runner.apply(&plan, &RunOptions::default()).await.unwrap();
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn dry_run_never_touches_the_database() {
        let f = fixture();
        let plan = plan(vec![migration(
            "001",
            "CREATE TABLE IF NOT EXISTS a(id TEXT); CREATE INDEX i ON a(id)",
            None,
        )]);
        let options = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        let results = f.runner.apply(&plan, &options).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].execution_time_ms, 2 * DRY_RUN_ESTIMATE_MS);
        assert!(f.db.executed_sql().is_empty());
        assert!(f.storage.get_applied_versions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_runs_descending_to_the_target() {
        let f = fixture();
        let definitions = vec![
            migration("001", "CREATE TABLE IF NOT EXISTS a(id TEXT)", Some("DROP TABLE IF EXISTS a")),
            migration("002", "CREATE TABLE IF NOT EXISTS b(id TEXT)", Some("DROP TABLE IF EXISTS b")),
            migration("003", "CREATE TABLE IF NOT EXISTS c(id TEXT)", Some("DROP TABLE IF EXISTS c")),
        ];
        f.runner
            .apply(&plan(definitions.clone()), &RunOptions::default())
            .await
            .unwrap();

        let applied = f.storage.get_applied_versions().await.unwrap();
        let options = RollbackOptions {
            to: Some("001".to_string()),
            ..Default::default()
        };
        let results = f
            .runner
            .rollback(&definitions, &applied, &options)
            .await
            .unwrap();

        let order: Vec<&str> = results.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(order, vec!["003", "002"]);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(f.storage.get_applied_versions().await.unwrap(), vec!["001"]);

        let downs: Vec<String> = f
            .db
            .executed_sql()
            .into_iter()
            .filter(|s| s.starts_with("DROP TABLE"))
            .collect();
        assert_eq!(
            downs,
            vec!["DROP TABLE IF EXISTS c", "DROP TABLE IF EXISTS b"]
        );
    }

    #[tokio::test]
    async fn missing_down_script_fails_unless_forced() {
        let f = fixture();
        let definitions = vec![migration(
            "001",
            "CREATE TABLE IF NOT EXISTS users(id TEXT PRIMARY KEY)",
            None,
        )];
        f.runner
            .apply(&plan(definitions.clone()), &RunOptions::default())
            .await
            .unwrap();
        let applied = f.storage.get_applied_versions().await.unwrap();

        let options = RollbackOptions {
            to: Some("000".to_string()),
            ..Default::default()
        };
        let results = f
            .runner
            .rollback(&definitions, &applied, &options)
            .await
            .unwrap();
        assert!(!results[0].success);
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("no down script"));

        // Forced: skipped with a warning, stored record stays completed.
        let options = RollbackOptions {
            to: Some("000".to_string()),
            force: true,
            ..Default::default()
        };
        let results = f
            .runner
            .rollback(&definitions, &applied, &options)
            .await
            .unwrap();
        assert!(results[0].success);
        let record = f.storage.get_record("001").await.unwrap().unwrap();
        assert_eq!(record.status, crate::types::MigrationStatus::Completed);
    }

    #[tokio::test]
    async fn rollback_defaults_to_one_step() {
        let applied = vec!["001".to_string(), "002".to_string(), "003".to_string()];
        let targets = rollback_targets(&applied, &RollbackOptions::default());
        assert_eq!(targets, vec!["003"]);

        let targets = rollback_targets(
            &applied,
            &RollbackOptions {
                steps: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(targets, vec!["003", "002"]);
    }

    #[tokio::test]
    async fn rollback_can_be_disabled() {
        let config = MigrationConfig::default();
        let db = Arc::new(MemoryDatabase::new());
        let storage = Arc::new(MigrationStorage::new(db.clone(), &config));
        let monitor = Arc::new(MigrationMonitor::new(storage.clone(), &config));
        let runner = MigrationRunner::new(
            db,
            storage,
            monitor,
            Arc::new(RwLock::new(HookRegistry::new())),
            Duration::from_millis(200),
            0,
            true,
            false,
        );
        let err = runner
            .rollback(&[], &[], &RollbackOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
    }

    #[tokio::test]
    async fn honored_hook_abort_blocks_the_migration() {
        struct Gate;

        #[async_trait]
        impl crate::hooks::MigrationHook for Gate {
            async fn before_migration(
                &self,
                _ctx: &HookContext,
            ) -> Result<HookSignal, crate::error::HookError> {
                Ok(HookSignal::Abort("maintenance window closed".to_string()))
            }
        }

        let mut hooks = HookRegistry::new().honor_aborts(true);
        hooks.register(Arc::new(Gate));
        let f = fixture_with(hooks);

        let plan = plan(vec![migration(
            "001",
            "CREATE TABLE IF NOT EXISTS a(id TEXT)",
            None,
        )]);
        let results = f.runner.apply(&plan, &RunOptions::default()).await.unwrap();
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("aborted by hook"));
        assert!(f.db.executed_sql().is_empty());
        assert!(f.storage.get_record("001").await.unwrap().is_none());
    }
}
