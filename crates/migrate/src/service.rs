//! Service facade
//!
//! Composes storage, validator, runner, monitor, and hooks behind a single
//! orchestrator used by external callers (deployment scripts, the CLI).
//! `initialize()` is idempotent; the optional periodic health check runs
//! independently of migration execution and only reads state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::MigrationConfig;
use crate::database::Database;
use crate::error::{MigrateResult, MigrationError};
use crate::hooks::{HookContext, HookEvent, HookRegistry};
use crate::monitor::{LogFilter, MigrationMonitor};
use crate::runner::{MigrationRunner, RollbackOptions, RunOptions};
use crate::source::MigrationSource;
use crate::storage::MigrationStorage;
use crate::types::{
    LogAction, LogLevel, Migration, MigrationHealthCheck, MigrationLogEntry, MigrationPlan,
    MigrationRecord, MigrationResult, MigrationStats,
};
use crate::validator::{MigrationValidator, ValidateOptions};

pub struct MigrationService {
    config: MigrationConfig,
    source: Arc<MigrationSource>,
    storage: Arc<MigrationStorage>,
    validator: Arc<MigrationValidator>,
    runner: Arc<MigrationRunner>,
    monitor: Arc<MigrationMonitor>,
    hooks: Arc<RwLock<HookRegistry>>,
    initialized: AtomicBool,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl MigrationService {
    pub fn new(db: Arc<dyn Database>, config: MigrationConfig) -> MigrateResult<Self> {
        let config = config.validated()?;
        let source = Arc::new(MigrationSource::new(config.migrations_path.clone()));
        let storage = Arc::new(MigrationStorage::new(db.clone(), &config));
        let validator = Arc::new(MigrationValidator::new(&config));
        let monitor = Arc::new(MigrationMonitor::new(storage.clone(), &config));
        let hooks = Arc::new(RwLock::new(HookRegistry::new()));
        let runner = Arc::new(MigrationRunner::new(
            db,
            storage.clone(),
            monitor.clone(),
            hooks.clone(),
            config.timeout,
            config.retries,
            !config.enable_batch_mode,
            config.enable_rollback,
        ));
        Ok(Self {
            config,
            source,
            storage,
            validator,
            runner,
            monitor,
            hooks,
            initialized: AtomicBool::new(false),
            health_task: Mutex::new(None),
        })
    }

    pub fn storage(&self) -> Arc<MigrationStorage> {
        self.storage.clone()
    }

    pub fn validator(&self) -> Arc<MigrationValidator> {
        self.validator.clone()
    }

    pub fn runner(&self) -> Arc<MigrationRunner> {
        self.runner.clone()
    }

    pub fn monitor(&self) -> Arc<MigrationMonitor> {
        self.monitor.clone()
    }

    pub fn source(&self) -> Arc<MigrationSource> {
        self.source.clone()
    }

    /// Bootstrap the engine: create the bookkeeping tables, warm the log
    /// cache, and start the periodic health check if configured. Safe to
    /// call any number of times.
    pub async fn initialize(&self) -> MigrateResult<()> {
        self.storage.ensure_schema().await?;
        self.monitor.load_persisted().await?;
        self.initialized.store(true, Ordering::SeqCst);

        if self.config.enable_health_checks {
            let mut slot = self.health_task.lock().expect("health task slot poisoned");
            if slot.is_none() {
                *slot = Some(self.spawn_health_task());
            }
        }
        Ok(())
    }

    fn spawn_health_task(&self) -> JoinHandle<()> {
        let monitor = self.monitor.clone();
        let source = self.source.clone();
        let storage = self.storage.clone();
        let interval = self.config.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let pending = pending_count(&source, &storage).await;
                let health = monitor.health_check(pending).await;
                if health.is_healthy {
                    tracing::debug!(
                        pending = health.pending_migrations,
                        "periodic migration health check passed"
                    );
                } else {
                    tracing::warn!(
                        issues = ?health.issues,
                        "periodic migration health check failed"
                    );
                }
            }
        })
    }

    async fn ensure_initialized(&self) -> MigrateResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.initialize().await
    }

    async fn load_state(&self) -> MigrateResult<(Vec<Migration>, HashMap<String, MigrationRecord>)> {
        let definitions = self.source.load().await?;
        let records = self
            .storage
            .get_history(10_000)
            .await?
            .into_iter()
            .map(|r| (r.version.clone(), r))
            .collect();
        Ok((definitions, records))
    }

    /// Validate, plan, and apply every pending migration.
    pub async fn run_migrations(
        &self,
        options: RunOptions,
    ) -> MigrateResult<Vec<MigrationResult>> {
        self.ensure_initialized().await?;
        let (definitions, records) = self.load_state().await?;
        let plan = self.validator.build_plan(
            &definitions,
            &records,
            ValidateOptions {
                force: options.force,
            },
        );
        self.report_plan(&plan, &definitions).await;
        if let Some(first) = plan.errors.first() {
            return Err(MigrationError::Validation(first.clone()));
        }
        self.runner.apply(&plan, &options).await
    }

    /// Roll back applied migrations above a target version or by step count.
    pub async fn rollback_migrations(
        &self,
        options: RollbackOptions,
    ) -> MigrateResult<Vec<MigrationResult>> {
        self.ensure_initialized().await?;
        let definitions = self.source.load().await?;
        let applied = self.storage.get_applied_versions().await?;
        self.runner.rollback(&definitions, &applied, &options).await
    }

    /// Build and return the plan without executing anything. Blocking errors
    /// are returned inside the plan for inspection rather than as `Err`.
    pub async fn validate_migrations(&self, options: ValidateOptions) -> MigrateResult<MigrationPlan> {
        self.ensure_initialized().await?;
        let (definitions, records) = self.load_state().await?;
        let plan = self.validator.build_plan(&definitions, &records, options);
        self.report_plan(&plan, &definitions).await;
        Ok(plan)
    }

    async fn report_plan(&self, plan: &MigrationPlan, definitions: &[Migration]) {
        for warning in &plan.warnings {
            self.monitor
                .log_event("validator", LogAction::Validate, warning, None, LogLevel::Warn)
                .await;
        }
        for error in &plan.errors {
            let message = error.to_string();
            self.monitor
                .log_event("validator", LogAction::Validate, &message, None, LogLevel::Error)
                .await;
            // Validation failures are surfaced to hooks with the offending
            // definition, matched on the error's structured version field.
            let registry = self.hooks.read().await;
            if registry.is_empty() {
                continue;
            }
            let offender = error
                .version()
                .and_then(|v| definitions.iter().find(|m| m.version == v));
            if let Some(migration) = offender {
                let ctx = HookContext {
                    event: HookEvent::OnValidationError,
                    migration: migration.clone(),
                    attempt: 1,
                    error: Some(message.clone()),
                };
                registry.dispatch(&ctx).await;
            }
        }
    }

    pub async fn health_check(&self) -> MigrationHealthCheck {
        let pending = pending_count(&self.source, &self.storage).await;
        self.monitor.health_check(pending).await
    }

    pub async fn get_stats(&self) -> MigrateResult<MigrationStats> {
        self.monitor.get_stats().await
    }

    pub fn get_logs(&self, filter: &LogFilter) -> Vec<MigrationLogEntry> {
        self.monitor.get_logs(filter)
    }

    pub async fn get_history(&self, limit: usize) -> MigrateResult<Vec<MigrationRecord>> {
        self.storage.get_history(limit).await
    }

    /// Replace the hook registry wholesale.
    pub async fn set_hooks(&self, registry: HookRegistry) {
        *self.hooks.write().await = registry;
    }

    /// Create a templated migration file with the next free version.
    pub async fn create_migration(&self, name: &str) -> MigrateResult<String> {
        self.source.create_migration(name).await
    }

    /// Every known definition with its applied flag, ascending by version.
    pub async fn get_migration_status(&self) -> MigrateResult<Vec<(Migration, bool)>> {
        self.ensure_initialized().await?;
        let definitions = self.source.load().await?;
        let applied: std::collections::HashSet<String> = self
            .storage
            .get_applied_versions()
            .await?
            .into_iter()
            .collect();
        Ok(definitions
            .into_iter()
            .map(|m| {
                let is_applied = applied.contains(&m.version);
                (m, is_applied)
            })
            .collect())
    }

    /// Stop the periodic health check and prune persisted logs past the
    /// retention horizon. Version-history rows are never pruned.
    pub async fn cleanup(&self) -> MigrateResult<()> {
        if let Some(task) = self
            .health_task
            .lock()
            .expect("health task slot poisoned")
            .take()
        {
            task.abort();
        }
        if self.config.persist_logs {
            let cutoff = Utc::now()
                - chrono::Duration::from_std(self.config.log_retention)
                    .unwrap_or(chrono::Duration::days(30));
            self.storage.cleanup_logs_before(cutoff).await?;
        }
        Ok(())
    }
}

async fn pending_count(source: &MigrationSource, storage: &MigrationStorage) -> usize {
    let definitions = match source.load().await {
        Ok(definitions) => definitions,
        Err(err) => {
            tracing::warn!(error = %err, "failed to load migration definitions");
            return 0;
        }
    };
    let applied = match storage.get_applied_versions().await {
        Ok(applied) => applied,
        Err(_) => return definitions.len(),
    };
    definitions
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .count()
}

/// Everything the factory hands back: the composed service plus direct
/// handles to each component.
pub struct MigrationSystem {
    pub service: Arc<MigrationService>,
    pub runner: Arc<MigrationRunner>,
    pub validator: Arc<MigrationValidator>,
    pub monitor: Arc<MigrationMonitor>,
    pub storage: Arc<MigrationStorage>,
}

/// Compose a migration engine over `db` with the given configuration.
pub fn create_migration_system(
    db: Arc<dyn Database>,
    config: MigrationConfig,
) -> MigrateResult<MigrationSystem> {
    let service = Arc::new(MigrationService::new(db, config)?);
    Ok(MigrationSystem {
        runner: service.runner(),
        validator: service.validator(),
        monitor: service.monitor(),
        storage: service.storage(),
        service,
    })
}
