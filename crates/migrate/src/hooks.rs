//! Lifecycle hooks
//!
//! Pluggable extension points at each migration lifecycle transition. Hooks
//! are best-effort side channels (notifications, audit trails): a hook that
//! fails is logged and never aborts the governing migration, unless it
//! explicitly returns [`HookSignal::Abort`] and the registry was built with
//! `honor_aborts(true)`.
//!
//! The registry is an explicit instance constructed by and owned by the
//! service, so multiple independent engines can coexist in one process.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HookError;
use crate::types::Migration;

/// Lifecycle transition a hook fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeMigration,
    AfterMigration,
    BeforeRollback,
    AfterRollback,
    OnValidationError,
    OnMigrationStart,
    OnMigrationComplete,
    OnMigrationFail,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeMigration => "before_migration",
            HookEvent::AfterMigration => "after_migration",
            HookEvent::BeforeRollback => "before_rollback",
            HookEvent::AfterRollback => "after_rollback",
            HookEvent::OnValidationError => "on_validation_error",
            HookEvent::OnMigrationStart => "on_migration_start",
            HookEvent::OnMigrationComplete => "on_migration_complete",
            HookEvent::OnMigrationFail => "on_migration_fail",
        }
    }
}

/// What a hook asks the runner to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookSignal {
    Continue,
    /// Abort the governing migration. Honored only when the registry opted
    /// in via `honor_aborts(true)`.
    Abort(String),
}

/// Context passed to every hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub event: HookEvent,
    pub migration: Migration,
    /// 1-based execution attempt for retry-aware hooks.
    pub attempt: u32,
    /// Failure message, populated for fail events.
    pub error: Option<String>,
}

/// A lifecycle hook. Every method defaults to a no-op `Continue`, so
/// implementors override only the transitions they care about.
#[async_trait]
pub trait MigrationHook: Send + Sync {
    /// Name used when logging hook failures.
    fn name(&self) -> &str {
        "hook"
    }

    async fn before_migration(&self, _ctx: &HookContext) -> Result<HookSignal, HookError> {
        Ok(HookSignal::Continue)
    }

    async fn after_migration(&self, _ctx: &HookContext) -> Result<HookSignal, HookError> {
        Ok(HookSignal::Continue)
    }

    async fn before_rollback(&self, _ctx: &HookContext) -> Result<HookSignal, HookError> {
        Ok(HookSignal::Continue)
    }

    async fn after_rollback(&self, _ctx: &HookContext) -> Result<HookSignal, HookError> {
        Ok(HookSignal::Continue)
    }

    async fn on_validation_error(&self, _ctx: &HookContext) -> Result<HookSignal, HookError> {
        Ok(HookSignal::Continue)
    }

    async fn on_migration_start(&self, _ctx: &HookContext) -> Result<HookSignal, HookError> {
        Ok(HookSignal::Continue)
    }

    async fn on_migration_complete(&self, _ctx: &HookContext) -> Result<HookSignal, HookError> {
        Ok(HookSignal::Continue)
    }

    async fn on_migration_fail(&self, _ctx: &HookContext) -> Result<HookSignal, HookError> {
        Ok(HookSignal::Continue)
    }
}

/// Ordered collection of hooks, dispatched in registration order.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn MigrationHook>>,
    honor_aborts: bool,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opt in to honoring [`HookSignal::Abort`] from hooks. Off by default:
    /// hooks are observers, not gates.
    pub fn honor_aborts(mut self, honor: bool) -> Self {
        self.honor_aborts = honor;
        self
    }

    pub fn register(&mut self, hook: Arc<dyn MigrationHook>) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Invoke every hook for `event` in registration order. Hook errors are
    /// logged and swallowed; the first honored abort short-circuits.
    pub async fn dispatch(&self, ctx: &HookContext) -> HookSignal {
        for hook in &self.hooks {
            let result = match ctx.event {
                HookEvent::BeforeMigration => hook.before_migration(ctx).await,
                HookEvent::AfterMigration => hook.after_migration(ctx).await,
                HookEvent::BeforeRollback => hook.before_rollback(ctx).await,
                HookEvent::AfterRollback => hook.after_rollback(ctx).await,
                HookEvent::OnValidationError => hook.on_validation_error(ctx).await,
                HookEvent::OnMigrationStart => hook.on_migration_start(ctx).await,
                HookEvent::OnMigrationComplete => hook.on_migration_complete(ctx).await,
                HookEvent::OnMigrationFail => hook.on_migration_fail(ctx).await,
            };
            match result {
                Ok(HookSignal::Continue) => {}
                Ok(HookSignal::Abort(reason)) => {
                    if self.honor_aborts {
                        return HookSignal::Abort(reason);
                    }
                    tracing::warn!(
                        hook = hook.name(),
                        event = ctx.event.as_str(),
                        migration = %ctx.migration.version,
                        reason = %reason,
                        "hook abort ignored; registry does not honor aborts"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        hook = hook.name(),
                        event = ctx.event.as_str(),
                        migration = %ctx.migration.version,
                        error = %err,
                        "hook failed; continuing"
                    );
                }
            }
        }
        HookSignal::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    fn context(event: HookEvent) -> HookContext {
        HookContext {
            event,
            migration: Migration {
                version: "001".to_string(),
                name: "create_users".to_string(),
                description: None,
                up: "CREATE TABLE IF NOT EXISTS users(id TEXT)".to_string(),
                down: None,
                checksum: "0".repeat(16),
                dependencies: Vec::new(),
                created_at: Utc::now(),
            },
            attempt: 1,
            error: None,
        }
    }

    struct Recorder {
        seen: Mutex<Vec<String>>,
        label: String,
    }

    #[async_trait]
    impl MigrationHook for Recorder {
        fn name(&self) -> &str {
            &self.label
        }

        async fn on_migration_start(&self, ctx: &HookContext) -> Result<HookSignal, HookError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, ctx.migration.version));
            Ok(HookSignal::Continue)
        }
    }

    struct Failing;

    #[async_trait]
    impl MigrationHook for Failing {
        async fn on_migration_start(&self, ctx: &HookContext) -> Result<HookSignal, HookError> {
            Err(HookError {
                hook: "failing".to_string(),
                event: ctx.event.as_str().to_string(),
                message: "boom".to_string(),
            })
        }
    }

    struct Aborting;

    #[async_trait]
    impl MigrationHook for Aborting {
        async fn before_migration(&self, _ctx: &HookContext) -> Result<HookSignal, HookError> {
            Ok(HookSignal::Abort("policy says no".to_string()))
        }
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let first = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            label: "first".to_string(),
        });
        let second = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            label: "second".to_string(),
        });
        let mut registry = HookRegistry::new();
        registry.register(first.clone()).register(second.clone());

        let signal = registry.dispatch(&context(HookEvent::OnMigrationStart)).await;
        assert_eq!(signal, HookSignal::Continue);
        assert_eq!(first.seen.lock().unwrap().as_slice(), ["first:001"]);
        assert_eq!(second.seen.lock().unwrap().as_slice(), ["second:001"]);
    }

    #[tokio::test]
    async fn a_failing_hook_does_not_stop_later_hooks() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            label: "after".to_string(),
        });
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(Failing)).register(recorder.clone());

        let signal = registry.dispatch(&context(HookEvent::OnMigrationStart)).await;
        assert_eq!(signal, HookSignal::Continue);
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn aborts_require_opt_in() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(Aborting));
        let signal = registry.dispatch(&context(HookEvent::BeforeMigration)).await;
        assert_eq!(signal, HookSignal::Continue);

        let mut registry = HookRegistry::new().honor_aborts(true);
        registry.register(Arc::new(Aborting));
        let signal = registry.dispatch(&context(HookEvent::BeforeMigration)).await;
        assert_eq!(signal, HookSignal::Abort("policy says no".to_string()));
    }
}
