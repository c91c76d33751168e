pub mod create;
pub mod logs;
pub mod migrate;
pub mod status;

use std::sync::Arc;

use anyhow::Context;
use stratum_migrate::{MigrationConfig, MigrationService, PostgresDatabase};

use crate::Cli;

/// Engine configuration for a one-shot CLI invocation: no periodic health
/// task, and logs persisted so `stratum logs` and the stuck-migration check
/// can see earlier runs after the process that emitted them has exited.
fn cli_config(path: &str) -> MigrationConfig {
    MigrationConfig {
        migrations_path: path.into(),
        enable_health_checks: false,
        persist_logs: true,
        ..Default::default()
    }
}

/// Build an initialized service from the global CLI options.
pub async fn connect(cli: &Cli) -> anyhow::Result<MigrationService> {
    let url = match &cli.database_url {
        Some(url) => url.clone(),
        None => std::env::var("DATABASE_URL")
            .context("no --database-url given and DATABASE_URL is not set")?,
    };
    let db = PostgresDatabase::connect(&url)
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to database: {e}"))?;
    let service = MigrationService::new(Arc::new(db), cli_config(&cli.path))?;
    service.initialize().await?;
    Ok(service)
}
