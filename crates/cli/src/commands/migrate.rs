use stratum_migrate::{MigrationResult, MigrationService, RollbackOptions, RunOptions};

pub async fn run(
    service: &MigrationService,
    dry_run: bool,
    force: bool,
    keep_going: bool,
) -> anyhow::Result<()> {
    let options = RunOptions {
        dry_run,
        force,
        // --keep-going overrides; otherwise the engine's batch-mode default.
        stop_on_first_error: keep_going.then_some(false),
        ..RunOptions::default()
    };
    let results = service.run_migrations(options).await?;

    if results.is_empty() {
        println!("Nothing to do; schema is up to date.");
        return Ok(());
    }
    let label = if dry_run { "Would apply" } else { "Applied" };
    report(&results, label)
}

pub async fn rollback(
    service: &MigrationService,
    to: Option<String>,
    steps: Option<usize>,
    force: bool,
) -> anyhow::Result<()> {
    let options = RollbackOptions {
        to,
        steps,
        force,
        ..RollbackOptions::default()
    };
    let results = service.rollback_migrations(options).await?;

    if results.is_empty() {
        println!("Nothing to roll back.");
        return Ok(());
    }
    report(&results, "Rolled back")
}

fn report(results: &[MigrationResult], label: &str) -> anyhow::Result<()> {
    let mut failures = 0;
    for result in results {
        if result.success {
            println!(
                "  ok    {} ({} ms)",
                result.version, result.execution_time_ms
            );
        } else {
            failures += 1;
            println!(
                "  FAIL  {}: {}",
                result.version,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    let succeeded = results.len() - failures;
    println!("{} {} migration(s), {} failed.", label, succeeded, failures);
    if failures > 0 {
        anyhow::bail!("{failures} migration(s) failed");
    }
    Ok(())
}
