use stratum_migrate::{MigrationService, ValidateOptions};

pub async fn run(service: &MigrationService) -> anyhow::Result<()> {
    let status = service.get_migration_status().await?;
    if status.is_empty() {
        println!("No migrations found.");
        return Ok(());
    }

    println!("Migration status:");
    let mut pending = 0;
    for (migration, applied) in &status {
        let marker = if *applied { "applied" } else { "pending" };
        if !applied {
            pending += 1;
        }
        match &migration.description {
            Some(desc) => println!("  [{marker}] {} {} - {}", migration.version, migration.name, desc),
            None => println!("  [{marker}] {} {}", migration.version, migration.name),
        }
    }
    println!("{} total, {} pending.", status.len(), pending);
    Ok(())
}

pub async fn validate(service: &MigrationService, force: bool) -> anyhow::Result<()> {
    let plan = service.validate_migrations(ValidateOptions { force }).await?;

    for warning in &plan.warnings {
        println!("  warn  {warning}");
    }
    for error in &plan.errors {
        println!("  error {error}");
    }
    if !plan.is_executable() {
        anyhow::bail!("validation failed with {} error(s)", plan.errors.len());
    }
    if plan.migrations.is_empty() {
        println!("Valid; nothing pending.");
    } else {
        println!("Valid; {} migration(s) would run:", plan.migrations.len());
        for migration in &plan.migrations {
            println!("  {} {}", migration.version, migration.name);
        }
    }
    Ok(())
}

pub async fn health(service: &MigrationService) -> anyhow::Result<()> {
    let health = service.health_check().await;
    println!(
        "recorded: {}  pending: {}  failed: {}",
        health.total_migrations, health.pending_migrations, health.failed_migrations
    );
    if let Some(last) = health.last_migration_time {
        println!("last completed: {}", last.to_rfc3339());
    }
    if health.is_healthy {
        println!("Healthy.");
        return Ok(());
    }
    for (issue, recommendation) in health.issues.iter().zip(health.recommendations.iter()) {
        println!("  issue: {issue}");
        println!("         {recommendation}");
    }
    anyhow::bail!("{} issue(s) found", health.issues.len());
}
