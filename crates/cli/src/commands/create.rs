use stratum_migrate::MigrationSource;

/// Scaffold a new migration file. Needs no database connection.
pub async fn run(path: &str, name: &str) -> anyhow::Result<()> {
    let source = MigrationSource::new(path);
    let filename = source.create_migration(name).await?;
    println!("Created {}/{}", path, filename);
    println!("Edit the file and fill in the -- up (and optionally -- down) sections.");
    Ok(())
}
