use stratum_migrate::{ExportFormat, LogFilter, LogLevel, MigrationService};

use crate::ExportArg;

pub async fn run(
    service: &MigrationService,
    migration: Option<String>,
    errors_only: bool,
    limit: usize,
    export: Option<ExportArg>,
) -> anyhow::Result<()> {
    let filter = LogFilter {
        migration_id: migration,
        level: errors_only.then_some(LogLevel::Error),
        limit: Some(limit),
        ..LogFilter::default()
    };

    if let Some(format) = export {
        let format = match format {
            ExportArg::Json => ExportFormat::Json,
            ExportArg::Csv => ExportFormat::Csv,
        };
        let out = service.monitor().export_logs(&filter, format)?;
        println!("{out}");
        return Ok(());
    }

    let entries = service.get_logs(&filter);
    if entries.is_empty() {
        println!("No log entries match.");
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{} {:5} {:8} {:8} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.level.as_str(),
            entry.action.as_str(),
            entry.migration_id,
            entry.message
        );
    }
    Ok(())
}
