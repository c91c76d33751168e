mod commands;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "stratum")]
#[command(version)]
#[command(about = "Versioned schema migrations: validate, apply, roll back, diagnose")]
struct Cli {
    /// Database connection string; falls back to the DATABASE_URL variable
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory holding the NNN_name.sql migration files
    #[arg(long, global = true, default_value = "migrations")]
    path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a templated migration file with the next free version
    Create {
        /// Migration name, slugified into the filename
        name: String,
    },

    /// Validate and apply every pending migration
    Run {
        /// Plan and report without touching the database
        #[arg(long)]
        dry_run: bool,

        /// Waive checksum-drift and unsafe-statement blocks
        #[arg(long)]
        force: bool,

        /// Keep applying after a failure instead of stopping
        #[arg(long)]
        keep_going: bool,
    },

    /// Roll back applied migrations using their down scripts
    Rollback {
        /// Roll back every version greater than this one
        #[arg(long, conflicts_with = "steps")]
        to: Option<String>,

        /// Roll back the last N applied versions (default 1)
        #[arg(long)]
        steps: Option<usize>,

        /// Skip versions without a down script instead of failing
        #[arg(long)]
        force: bool,
    },

    /// Show every known migration with its applied state
    Status,

    /// Build and print the plan without executing anything
    Validate {
        /// Downgrade blocking checks to warnings
        #[arg(long)]
        force: bool,
    },

    /// Run the health diagnostics against the recorded history
    Health,

    /// Show recent engine log entries
    Logs {
        /// Only entries for this migration version
        #[arg(long)]
        migration: Option<String>,

        /// Only error-level entries
        #[arg(long)]
        errors_only: bool,

        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Print the filtered entries as JSON or CSV instead of a table
        #[arg(long, value_enum)]
        export: Option<ExportArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportArg {
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Create { name } => commands::create::run(&cli.path, &name).await,
        Commands::Run {
            dry_run,
            force,
            keep_going,
        } => {
            let service = commands::connect(&cli).await?;
            commands::migrate::run(&service, dry_run, force, keep_going).await
        }
        Commands::Rollback { ref to, steps, force } => {
            let service = commands::connect(&cli).await?;
            commands::migrate::rollback(&service, to.clone(), steps, force).await
        }
        Commands::Status => {
            let service = commands::connect(&cli).await?;
            commands::status::run(&service).await
        }
        Commands::Validate { force } => {
            let service = commands::connect(&cli).await?;
            commands::status::validate(&service, force).await
        }
        Commands::Health => {
            let service = commands::connect(&cli).await?;
            commands::status::health(&service).await
        }
        Commands::Logs {
            ref migration,
            errors_only,
            limit,
            export,
        } => {
            let service = commands::connect(&cli).await?;
            commands::logs::run(&service, migration.clone(), errors_only, limit, export).await
        }
    }
}
