mod aggregate;
mod import;
mod mapping;

use std::path::PathBuf;

use adrecon_core::EntityKind;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::aggregate::AggregateCommands;
use crate::mapping::{AbbreviationCommands, MappingCommands};

#[derive(Debug, Parser)]
#[command(name = "adrecon")]
#[command(about = "Ad-spend reconciliation: import raw extracts and rebuild daily facts")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Import one extract file into its raw table
    Import {
        /// Target table: tencent-spend, douyin-spend, xiaohongshu-spend,
        /// conversions, account-mappings, agency-abbreviations,
        /// note-authority, note-paid or note-total
        entity: EntityKind,
        /// CSV, TSV or spreadsheet file
        file: PathBuf,
        /// Update rows that already exist instead of skipping them
        #[arg(long)]
        overwrite: bool,
    },
    /// Rebuild the unified fact tables for a date window
    Aggregate {
        #[command(subcommand)]
        command: AggregateCommands,
    },
    /// Inspect or edit account-to-agency mappings
    Mapping {
        #[command(subcommand)]
        command: MappingCommands,
    },
    /// Inspect or edit agency abbreviations
    Abbreviation {
        #[command(subcommand)]
        command: AbbreviationCommands,
    },
    /// Show recent pipeline runs
    Runs {
        /// Maximum number of runs to show
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check that the database is reachable
    Ping,
    /// Apply pending migrations
    Migrate,
}

/// Optional `[start, end]` bounds shared by the aggregate commands.
#[derive(Debug, Clone, Copy, clap::Args)]
pub(crate) struct WindowArgs {
    /// First day to rebuild (defaults to the earliest source date)
    #[arg(long)]
    pub start: Option<NaiveDate>,
    /// Last day to rebuild (defaults to today, UTC)
    #[arg(long)]
    pub end: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("adrecon: no command given; see --help");
        return Ok(());
    };

    let config = adrecon_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = adrecon_db::PoolConfig::from_app_config(&config);
    let pool = adrecon_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        Commands::Db { command } => match command {
            DbCommands::Ping => {
                adrecon_db::ping(&pool).await?;
                println!("database ok");
            }
            DbCommands::Migrate => {
                let applied = adrecon_db::run_migrations(&pool).await?;
                println!("applied {applied} migration(s)");
            }
        },
        Commands::Import {
            entity,
            file,
            overwrite,
        } => import::run_import_file(&pool, &config, entity, file, overwrite).await?,
        Commands::Aggregate { command } => aggregate::run(&pool, &config, command).await?,
        Commands::Mapping { command } => mapping::run_mapping(&pool, command).await?,
        Commands::Abbreviation { command } => mapping::run_abbreviation(&pool, command).await?,
        Commands::Runs { limit } => run_list_runs(&pool, limit).await?,
    }

    Ok(())
}

async fn run_list_runs(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<()> {
    let runs = adrecon_db::list_runs(pool, limit).await?;
    if runs.is_empty() {
        println!("no pipeline runs recorded");
        return Ok(());
    }

    println!(
        "{:<7}{:<28}{:<11}{:<11}{:<10}{:<22}ERROR",
        "ID", "TYPE", "TRIGGER", "STATUS", "RECORDS", "STARTED"
    );
    for run in &runs {
        let started = run.started_at.map_or_else(
            || "-".to_string(),
            |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        println!(
            "{:<7}{:<28}{:<11}{:<11}{:<10}{:<22}{}",
            run.id,
            run.run_type,
            run.trigger_source,
            run.status,
            run.records_processed,
            started,
            run.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Attempt to mark a pipeline run as failed, logging any secondary error.
async fn fail_run_best_effort(pool: &sqlx::PgPool, run_id: i64, run_type: &str, message: &str) {
    if let Err(mark_err) = adrecon_db::fail_run(pool, run_id, message).await {
        tracing::error!(
            run_id,
            error = %mark_err,
            "failed to mark {run_type} run as failed"
        );
    }
}

/// Start a ledger entry for a CLI-triggered run.
async fn begin_run(pool: &sqlx::PgPool, run_type: &str) -> anyhow::Result<i64> {
    let run = adrecon_db::create_run(pool, run_type, "cli").await?;
    adrecon_db::start_run(pool, run.id).await?;
    Ok(run.id)
}
