//! `aggregate` command handlers.
//!
//! Each step gets its own ledger entry so a failed notes rebuild does not
//! hide a successful metrics rebuild.

use adrecon_aggregate::{
    aggregate_metrics, aggregate_notes, inference_rules, metrics_window, notes_window,
    MetricsReport, NotesReport,
};
use adrecon_core::AppConfig;
use clap::Subcommand;

use crate::{begin_run, fail_run_best_effort, WindowArgs};

#[derive(Debug, Subcommand)]
pub(crate) enum AggregateCommands {
    /// Rebuild platform-level daily metrics
    Metrics {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Rebuild note-level daily metrics
    Notes {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Rebuild both, metrics first
    All {
        #[command(flatten)]
        window: WindowArgs,
    },
}

/// # Errors
///
/// Returns an error if the window is invalid, the rules file cannot be
/// loaded, or any requested step fails.
pub(crate) async fn run(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    command: AggregateCommands,
) -> anyhow::Result<()> {
    match command {
        AggregateCommands::Metrics { window } => run_metrics(pool, config, window).await,
        AggregateCommands::Notes { window } => run_notes(pool, window).await,
        AggregateCommands::All { window } => {
            let metrics = run_metrics(pool, config, window).await;
            let notes = run_notes(pool, window).await;
            metrics.and(notes)
        }
    }
}

async fn run_metrics(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    window: WindowArgs,
) -> anyhow::Result<()> {
    const RUN_TYPE: &str = "aggregate:metrics";

    let rules = inference_rules(config.rules_path.as_deref())?;
    let window = metrics_window(pool, window.start, window.end).await?;
    let run_id = begin_run(pool, RUN_TYPE).await?;

    let report = match aggregate_metrics(pool, &rules, window).await {
        Ok(report) => report,
        Err(e) => {
            fail_run_best_effort(pool, run_id, RUN_TYPE, &format!("{e:#}")).await;
            return Err(e.into());
        }
    };
    print_metrics(&report);

    if !report.is_success() {
        let message = report.errors.join("; ");
        fail_run_best_effort(pool, run_id, RUN_TYPE, &message).await;
        anyhow::bail!("metrics aggregation incomplete: {message}");
    }

    let written = i32::try_from(report.rows_written()).unwrap_or(i32::MAX);
    adrecon_db::complete_run(pool, run_id, written).await?;
    Ok(())
}

async fn run_notes(pool: &sqlx::PgPool, window: WindowArgs) -> anyhow::Result<()> {
    const RUN_TYPE: &str = "aggregate:notes";

    let window = notes_window(pool, window.start, window.end).await?;
    let run_id = begin_run(pool, RUN_TYPE).await?;

    let report = aggregate_notes(pool, window).await;
    print_notes(&report);

    if !report.is_success() {
        let message = report.errors.join("; ");
        fail_run_best_effort(pool, run_id, RUN_TYPE, &message).await;
        anyhow::bail!("note aggregation failed: {message}");
    }

    let written = i32::try_from(report.rows_written()).unwrap_or(i32::MAX);
    adrecon_db::complete_run(pool, run_id, written).await?;
    Ok(())
}

fn print_metrics(report: &MetricsReport) {
    println!("metrics {}:", report.window);
    for outcome in &report.platforms {
        match (&outcome.written, &outcome.error) {
            (Some(w), _) => println!(
                "  {:<12} {} row(s)  inserted {}  updated {}  removed {}",
                outcome.platform.as_str(),
                outcome.rows,
                w.inserted,
                w.updated,
                w.deleted
            ),
            (None, Some(e)) => println!("  {:<12} skipped: {e}", outcome.platform.as_str()),
            (None, None) => println!("  {:<12} skipped", outcome.platform.as_str()),
        }
    }
    if report.unrecognized_conversions > 0 {
        println!(
            "  {} conversion(s) with an unrecognized platform were left out",
            report.unrecognized_conversions
        );
    }
}

fn print_notes(report: &NotesReport) {
    match &report.written {
        Some(w) => println!(
            "notes {}: {} row(s)  inserted {}  updated {}  removed {}",
            report.window, report.rows, w.inserted, w.updated, w.deleted
        ),
        None => println!("notes {}: not written", report.window),
    }
    for error in &report.errors {
        println!("  {error}");
    }
    if report.notes_without_authority > 0 {
        println!(
            "  {} note(s) have no authority entry",
            report.notes_without_authority
        );
    }
}
