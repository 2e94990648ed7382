//! `import` command handler.

use std::path::PathBuf;

use adrecon_core::{AppConfig, EntityKind};
use adrecon_import::{run_import, ImportReport, ImportRequest, ImportSettings, ImportStatus};

use crate::{begin_run, fail_run_best_effort};

/// How many collected errors or warnings to echo to the terminal.
const SAMPLE_SIZE: usize = 10;

/// Import one file and record the run in the pipeline ledger.
///
/// # Errors
///
/// Returns an error if the ledger cannot be written or the import aborted on
/// a whole-file problem. Row and batch failures are printed, not returned.
pub(crate) async fn run_import_file(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    entity: EntityKind,
    file: PathBuf,
    overwrite: bool,
) -> anyhow::Result<()> {
    let run_type = format!("import:{entity}");
    let run_id = begin_run(pool, &run_type).await?;

    let request = ImportRequest {
        path: file,
        entity,
        overwrite,
    };
    let report = run_import(pool, &request, &ImportSettings::from_app_config(config)).await;
    print_report(&request, &report);

    if let Some(fatal) = &report.fatal_error {
        fail_run_best_effort(pool, run_id, &run_type, fatal).await;
        anyhow::bail!("import of {} aborted: {fatal}", request.path.display());
    }

    let processed = i32::try_from(report.records_processed()).unwrap_or(i32::MAX);
    if let Err(e) = adrecon_db::complete_run(pool, run_id, processed).await {
        fail_run_best_effort(pool, run_id, &run_type, &format!("{e:#}")).await;
        return Err(e.into());
    }
    Ok(())
}

fn print_report(request: &ImportRequest, report: &ImportReport) {
    let status = match report.status {
        ImportStatus::Completed => "completed",
        ImportStatus::CompletedWithErrors => "completed with errors",
        ImportStatus::Aborted => "aborted",
    };
    println!("{} -> {}: {status}", request.path.display(), report.entity);
    if report.is_aborted() {
        return;
    }

    println!(
        "  rows {}  inserted {}  updated {}  skipped {}  failed {}  duplicates {}",
        report.total_rows,
        report.inserted,
        report.updated,
        report.skipped,
        report.failed,
        report.deduplicated
    );
    if report.placeholders_created > 0 {
        println!(
            "  {} new account(s) mapped to 'unassigned'; see `mapping list --unassigned`",
            report.placeholders_created
        );
    }
    if report.conversions_replaced > 0 {
        println!("  replaced {} existing conversion(s)", report.conversions_replaced);
    }

    print_sample("error", &report.errors, report.error_count);
    print_sample("warning", &report.warnings, report.warning_count);
}

fn print_sample(label: &str, messages: &[String], total: usize) {
    if total == 0 {
        return;
    }
    println!("  {total} {label}(s):");
    for message in messages.iter().take(SAMPLE_SIZE) {
        println!("    {message}");
    }
    if total > SAMPLE_SIZE {
        println!("    ... and {} more", total - SAMPLE_SIZE);
    }
}
