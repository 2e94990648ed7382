//! Recurring aggregation job.
//!
//! One cron job rebuilds the trailing window: platform metrics first, then
//! note metrics. Each step records its own `pipeline_runs` entry with
//! trigger `scheduler`. A failed step is logged and left for the next tick.

use std::sync::Arc;

use adrecon_aggregate::{aggregate_metrics, aggregate_notes, DateWindow};
use adrecon_core::{AppConfig, InferenceRules};
use chrono::Utc;
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

const TRIGGER: &str = "scheduler";
const METRICS_RUN: &str = "aggregate:metrics";
const NOTES_RUN: &str = "aggregate:notes";

/// Builds and starts the scheduler with the aggregation job registered.
///
/// The returned handle must be kept alive; dropping it stops the job.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the cron expression is invalid or the
/// scheduler fails to start.
pub async fn build_scheduler(
    pool: PgPool,
    config: Arc<AppConfig>,
    rules: Arc<InferenceRules>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    register_aggregation_job(&scheduler, pool, config, rules).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_aggregation_job(
    scheduler: &JobScheduler,
    pool: PgPool,
    config: Arc<AppConfig>,
    rules: Arc<InferenceRules>,
) -> Result<(), JobSchedulerError> {
    let pool = Arc::new(pool);
    let cron = config.aggregate_cron.clone();

    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let pool = Arc::clone(&pool);
        let config = Arc::clone(&config);
        let rules = Arc::clone(&rules);

        Box::pin(async move {
            let window =
                DateWindow::trailing(config.aggregate_lookback_days, Utc::now().date_naive());
            tracing::info!(window = %window, "scheduler: starting aggregation");
            run_metrics_step(&pool, &rules, window).await;
            run_notes_step(&pool, window).await;
            tracing::info!(window = %window, "scheduler: aggregation complete");
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

/// Create and start a ledger entry; `None` when the ledger is unavailable.
async fn begin_run(pool: &PgPool, run_type: &str) -> Option<i64> {
    let run = match adrecon_db::create_run(pool, run_type, TRIGGER).await {
        Ok(run) => run,
        Err(e) => {
            tracing::error!(run_type, error = %e, "scheduler: failed to create run");
            return None;
        }
    };
    if let Err(e) = adrecon_db::start_run(pool, run.id).await {
        tracing::error!(run_id = run.id, error = %e, "scheduler: failed to start run");
        return None;
    }
    Some(run.id)
}

async fn finish_run(pool: &PgPool, run_id: i64, outcome: Result<u64, String>) {
    let recorded = match outcome {
        Ok(records) => {
            let records = i32::try_from(records).unwrap_or(i32::MAX);
            adrecon_db::complete_run(pool, run_id, records).await
        }
        Err(message) => adrecon_db::fail_run(pool, run_id, &message).await,
    };
    if let Err(e) = recorded {
        tracing::error!(run_id, error = %e, "scheduler: failed to record run outcome");
    }
}

async fn run_metrics_step(pool: &PgPool, rules: &InferenceRules, window: DateWindow) {
    let Some(run_id) = begin_run(pool, METRICS_RUN).await else {
        return;
    };

    let outcome = match aggregate_metrics(pool, rules, window).await {
        Ok(report) if report.is_success() => Ok(report.rows_written()),
        Ok(report) => Err(report.errors.join("; ")),
        Err(e) => Err(format!("{e:#}")),
    };
    if let Err(message) = &outcome {
        tracing::error!(run_id, error = %message, "scheduler: metrics aggregation failed");
    }
    finish_run(pool, run_id, outcome).await;
}

async fn run_notes_step(pool: &PgPool, window: DateWindow) {
    let Some(run_id) = begin_run(pool, NOTES_RUN).await else {
        return;
    };

    let report = aggregate_notes(pool, window).await;
    let outcome = if report.is_success() {
        Ok(report.rows_written())
    } else {
        Err(report.errors.join("; "))
    };
    if let Err(message) = &outcome {
        tracing::error!(run_id, error = %message, "scheduler: notes aggregation failed");
    }
    finish_run(pool, run_id, outcome).await;
}
