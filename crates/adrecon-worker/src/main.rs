mod scheduler;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(adrecon_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let rules = Arc::new(adrecon_aggregate::inference_rules(
        config.rules_path.as_deref(),
    )?);

    let pool_config = adrecon_db::PoolConfig::from_app_config(&config);
    let pool = adrecon_db::connect_pool(&config.database_url, pool_config).await?;
    adrecon_db::run_migrations(&pool).await?;

    let mut scheduler = scheduler::build_scheduler(pool, Arc::clone(&config), rules).await?;
    tracing::info!(
        env = %config.env,
        cron = %config.aggregate_cron,
        lookback_days = config.aggregate_lookback_days,
        "worker started"
    );

    shutdown_signal().await;
    scheduler.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, stopping scheduler");
}
