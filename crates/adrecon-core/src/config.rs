use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Parsing and validation are decoupled from the process environment so tests
/// can drive them with a plain `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;
    use std::str::FromStr;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    fn parse_as<T>(var: &str, raw: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    }

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("ADRECON_ENV", "development"))?;
    let log_level = or_default("ADRECON_LOG_LEVEL", "info");

    let db_max_connections: u32 = parse_as(
        "ADRECON_DB_MAX_CONNECTIONS",
        &or_default("ADRECON_DB_MAX_CONNECTIONS", "10"),
    )?;
    let db_min_connections: u32 = parse_as(
        "ADRECON_DB_MIN_CONNECTIONS",
        &or_default("ADRECON_DB_MIN_CONNECTIONS", "1"),
    )?;
    let db_acquire_timeout_secs: u64 = parse_as(
        "ADRECON_DB_ACQUIRE_TIMEOUT_SECS",
        &or_default("ADRECON_DB_ACQUIRE_TIMEOUT_SECS", "10"),
    )?;

    let import_batch_size: usize = parse_as(
        "ADRECON_IMPORT_BATCH_SIZE",
        &or_default("ADRECON_IMPORT_BATCH_SIZE", "500"),
    )?;
    if import_batch_size == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "ADRECON_IMPORT_BATCH_SIZE".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    let import_preload_threshold: usize = parse_as(
        "ADRECON_IMPORT_PRELOAD_THRESHOLD",
        &or_default("ADRECON_IMPORT_PRELOAD_THRESHOLD", "200"),
    )?;
    let import_max_errors: usize = parse_as(
        "ADRECON_IMPORT_MAX_ERRORS",
        &or_default("ADRECON_IMPORT_MAX_ERRORS", "50"),
    )?;

    let rules_path = lookup("ADRECON_RULES_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);

    let aggregate_lookback_days: u32 = parse_as(
        "ADRECON_AGGREGATE_LOOKBACK_DAYS",
        &or_default("ADRECON_AGGREGATE_LOOKBACK_DAYS", "7"),
    )?;
    let aggregate_cron = or_default("ADRECON_AGGREGATE_CRON", "0 30 3 * * *");

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        import_batch_size,
        import_preload_threshold,
        import_max_errors,
        rules_path,
        aggregate_lookback_days,
        aggregate_cron,
    })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "ADRECON_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
