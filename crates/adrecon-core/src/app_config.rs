use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Rows committed per transaction during an import.
    pub import_batch_size: usize,
    /// Above this many keyed rows the importer pre-loads existing natural
    /// keys in one query instead of looking each row up.
    pub import_preload_threshold: usize,
    /// Cap on row-level errors and warnings carried in an import report.
    pub import_max_errors: usize,
    /// Optional YAML override for the business-model inference rules.
    pub rules_path: Option<PathBuf>,
    /// Trailing window (in days, ending today) the worker recomputes.
    pub aggregate_lookback_days: u32,
    pub aggregate_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("import_batch_size", &self.import_batch_size)
            .field("import_preload_threshold", &self.import_preload_threshold)
            .field("import_max_errors", &self.import_max_errors)
            .field("rules_path", &self.rules_path)
            .field("aggregate_lookback_days", &self.aggregate_lookback_days)
            .field("aggregate_cron", &self.aggregate_cron)
            .finish()
    }
}
