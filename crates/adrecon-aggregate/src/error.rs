use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("invalid window: start {start} is after end {end}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },

    #[error("inference rules: {0}")]
    Rules(#[from] adrecon_core::ConfigError),

    #[error(transparent)]
    Db(#[from] adrecon_db::DbError),
}
