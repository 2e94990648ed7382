//! The inclusive date range an aggregation run recomputes.

use std::fmt;

use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::AggregateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// # Errors
    ///
    /// Returns [`AggregateError::InvalidWindow`] when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AggregateError> {
        if start > end {
            return Err(AggregateError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Fill in omitted bounds: the start falls back to the earliest source
    /// date (or `today` when every source is empty), the end to `today`.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::InvalidWindow`] when the resolved start is
    /// after the resolved end.
    pub fn resolve(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        earliest: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<Self, AggregateError> {
        let end = end.unwrap_or(today);
        let start = start.or(earliest).unwrap_or(today);
        Self::new(start, end)
    }

    /// The `days` days before `today`, through `today`.
    #[must_use]
    pub fn trailing(days: u32, today: NaiveDate) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Resolve a metrics window, looking up the earliest spend or conversion
/// date only when `start` is omitted.
///
/// # Errors
///
/// Returns [`AggregateError`] on a database failure or an inverted window.
pub async fn metrics_window(
    pool: &PgPool,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<DateWindow, AggregateError> {
    let earliest = match start {
        Some(_) => None,
        None => adrecon_db::earliest_metrics_date(pool).await?,
    };
    DateWindow::resolve(start, end, earliest, today_utc())
}

/// Resolve a notes window, looking up the earliest note metric or
/// note-attributed conversion only when `start` is omitted.
///
/// # Errors
///
/// Returns [`AggregateError`] on a database failure or an inverted window.
pub async fn notes_window(
    pool: &PgPool,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<DateWindow, AggregateError> {
    let earliest = match start {
        Some(_) => None,
        None => adrecon_db::earliest_notes_date(pool).await?,
    };
    DateWindow::resolve(start, end, earliest, today_utc())
}
