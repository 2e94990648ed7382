//! Typed cell parsers.
//!
//! Each parser returns `Result`; callers decide whether a failure rejects the
//! row (required dates) or degrades to the field's default. Defaults are
//! `0` for counts, `0.00` for money, `false` for flags and `None` for
//! optional text and dates.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value is empty")]
    Empty,
    #[error("'{0}' is not a date (expected YYYY-MM-DD, YYYY/MM/DD or YYYYMMDD)")]
    InvalidDate(String),
    #[error("'{0}' is not a number")]
    InvalidNumber(String),
    #[error("'{0}' is out of range")]
    OutOfRange(String),
    #[error("'{0}' is not a yes/no value")]
    InvalidBool(String),
}

const TRUE_WORDS: &[&str] = &["1", "true", "yes", "y", "t", "是", "有", "√", "✓", "对"];
const FALSE_WORDS: &[&str] = &["0", "false", "no", "n", "f", "否", "无", "×", "✗", "不是"];

/// Parse a calendar date. A trailing time component is ignored.
///
/// # Errors
///
/// Returns [`ParseError::Empty`] for blank input, otherwise
/// [`ParseError::InvalidDate`].
pub fn parse_date(raw: &str) -> Result<NaiveDate, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let date_part = trimmed
        .split(|c: char| c == ' ' || c == 'T')
        .next()
        .unwrap_or(trimmed);

    let parsed = if date_part.len() == 8 && date_part.bytes().all(|b| b.is_ascii_digit()) {
        NaiveDate::parse_from_str(date_part, "%Y%m%d").ok()
    } else {
        ["%Y-%m-%d", "%Y/%m/%d"]
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
    };

    parsed.ok_or_else(|| ParseError::InvalidDate(trimmed.to_string()))
}

/// Parse a money or plain decimal value, ignoring thousands separators,
/// currency signs and surrounding whitespace.
///
/// # Errors
///
/// Returns [`ParseError::Empty`] for blank input, otherwise
/// [`ParseError::InvalidNumber`].
pub fn parse_decimal(raw: &str) -> Result<Decimal, ParseError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '，' | '¥' | '￥' | '$' | ' ' | '\u{a0}'))
        .collect();
    if cleaned.is_empty() {
        return Err(ParseError::Empty);
    }

    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map_err(|_| ParseError::InvalidNumber(raw.trim().to_string()))
}

/// Parse a money amount for a `NUMERIC(p, 2)` column with `integer_digits`
/// (`p - 2`) digits before the point. The value is rounded to cents the way
/// Postgres rounds on insert, then range-checked.
///
/// # Errors
///
/// Returns the [`parse_decimal`] errors, or [`ParseError::OutOfRange`] when
/// the rounded amount does not fit the column.
pub fn parse_money(raw: &str, integer_digits: u32) -> Result<Decimal, ParseError> {
    let value = parse_decimal(raw)?
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let fits = Decimal::from_i128_with_scale(10_i128.pow(integer_digits), 0);
    if value.abs() < fits {
        Ok(value)
    } else {
        Err(ParseError::OutOfRange(raw.trim().to_string()))
    }
}

/// Parse a whole count. Fractional input is truncated.
///
/// # Errors
///
/// Returns [`ParseError::Empty`], [`ParseError::InvalidNumber`] or
/// [`ParseError::OutOfRange`].
pub fn parse_count(raw: &str) -> Result<i64, ParseError> {
    parse_decimal(raw)?
        .trunc()
        .to_i64()
        .ok_or_else(|| ParseError::OutOfRange(raw.trim().to_string()))
}

/// Parse a yes/no flag from the fixed bilingual vocabulary.
///
/// # Errors
///
/// Returns [`ParseError::Empty`] for blank input, otherwise
/// [`ParseError::InvalidBool`].
pub fn parse_bool(raw: &str) -> Result<bool, ParseError> {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return Err(ParseError::Empty);
    }
    if TRUE_WORDS.contains(&lowered.as_str()) {
        Ok(true)
    } else if FALSE_WORDS.contains(&lowered.as_str()) {
        Ok(false)
    } else {
        Err(ParseError::InvalidBool(raw.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn dates_accept_iso_slash_and_compact_forms() {
        assert_eq!(parse_date("2024-03-01"), Ok(ymd(2024, 3, 1)));
        assert_eq!(parse_date("2024/3/1"), Ok(ymd(2024, 3, 1)));
        assert_eq!(parse_date("20240301"), Ok(ymd(2024, 3, 1)));
    }

    #[test]
    fn dates_ignore_trailing_time() {
        assert_eq!(parse_date("2024-03-01 13:45:00"), Ok(ymd(2024, 3, 1)));
        assert_eq!(parse_date("2024-03-01T00:00:00"), Ok(ymd(2024, 3, 1)));
        assert_eq!(parse_date("2024/03/01 9:05"), Ok(ymd(2024, 3, 1)));
    }

    #[test]
    fn invalid_dates_are_errors() {
        assert_eq!(parse_date("  "), Err(ParseError::Empty));
        assert!(matches!(parse_date("March 1"), Err(ParseError::InvalidDate(_))));
        assert!(matches!(parse_date("20241301"), Err(ParseError::InvalidDate(_))));
    }

    #[test]
    fn decimals_strip_separators_and_currency() {
        assert_eq!(parse_decimal("1,234.50"), Ok(Decimal::new(123_450, 2)));
        assert_eq!(parse_decimal("￥2，000"), Ok(Decimal::new(2000, 0)));
        assert_eq!(parse_decimal(" -3.5 "), Ok(Decimal::new(-35, 1)));
        assert!(matches!(parse_decimal("n/a"), Err(ParseError::InvalidNumber(_))));
        assert_eq!(parse_decimal(""), Err(ParseError::Empty));
    }

    #[test]
    fn money_must_fit_its_column() {
        assert_eq!(parse_money("999,999,999,999.99", 12), Ok(Decimal::new(99_999_999_999_999, 2)));
        assert_eq!(parse_money("-12.345", 12), Ok(Decimal::new(-1235, 2)));
        assert!(matches!(parse_money("1e13", 12), Err(ParseError::OutOfRange(_))));
        assert!(matches!(parse_money("1e12", 12), Err(ParseError::OutOfRange(_))));
        // Rounds up to 10^12 on insert.
        assert!(matches!(
            parse_money("999999999999.995", 12),
            Err(ParseError::OutOfRange(_))
        ));
        assert_eq!(parse_money("1e13", 14), Ok(Decimal::new(10_000_000_000_000, 0)));
        assert_eq!(parse_money(" ", 12), Err(ParseError::Empty));
    }

    #[test]
    fn counts_truncate_fractions() {
        assert_eq!(parse_count("12,345"), Ok(12_345));
        assert_eq!(parse_count("7.9"), Ok(7));
        assert_eq!(parse_count("1e3"), Ok(1000));
    }

    #[test]
    fn bools_use_bilingual_vocabulary() {
        for yes in ["1", "TRUE", "yes", "是", "有", "√"] {
            assert_eq!(parse_bool(yes), Ok(true), "{yes}");
        }
        for no in ["0", "false", "No", "否", "无"] {
            assert_eq!(parse_bool(no), Ok(false), "{no}");
        }
        assert!(matches!(parse_bool("maybe"), Err(ParseError::InvalidBool(_))));
    }
}
