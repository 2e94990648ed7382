//! Content-grain aggregation into `unified_daily_note_metrics`.
//!
//! One row per `(date, note_id)` present in the paid metrics, the total
//! metrics or the note-attributed conversions. Each engagement metric is
//! split into paid and organic parts with `total >= ad` and
//! `organic = total - ad`.

use std::collections::{BTreeMap, HashMap, HashSet};

use adrecon_core::{
    FunnelCounts, MetricTriad, NoteAuthorityRecord, NotePaidRecord, NoteTotalRecord,
    UnifiedDailyNoteMetric, UNKNOWN_DIMENSION,
};
use adrecon_db::{
    load_note_authority, load_note_conversion_counts, load_note_paid, load_note_total,
    replace_note_metrics, DbError, FactWriteSummary, NoteConversionCount,
};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::PgPool;

use crate::DateWindow;

/// Split one metric into total, paid and organic parts. A total below the
/// paid figure is raised to it.
#[must_use]
pub fn split_metric(total: i64, paid: i64) -> MetricTriad {
    let total = total.max(paid);
    MetricTriad {
        total,
        ad: paid,
        organic: total - paid,
    }
}

fn ratio(numerator: i64, denominator: i64) -> Option<Decimal> {
    if denominator == 0 {
        return None;
    }
    Decimal::from(numerator).checked_div(Decimal::from(denominator))
}

fn rate(numerator: i64, denominator: i64) -> f64 {
    ratio(numerator, denominator)
        .and_then(|r| r.to_f64())
        .unwrap_or(0.0)
}

/// Organic clicks, assuming organic impressions click through at the paid
/// rate. Halves round to even.
fn estimate_organic_clicks(organic_impressions: i64, ad_clicks: i64, ad_impressions: i64) -> i64 {
    if ad_impressions == 0 {
        return 0;
    }
    Decimal::from(organic_impressions)
        .checked_mul(Decimal::from(ad_clicks))
        .and_then(|clicks| clicks.checked_div(Decimal::from(ad_impressions)))
        .map(|clicks| clicks.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven))
        .and_then(|clicks| clicks.to_i64())
        .unwrap_or(0)
}

/// First non-blank value, else the `unknown` sentinel.
fn dimension<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_DIMENSION)
        .to_string()
}

#[derive(Default)]
struct NoteDay<'a> {
    paid: Option<&'a NotePaidRecord>,
    total: Option<&'a NoteTotalRecord>,
    funnel: FunnelCounts,
}

/// Build note fact rows from already-loaded sources. Rows come out ordered
/// by `(date, note_id)`.
#[must_use]
pub fn build_note_metrics(
    authority: &[NoteAuthorityRecord],
    paid: &[NotePaidRecord],
    total: &[NoteTotalRecord],
    conversions: &[NoteConversionCount],
) -> Vec<UnifiedDailyNoteMetric> {
    let authority: HashMap<&str, &NoteAuthorityRecord> =
        authority.iter().map(|a| (a.note_id.as_str(), a)).collect();

    let mut days: BTreeMap<(NaiveDate, &str), NoteDay<'_>> = BTreeMap::new();
    for row in paid {
        days.entry((row.date, row.note_id.as_str())).or_default().paid = Some(row);
    }
    for row in total {
        days.entry((row.date, row.note_id.as_str())).or_default().total = Some(row);
    }
    for row in conversions {
        days.entry((row.lead_date, row.note_id.as_str()))
            .or_default()
            .funnel += row.funnel();
    }

    days.into_iter()
        .map(|((date, note_id), day)| {
            let canon = authority.get(note_id).copied();
            note_row(date, note_id, canon, &day)
        })
        .collect()
}

fn note_row(
    date: NaiveDate,
    note_id: &str,
    canon: Option<&NoteAuthorityRecord>,
    day: &NoteDay<'_>,
) -> UnifiedDailyNoteMetric {
    let paid = day.paid;
    let total = day.total;
    let paid_of = |f: fn(&NotePaidRecord) -> i64| paid.map_or(0, f);
    let total_of = |f: fn(&NoteTotalRecord) -> i64| total.map_or(0, f);

    let impressions = split_metric(total_of(|t| t.impressions), paid_of(|p| p.impressions));
    let ad_clicks = paid_of(|p| p.clicks);
    let organic_clicks = estimate_organic_clicks(impressions.organic, ad_clicks, impressions.ad);
    let clicks = MetricTriad {
        total: ad_clicks + organic_clicks,
        ad: ad_clicks,
        organic: organic_clicks,
    };

    UnifiedDailyNoteMetric {
        date,
        note_id: note_id.to_string(),
        title: dimension([
            canon.and_then(|a| a.title.as_deref()),
            paid.and_then(|p| p.title.as_deref()),
            total.and_then(|t| t.title.as_deref()),
        ]),
        account_name: dimension([
            canon.and_then(|a| a.account_name.as_deref()),
            paid.and_then(|p| p.account_name.as_deref()),
            total.and_then(|t| t.account_name.as_deref()),
        ]),
        producer: dimension([canon.and_then(|a| a.producer.as_deref())]),
        strategy: dimension([canon.and_then(|a| a.strategy.as_deref())]),
        impressions,
        likes: split_metric(total_of(|t| t.likes), paid_of(|p| p.likes)),
        comments: split_metric(total_of(|t| t.comments), paid_of(|p| p.comments)),
        collects: split_metric(total_of(|t| t.collects), paid_of(|p| p.collects)),
        shares: split_metric(total_of(|t| t.shares), paid_of(|p| p.shares)),
        follows: split_metric(total_of(|t| t.follows), paid_of(|p| p.follows)),
        ad_cost: paid.map_or(Decimal::ZERO, |p| p.cost),
        ad_click_rate: rate(clicks.ad, impressions.ad),
        total_click_rate: rate(clicks.total, impressions.total),
        clicks,
        funnel: day.funnel,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotesReport {
    pub window: DateWindow,
    pub rows: usize,
    /// `None` when the sources could not be loaded or the write failed; the
    /// table then keeps its previous rows for the window.
    pub written: Option<FactWriteSummary>,
    /// Notes in the window with no authority entry; their producer and
    /// strategy are `unknown`.
    pub notes_without_authority: usize,
    pub errors: Vec<String>,
}

impl NotesReport {
    fn new(window: DateWindow) -> Self {
        Self {
            window,
            rows: 0,
            written: None,
            notes_without_authority: 0,
            errors: Vec::new(),
        }
    }

    fn fail(mut self, step: &str, error: &DbError) -> Self {
        tracing::error!(window = %self.window, error = %error, "note metrics: {step} failed");
        self.errors.push(format!("{step}: {error}"));
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.written.map_or(0, |w| w.written())
    }
}

struct NoteSources {
    authority: Vec<NoteAuthorityRecord>,
    paid: Vec<NotePaidRecord>,
    total: Vec<NoteTotalRecord>,
    conversions: Vec<NoteConversionCount>,
}

async fn load_sources(pool: &PgPool, window: DateWindow) -> Result<NoteSources, DbError> {
    Ok(NoteSources {
        authority: load_note_authority(pool).await?,
        paid: load_note_paid(pool, window.start, window.end).await?,
        total: load_note_total(pool, window.start, window.end).await?,
        conversions: load_note_conversion_counts(pool, window.start, window.end).await?,
    })
}

/// Recompute `unified_daily_note_metrics` for `window`.
///
/// A failed load or write is recorded in the report's `errors` and nothing
/// is written.
pub async fn aggregate_notes(pool: &PgPool, window: DateWindow) -> NotesReport {
    tracing::info!(window = %window, "aggregating note metrics");
    let mut report = NotesReport::new(window);

    let sources = match load_sources(pool, window).await {
        Ok(sources) => sources,
        Err(e) => return report.fail("loading sources", &e),
    };

    let rows = build_note_metrics(
        &sources.authority,
        &sources.paid,
        &sources.total,
        &sources.conversions,
    );
    report.rows = rows.len();
    report.notes_without_authority = count_without_authority(&sources.authority, &rows);
    if report.notes_without_authority > 0 {
        tracing::warn!(
            notes = report.notes_without_authority,
            "notes without an authority entry; producer and strategy set to unknown"
        );
    }

    match replace_note_metrics(pool, window.start, window.end, &rows).await {
        Ok(written) => {
            tracing::info!(
                window = %window,
                rows = rows.len(),
                inserted = written.inserted,
                updated = written.updated,
                deleted = written.deleted,
                "note metrics aggregated"
            );
            report.written = Some(written);
            report
        }
        Err(e) => report.fail("writing facts", &e),
    }
}

fn count_without_authority(
    authority: &[NoteAuthorityRecord],
    rows: &[UnifiedDailyNoteMetric],
) -> usize {
    let known: HashSet<&str> =
        authority.iter().map(|a| a.note_id.as_str()).collect();
    rows.iter()
        .map(|r| r.note_id.as_str())
        .filter(|id| !known.contains(id))
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn paid(d: u32, note: &str, impressions: i64, clicks: i64, likes: i64) -> NotePaidRecord {
        NotePaidRecord {
            date: day(d),
            note_id: note.to_string(),
            title: Some("paid title".to_string()),
            account_name: None,
            cost: Decimal::new(1250, 2),
            impressions,
            clicks,
            likes,
            comments: 0,
            collects: 0,
            shares: 0,
            follows: 0,
        }
    }

    fn total(d: u32, note: &str, impressions: i64, likes: i64) -> NoteTotalRecord {
        NoteTotalRecord {
            date: day(d),
            note_id: note.to_string(),
            title: Some("total title".to_string()),
            account_name: Some("Blogger".to_string()),
            impressions,
            likes,
            comments: 0,
            collects: 0,
            shares: 0,
            follows: 0,
        }
    }

    fn authority(note: &str) -> NoteAuthorityRecord {
        NoteAuthorityRecord {
            note_id: note.to_string(),
            title: Some("Canonical".to_string()),
            account_name: None,
            producer: Some("Lin".to_string()),
            strategy: Some("  ".to_string()),
            publish_date: None,
        }
    }

    #[test]
    fn split_keeps_total_at_least_paid() {
        assert_eq!(split_metric(100, 30), MetricTriad { total: 100, ad: 30, organic: 70 });
        assert_eq!(split_metric(20, 30), MetricTriad { total: 30, ad: 30, organic: 0 });
        assert_eq!(split_metric(0, 0), MetricTriad::default());
    }

    #[test]
    fn organic_clicks_follow_paid_rate() {
        let rows = build_note_metrics(&[], &[paid(1, "N1", 1000, 50, 5)], &[total(1, "N1", 3000, 9)], &[]);
        let row = &rows[0];

        assert_eq!(row.impressions, MetricTriad { total: 3000, ad: 1000, organic: 2000 });
        assert_eq!(row.clicks, MetricTriad { total: 150, ad: 50, organic: 100 });
        assert!((row.ad_click_rate - 0.05).abs() < 1e-9);
        assert!((row.total_click_rate - 0.05).abs() < 1e-9);
        assert_eq!(row.likes, MetricTriad { total: 9, ad: 5, organic: 4 });
        assert_eq!(row.ad_cost, Decimal::new(1250, 2));
    }

    #[test]
    fn click_estimate_rounds_half_to_even() {
        // 5 organic impressions at 1/2 = 2.5 clicks
        assert_eq!(estimate_organic_clicks(5, 1, 2), 2);
        // 7 at 1/2 = 3.5 clicks
        assert_eq!(estimate_organic_clicks(7, 1, 2), 4);
        assert_eq!(estimate_organic_clicks(100, 3, 0), 0);
    }

    #[test]
    fn total_only_note_has_zero_rates() {
        let rows = build_note_metrics(&[], &[], &[total(1, "N2", 0, 3)], &[]);
        let row = &rows[0];
        assert_eq!(row.clicks, MetricTriad::default());
        assert!(row.total_click_rate.abs() < f64::EPSILON);
        assert!(row.ad_click_rate.abs() < f64::EPSILON);
        assert_eq!(row.likes.organic, 3);
    }

    #[test]
    fn dimensions_follow_authority_then_paid_then_total() {
        let rows = build_note_metrics(
            &[authority("N1")],
            &[paid(1, "N1", 10, 1, 0), paid(1, "N2", 10, 1, 0)],
            &[total(1, "N1", 10, 0), total(1, "N2", 10, 0), total(1, "N3", 10, 0)],
            &[],
        );

        assert_eq!(rows[0].title, "Canonical");
        assert_eq!(rows[0].account_name, "Blogger");
        assert_eq!(rows[0].producer, "Lin");
        assert_eq!(rows[0].strategy, UNKNOWN_DIMENSION);
        assert_eq!(rows[1].title, "paid title");
        assert_eq!(rows[1].producer, UNKNOWN_DIMENSION);
        assert_eq!(rows[2].title, "total title");
    }

    #[test]
    fn keys_are_the_union_of_all_sources() {
        let conversion = NoteConversionCount {
            lead_date: day(2),
            note_id: "N9".to_string(),
            lead_users: 4,
            potential_customers: 1,
            customer_mouth_users: 0,
            valid_lead_users: 2,
            opened_account_users: 0,
            valid_customer_users: 0,
        };
        let rows = build_note_metrics(
            &[],
            &[paid(1, "N1", 10, 1, 0)],
            &[total(1, "N2", 10, 0)],
            &[conversion],
        );

        let keys: Vec<(NaiveDate, &str)> = rows.iter().map(|r| (r.date, r.note_id.as_str())).collect();
        assert_eq!(keys, vec![(day(1), "N1"), (day(1), "N2"), (day(2), "N9")]);
        assert_eq!(rows[2].funnel.lead_users, 4);
        assert_eq!(rows[2].title, UNKNOWN_DIMENSION);
        assert_eq!(rows[2].impressions, MetricTriad::default());
    }

    #[test]
    fn every_row_satisfies_the_split_invariant() {
        let rows = build_note_metrics(
            &[],
            &[paid(1, "N1", 500, 20, 9), paid(2, "N1", 40, 2, 1)],
            &[total(1, "N1", 300, 3), total(2, "N1", 900, 10)],
            &[],
        );
        for row in rows {
            for triad in [row.impressions, row.likes, row.clicks] {
                assert!(triad.total >= triad.ad);
                assert_eq!(triad.organic, triad.total - triad.ad);
                assert!(triad.organic >= 0);
            }
        }
    }

    #[test]
    fn missing_authority_is_counted_once_per_note() {
        let rows = build_note_metrics(
            &[authority("N1")],
            &[paid(1, "N1", 1, 0, 0), paid(1, "N2", 1, 0, 0), paid(2, "N2", 1, 0, 0)],
            &[],
            &[],
        );
        assert_eq!(count_without_authority(&[authority("N1")], &rows), 1);
    }

    #[test]
    fn failed_step_is_reported_without_a_write() {
        let window = DateWindow::new(day(1), day(7)).unwrap();
        let report = NotesReport::new(window).fail("loading sources", &DbError::NotFound);

        assert!(!report.is_success());
        assert_eq!(report.errors, vec!["loading sources: record not found".to_string()]);
        assert_eq!(report.written, None);
        assert_eq!(report.rows_written(), 0);
    }

    #[test]
    fn written_rows_exclude_deletions() {
        let mut report = NotesReport::new(DateWindow::new(day(1), day(1)).unwrap());
        report.written = Some(FactWriteSummary {
            inserted: 2,
            updated: 3,
            deleted: 4,
        });
        assert!(report.is_success());
        assert_eq!(report.rows_written(), 5);
    }
}
