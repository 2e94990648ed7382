//! Writes and reads for the two unified fact tables.
//!
//! A rebuild upserts every produced row and then deletes rows in the same
//! scope (platform and window, or window for notes) that the rebuild did not
//! produce, all in one transaction. Re-running a window therefore leaves the
//! table holding exactly what the latest run computed.

use adrecon_core::{Platform, UnifiedDailyMetric, UnifiedDailyNoteMetric};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactWriteSummary {
    pub inserted: u64,
    pub updated: u64,
    /// Stale rows removed from the window.
    pub deleted: u64,
}

impl FactWriteSummary {
    #[must_use]
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }
}

/// Replace one platform's `unified_daily_metrics` rows in `[start, end]`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; the transaction is then
/// rolled back and the platform's prior rows are untouched.
pub async fn replace_platform_metrics(
    pool: &PgPool,
    platform: Platform,
    start: NaiveDate,
    end: NaiveDate,
    rows: &[UnifiedDailyMetric],
) -> Result<FactWriteSummary, DbError> {
    let mut tx = pool.begin().await?;
    let mut summary = FactWriteSummary::default();

    for row in rows {
        let is_new = sqlx::query_scalar::<_, bool>(
            "INSERT INTO unified_daily_metrics \
                 (date, platform, agency, business_model, cost, impressions, click_users, \
                  lead_users, potential_customers, customer_mouth_users, valid_lead_users, \
                  opened_account_users, valid_customer_users) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (date, platform, agency, business_model) DO UPDATE SET \
                 cost                 = EXCLUDED.cost, \
                 impressions          = EXCLUDED.impressions, \
                 click_users          = EXCLUDED.click_users, \
                 lead_users           = EXCLUDED.lead_users, \
                 potential_customers  = EXCLUDED.potential_customers, \
                 customer_mouth_users = EXCLUDED.customer_mouth_users, \
                 valid_lead_users     = EXCLUDED.valid_lead_users, \
                 opened_account_users = EXCLUDED.opened_account_users, \
                 valid_customer_users = EXCLUDED.valid_customer_users, \
                 updated_at           = NOW() \
             RETURNING (xmax = 0) AS is_new",
        )
        .bind(row.date)
        .bind(platform.as_str())
        .bind(&row.agency)
        .bind(&row.business_model)
        .bind(row.cost)
        .bind(row.impressions)
        .bind(row.click_users)
        .bind(row.funnel.lead_users)
        .bind(row.funnel.potential_customers)
        .bind(row.funnel.customer_mouth_users)
        .bind(row.funnel.valid_lead_users)
        .bind(row.funnel.opened_account_users)
        .bind(row.funnel.valid_customer_users)
        .fetch_one(&mut *tx)
        .await?;

        if is_new {
            summary.inserted += 1;
        } else {
            summary.updated += 1;
        }
    }

    let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
    let agencies: Vec<&str> = rows.iter().map(|r| r.agency.as_str()).collect();
    let models: Vec<&str> = rows.iter().map(|r| r.business_model.as_str()).collect();

    let deleted = sqlx::query(
        "DELETE FROM unified_daily_metrics u \
         WHERE u.platform = $1 AND u.date BETWEEN $2 AND $3 \
           AND NOT EXISTS ( \
               SELECT 1 FROM UNNEST($4::date[], $5::text[], $6::text[]) \
                   AS k(date, agency, business_model) \
               WHERE k.date = u.date \
                 AND k.agency = u.agency \
                 AND k.business_model = u.business_model \
           )",
    )
    .bind(platform.as_str())
    .bind(start)
    .bind(end)
    .bind(&dates)
    .bind(&agencies)
    .bind(&models)
    .execute(&mut *tx)
    .await?;
    summary.deleted = deleted.rows_affected();

    tx.commit().await?;
    Ok(summary)
}

/// Replace `unified_daily_note_metrics` rows in `[start, end]`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; the transaction is then
/// rolled back.
pub async fn replace_note_metrics(
    pool: &PgPool,
    start: NaiveDate,
    end: NaiveDate,
    rows: &[UnifiedDailyNoteMetric],
) -> Result<FactWriteSummary, DbError> {
    let mut tx = pool.begin().await?;
    let mut summary = FactWriteSummary::default();

    for row in rows {
        let is_new = sqlx::query_scalar::<_, bool>(
            "INSERT INTO unified_daily_note_metrics \
                 (date, note_id, title, account_name, producer, strategy, \
                  total_impressions, ad_impressions, organic_impressions, \
                  total_likes, ad_likes, organic_likes, \
                  total_comments, ad_comments, organic_comments, \
                  total_collects, ad_collects, organic_collects, \
                  total_shares, ad_shares, organic_shares, \
                  total_follows, ad_follows, organic_follows, \
                  total_clicks, ad_clicks, organic_clicks, \
                  ad_cost, ad_click_rate, total_click_rate, \
                  lead_users, potential_customers, customer_mouth_users, \
                  valid_lead_users, opened_account_users, valid_customer_users) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                     $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, \
                     $30, $31, $32, $33, $34, $35, $36) \
             ON CONFLICT (date, note_id) DO UPDATE SET \
                 title = EXCLUDED.title, \
                 account_name = EXCLUDED.account_name, \
                 producer = EXCLUDED.producer, \
                 strategy = EXCLUDED.strategy, \
                 total_impressions = EXCLUDED.total_impressions, \
                 ad_impressions = EXCLUDED.ad_impressions, \
                 organic_impressions = EXCLUDED.organic_impressions, \
                 total_likes = EXCLUDED.total_likes, \
                 ad_likes = EXCLUDED.ad_likes, \
                 organic_likes = EXCLUDED.organic_likes, \
                 total_comments = EXCLUDED.total_comments, \
                 ad_comments = EXCLUDED.ad_comments, \
                 organic_comments = EXCLUDED.organic_comments, \
                 total_collects = EXCLUDED.total_collects, \
                 ad_collects = EXCLUDED.ad_collects, \
                 organic_collects = EXCLUDED.organic_collects, \
                 total_shares = EXCLUDED.total_shares, \
                 ad_shares = EXCLUDED.ad_shares, \
                 organic_shares = EXCLUDED.organic_shares, \
                 total_follows = EXCLUDED.total_follows, \
                 ad_follows = EXCLUDED.ad_follows, \
                 organic_follows = EXCLUDED.organic_follows, \
                 total_clicks = EXCLUDED.total_clicks, \
                 ad_clicks = EXCLUDED.ad_clicks, \
                 organic_clicks = EXCLUDED.organic_clicks, \
                 ad_cost = EXCLUDED.ad_cost, \
                 ad_click_rate = EXCLUDED.ad_click_rate, \
                 total_click_rate = EXCLUDED.total_click_rate, \
                 lead_users = EXCLUDED.lead_users, \
                 potential_customers = EXCLUDED.potential_customers, \
                 customer_mouth_users = EXCLUDED.customer_mouth_users, \
                 valid_lead_users = EXCLUDED.valid_lead_users, \
                 opened_account_users = EXCLUDED.opened_account_users, \
                 valid_customer_users = EXCLUDED.valid_customer_users, \
                 updated_at = NOW() \
             RETURNING (xmax = 0) AS is_new",
        )
        .bind(row.date)
        .bind(&row.note_id)
        .bind(&row.title)
        .bind(&row.account_name)
        .bind(&row.producer)
        .bind(&row.strategy)
        .bind(row.impressions.total)
        .bind(row.impressions.ad)
        .bind(row.impressions.organic)
        .bind(row.likes.total)
        .bind(row.likes.ad)
        .bind(row.likes.organic)
        .bind(row.comments.total)
        .bind(row.comments.ad)
        .bind(row.comments.organic)
        .bind(row.collects.total)
        .bind(row.collects.ad)
        .bind(row.collects.organic)
        .bind(row.shares.total)
        .bind(row.shares.ad)
        .bind(row.shares.organic)
        .bind(row.follows.total)
        .bind(row.follows.ad)
        .bind(row.follows.organic)
        .bind(row.clicks.total)
        .bind(row.clicks.ad)
        .bind(row.clicks.organic)
        .bind(row.ad_cost)
        .bind(row.ad_click_rate)
        .bind(row.total_click_rate)
        .bind(row.funnel.lead_users)
        .bind(row.funnel.potential_customers)
        .bind(row.funnel.customer_mouth_users)
        .bind(row.funnel.valid_lead_users)
        .bind(row.funnel.opened_account_users)
        .bind(row.funnel.valid_customer_users)
        .fetch_one(&mut *tx)
        .await?;

        if is_new {
            summary.inserted += 1;
        } else {
            summary.updated += 1;
        }
    }

    let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
    let notes: Vec<&str> = rows.iter().map(|r| r.note_id.as_str()).collect();

    let deleted = sqlx::query(
        "DELETE FROM unified_daily_note_metrics u \
         WHERE u.date BETWEEN $1 AND $2 \
           AND NOT EXISTS ( \
               SELECT 1 FROM UNNEST($3::date[], $4::text[]) AS k(date, note_id) \
               WHERE k.date = u.date AND k.note_id = u.note_id \
           )",
    )
    .bind(start)
    .bind(end)
    .bind(&dates)
    .bind(&notes)
    .execute(&mut *tx)
    .await?;
    summary.deleted = deleted.rows_affected();

    tx.commit().await?;
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// A row from `unified_daily_metrics`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UnifiedMetricRow {
    pub date: NaiveDate,
    pub platform: String,
    pub agency: String,
    pub business_model: String,
    pub cost: Decimal,
    pub impressions: i64,
    pub click_users: i64,
    pub lead_users: i64,
    pub potential_customers: i64,
    pub customer_mouth_users: i64,
    pub valid_lead_users: i64,
    pub opened_account_users: i64,
    pub valid_customer_users: i64,
    pub updated_at: DateTime<Utc>,
}

/// A row from `unified_daily_note_metrics`, limited to the columns operators
/// inspect.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NoteMetricRow {
    pub date: NaiveDate,
    pub note_id: String,
    pub title: String,
    pub account_name: String,
    pub producer: String,
    pub strategy: String,
    pub total_impressions: i64,
    pub ad_impressions: i64,
    pub organic_impressions: i64,
    pub total_clicks: i64,
    pub ad_clicks: i64,
    pub organic_clicks: i64,
    pub ad_cost: Decimal,
    pub ad_click_rate: f64,
    pub total_click_rate: f64,
    pub lead_users: i64,
}

/// Fact rows in `[start, end]`, optionally for one platform.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_unified_metrics(
    pool: &PgPool,
    platform: Option<Platform>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<UnifiedMetricRow>, DbError> {
    let rows = sqlx::query_as::<_, UnifiedMetricRow>(
        "SELECT date, platform, agency, business_model, cost, impressions, click_users, \
                lead_users, potential_customers, customer_mouth_users, valid_lead_users, \
                opened_account_users, valid_customer_users, updated_at \
         FROM unified_daily_metrics \
         WHERE date BETWEEN $1 AND $2 AND ($3::text IS NULL OR platform = $3) \
         ORDER BY date, platform, agency, business_model",
    )
    .bind(start)
    .bind(end)
    .bind(platform.map(Platform::as_str))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_note_metrics(
    pool: &PgPool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<NoteMetricRow>, DbError> {
    let rows = sqlx::query_as::<_, NoteMetricRow>(
        "SELECT date, note_id, title, account_name, producer, strategy, \
                total_impressions, ad_impressions, organic_impressions, \
                total_clicks, ad_clicks, organic_clicks, \
                ad_cost, ad_click_rate, total_click_rate, lead_users \
         FROM unified_daily_note_metrics \
         WHERE date BETWEEN $1 AND $2 \
         ORDER BY date, note_id",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
