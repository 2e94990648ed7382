//! Per-platform spend tables: importer writes and aggregator reads.
//!
//! Tencent and Xiaohongshu key spend by `(date, account_id)`. Ocean Engine
//! (Douyin) keys it by `(date, main_account_id, sub_account_id)` with an
//! absent sub-account stored as `''`.

use std::collections::HashMap;

use adrecon_core::{Platform, SpendRecord};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use crate::persist::{Lookup, Persist};
use crate::DbError;

pub(crate) fn spend_table(platform: Platform) -> &'static str {
    match platform {
        Platform::Tencent => "spend_tencent",
        Platform::Douyin => "spend_douyin",
        Platform::Xiaohongshu => "spend_xiaohongshu",
    }
}

type SpendKey = (Platform, NaiveDate, String, String);

impl Persist for SpendRecord {
    async fn find(conn: &mut PgConnection, key: &SpendKey) -> Result<Lookup<i64>, sqlx::Error> {
        let (platform, date, account, sub) = key;
        let table = spend_table(*platform);

        let id = if platform.has_account_hierarchy() {
            sqlx::query_scalar::<_, i64>(&format!(
                "SELECT id FROM {table} \
                 WHERE date = $1 AND main_account_id = $2 AND sub_account_id = $3"
            ))
            .bind(date)
            .bind(account)
            .bind(sub)
            .fetch_optional(&mut *conn)
            .await?
        } else {
            sqlx::query_scalar::<_, i64>(&format!(
                "SELECT id FROM {table} WHERE date = $1 AND account_id = $2"
            ))
            .bind(date)
            .bind(account)
            .fetch_optional(&mut *conn)
            .await?
        };
        Ok(id.into())
    }

    async fn preload(
        conn: &mut PgConnection,
        keys: &[SpendKey],
    ) -> Result<HashMap<SpendKey, i64>, sqlx::Error> {
        let mut found = HashMap::with_capacity(keys.len());

        for platform in Platform::ALL {
            let scoped: Vec<&SpendKey> = keys.iter().filter(|k| k.0 == platform).collect();
            if scoped.is_empty() {
                continue;
            }
            let table = spend_table(platform);
            let dates: Vec<NaiveDate> = scoped.iter().map(|k| k.1).collect();
            let accounts: Vec<String> = scoped.iter().map(|k| k.2.clone()).collect();

            if platform.has_account_hierarchy() {
                let subs: Vec<String> = scoped.iter().map(|k| k.3.clone()).collect();
                let rows = sqlx::query_as::<_, (i64, NaiveDate, String, String)>(&format!(
                    "SELECT s.id, s.date, s.main_account_id, s.sub_account_id \
                     FROM {table} s \
                     JOIN UNNEST($1::date[], $2::text[], $3::text[]) AS k(date, main_id, sub_id) \
                       ON s.date = k.date \
                      AND s.main_account_id = k.main_id \
                      AND s.sub_account_id = k.sub_id"
                ))
                .bind(&dates)
                .bind(&accounts)
                .bind(&subs)
                .fetch_all(&mut *conn)
                .await?;

                for (id, date, main, sub) in rows {
                    found.insert((platform, date, main, sub), id);
                }
            } else {
                let rows = sqlx::query_as::<_, (i64, NaiveDate, String)>(&format!(
                    "SELECT s.id, s.date, s.account_id \
                     FROM {table} s \
                     JOIN UNNEST($1::date[], $2::text[]) AS k(date, account_id) \
                       ON s.date = k.date AND s.account_id = k.account_id"
                ))
                .bind(&dates)
                .bind(&accounts)
                .fetch_all(&mut *conn)
                .await?;

                for (id, date, account) in rows {
                    found.insert((platform, date, account, String::new()), id);
                }
            }
        }

        Ok(found)
    }

    async fn insert(&self, conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
        let table = spend_table(self.platform);

        if self.platform.has_account_hierarchy() {
            sqlx::query_scalar::<_, i64>(&format!(
                "INSERT INTO {table} \
                     (date, main_account_id, sub_account_id, cost, impressions, clicks) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 RETURNING id"
            ))
            .bind(self.date)
            .bind(&self.account_id)
            .bind(self.sub_account_id.as_deref().unwrap_or(""))
            .bind(self.cost)
            .bind(self.impressions)
            .bind(self.clicks)
            .fetch_one(&mut *conn)
            .await
        } else {
            sqlx::query_scalar::<_, i64>(&format!(
                "INSERT INTO {table} (date, account_id, cost, impressions, clicks) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING id"
            ))
            .bind(self.date)
            .bind(&self.account_id)
            .bind(self.cost)
            .bind(self.impressions)
            .bind(self.clicks)
            .fetch_one(&mut *conn)
            .await
        }
    }

    async fn update(&self, conn: &mut PgConnection, id: i64) -> Result<(), sqlx::Error> {
        let table = spend_table(self.platform);
        sqlx::query(&format!(
            "UPDATE {table} \
             SET cost = $1, impressions = $2, clicks = $3, updated_at = NOW() \
             WHERE id = $4"
        ))
        .bind(self.cost)
        .bind(self.impressions)
        .bind(self.clicks)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

/// Spend summed per `(date, account, sub-account)` for the aggregator.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SpendAccountDay {
    pub date: NaiveDate,
    /// Main account on Ocean Engine, the account itself elsewhere.
    pub account_id: String,
    pub sub_account_id: Option<String>,
    pub cost: Decimal,
    pub impressions: i64,
    pub clicks: i64,
}

/// Load one platform's spend in `[start, end]`, grouped by account.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn load_spend_account_days(
    pool: &PgPool,
    platform: Platform,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<SpendAccountDay>, DbError> {
    let table = spend_table(platform);
    let (account_col, sub_col) = if platform.has_account_hierarchy() {
        ("main_account_id", "NULLIF(sub_account_id, '')")
    } else {
        ("account_id", "NULL::TEXT")
    };

    let rows = sqlx::query_as::<_, SpendAccountDay>(&format!(
        "SELECT date, \
                {account_col} AS account_id, \
                {sub_col} AS sub_account_id, \
                COALESCE(SUM(cost), 0) AS cost, \
                COALESCE(SUM(impressions), 0)::BIGINT AS impressions, \
                COALESCE(SUM(clicks), 0)::BIGINT AS clicks \
         FROM {table} \
         WHERE date BETWEEN $1 AND $2 \
         GROUP BY 1, 2, 3 \
         ORDER BY 1, 2, 3"
    ))
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Earliest date present in any spend table or the conversion feed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn earliest_metrics_date(pool: &PgPool) -> Result<Option<NaiveDate>, DbError> {
    let earliest = sqlx::query_scalar::<_, Option<NaiveDate>>(
        "SELECT MIN(d) FROM ( \
             SELECT MIN(date) AS d FROM spend_tencent \
             UNION ALL SELECT MIN(date) FROM spend_douyin \
             UNION ALL SELECT MIN(date) FROM spend_xiaohongshu \
             UNION ALL SELECT MIN(lead_date) FROM conversions \
         ) AS sources",
    )
    .fetch_one(pool)
    .await?;

    Ok(earliest)
}
