//! The CRM conversion feed: insert-only writes and conditional-count reads.

use adrecon_core::{ConversionRecord, FunnelCounts, Platform};
use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};

use crate::persist::Persist;
use crate::DbError;

/// Conversions have no natural key, so [`crate::write_record`] always
/// inserts them and the default keyless `find`/`preload` apply. `update`
/// rewrites one lead by id.
impl Persist for ConversionRecord {
    async fn insert(&self, conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO conversions \
                 (lead_date, platform_source, ad_account, agency, customer_source, note_id, \
                  is_potential_customer, is_customer_mouth, is_valid_lead, \
                  is_opened_account, is_valid_customer, assets, extra) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING id",
        )
        .bind(self.lead_date)
        .bind(&self.platform_source)
        .bind(&self.ad_account)
        .bind(&self.agency)
        .bind(&self.customer_source)
        .bind(self.note_id.as_deref())
        .bind(self.is_potential_customer)
        .bind(self.is_customer_mouth)
        .bind(self.is_valid_lead)
        .bind(self.is_opened_account)
        .bind(self.is_valid_customer)
        .bind(self.assets)
        .bind(&self.extra)
        .fetch_one(&mut *conn)
        .await
    }

    async fn update(&self, conn: &mut PgConnection, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE conversions SET \
                 lead_date = $1, platform_source = $2, ad_account = $3, agency = $4, \
                 customer_source = $5, note_id = $6, is_potential_customer = $7, \
                 is_customer_mouth = $8, is_valid_lead = $9, is_opened_account = $10, \
                 is_valid_customer = $11, assets = $12, extra = $13 \
             WHERE id = $14",
        )
        .bind(self.lead_date)
        .bind(&self.platform_source)
        .bind(&self.ad_account)
        .bind(&self.agency)
        .bind(&self.customer_source)
        .bind(self.note_id.as_deref())
        .bind(self.is_potential_customer)
        .bind(self.is_customer_mouth)
        .bind(self.is_valid_lead)
        .bind(self.is_opened_account)
        .bind(self.is_valid_customer)
        .bind(self.assets)
        .bind(&self.extra)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

/// Delete every conversion whose `lead_date` is one of `dates`.
///
/// Used before an overwrite-mode re-import so the same export replaces its
/// earlier upload instead of doubling it.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the delete fails.
pub async fn delete_conversions_on_dates(
    conn: &mut PgConnection,
    dates: &[NaiveDate],
) -> Result<u64, sqlx::Error> {
    if dates.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query("DELETE FROM conversions WHERE lead_date = ANY($1)")
        .bind(dates)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

const FUNNEL_COUNT_COLUMNS: &str = "\
    COUNT(*)::BIGINT AS lead_users, \
    COUNT(*) FILTER (WHERE c.is_potential_customer)::BIGINT AS potential_customers, \
    COUNT(*) FILTER (WHERE c.is_customer_mouth)::BIGINT AS customer_mouth_users, \
    COUNT(*) FILTER (WHERE c.is_valid_lead)::BIGINT AS valid_lead_users, \
    COUNT(*) FILTER (WHERE c.is_opened_account)::BIGINT AS opened_account_users, \
    COUNT(*) FILTER (WHERE c.is_valid_customer)::BIGINT AS valid_customer_users";

/// Conversion rows of one platform grouped by everything attribution needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversionGroup {
    pub lead_date: NaiveDate,
    pub ad_account: String,
    /// Ocean Engine: the main account recovered through `spend_douyin`, or the
    /// ad account itself when no spend row names it as a sub-account.
    /// Other platforms: the ad account.
    pub main_account_id: String,
    pub agency: String,
    pub customer_source: String,
    pub lead_users: i64,
    pub potential_customers: i64,
    pub customer_mouth_users: i64,
    pub valid_lead_users: i64,
    pub opened_account_users: i64,
    pub valid_customer_users: i64,
}

impl ConversionGroup {
    #[must_use]
    pub fn funnel(&self) -> FunnelCounts {
        FunnelCounts {
            lead_users: self.lead_users,
            potential_customers: self.potential_customers,
            customer_mouth_users: self.customer_mouth_users,
            valid_lead_users: self.valid_lead_users,
            opened_account_users: self.opened_account_users,
            valid_customer_users: self.valid_customer_users,
        }
    }
}

/// Load one platform's conversions in `[start, end]` with funnel counts.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn load_conversion_groups(
    pool: &PgPool,
    platform: Platform,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ConversionGroup>, DbError> {
    // The CRM feed only carries the Ocean Engine sub-account; the latest
    // spend row naming it supplies the main account.
    let (main_expr, join) = if platform.has_account_hierarchy() {
        (
            "COALESCE(d.main_account_id, c.ad_account)",
            "LEFT JOIN LATERAL ( \
                 SELECT s.main_account_id FROM spend_douyin s \
                 WHERE s.sub_account_id = c.ad_account AND c.ad_account <> '' \
                 ORDER BY s.date DESC, s.id DESC \
                 LIMIT 1 \
             ) d ON TRUE",
        )
    } else {
        ("c.ad_account", "")
    };

    let rows = sqlx::query_as::<_, ConversionGroup>(&format!(
        "SELECT c.lead_date, \
                c.ad_account, \
                {main_expr} AS main_account_id, \
                c.agency, \
                c.customer_source, \
                {FUNNEL_COUNT_COLUMNS} \
         FROM conversions c \
         {join} \
         WHERE c.platform_source = $1 AND c.lead_date BETWEEN $2 AND $3 \
         GROUP BY 1, 2, 3, 4, 5 \
         ORDER BY 1, 2, 3, 4, 5"
    ))
    .bind(platform.as_str())
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Number of conversions in `[start, end]` whose platform is none of the
/// known platforms.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_unrecognized_conversions(
    pool: &PgPool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<i64, DbError> {
    let known: Vec<&str> = Platform::ALL.iter().map(|p| p.as_str()).collect();
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM conversions \
         WHERE lead_date BETWEEN $1 AND $2 AND platform_source <> ALL($3)",
    )
    .bind(start)
    .bind(end)
    .bind(&known)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Funnel counts for one note on one day.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NoteConversionCount {
    pub lead_date: NaiveDate,
    pub note_id: String,
    pub lead_users: i64,
    pub potential_customers: i64,
    pub customer_mouth_users: i64,
    pub valid_lead_users: i64,
    pub opened_account_users: i64,
    pub valid_customer_users: i64,
}

impl NoteConversionCount {
    #[must_use]
    pub fn funnel(&self) -> FunnelCounts {
        FunnelCounts {
            lead_users: self.lead_users,
            potential_customers: self.potential_customers,
            customer_mouth_users: self.customer_mouth_users,
            valid_lead_users: self.valid_lead_users,
            opened_account_users: self.opened_account_users,
            valid_customer_users: self.valid_customer_users,
        }
    }
}

/// Load note-attributed conversions in `[start, end]` grouped by note and day.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn load_note_conversion_counts(
    pool: &PgPool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<NoteConversionCount>, DbError> {
    let rows = sqlx::query_as::<_, NoteConversionCount>(&format!(
        "SELECT c.lead_date, c.note_id, {FUNNEL_COUNT_COLUMNS} \
         FROM conversions c \
         WHERE c.note_id IS NOT NULL AND c.note_id <> '' \
           AND c.lead_date BETWEEN $1 AND $2 \
         GROUP BY 1, 2 \
         ORDER BY 1, 2"
    ))
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_group_exposes_funnel_counts() {
        let group = ConversionGroup {
            lead_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            ad_account: "S1".to_string(),
            main_account_id: "M1".to_string(),
            agency: String::new(),
            customer_source: String::new(),
            lead_users: 4,
            potential_customers: 3,
            customer_mouth_users: 0,
            valid_lead_users: 2,
            opened_account_users: 1,
            valid_customer_users: 1,
        };

        let funnel = group.funnel();
        assert_eq!(funnel.lead_users, 4);
        assert_eq!(funnel.valid_lead_users, 2);
        assert_eq!(funnel.valid_customer_users, 1);
    }

    #[test]
    fn funnel_columns_count_every_row_as_a_lead() {
        assert!(FUNNEL_COUNT_COLUMNS.starts_with("COUNT(*)::BIGINT AS lead_users"));
        assert_eq!(FUNNEL_COUNT_COLUMNS.matches("FILTER").count(), 5);
    }
}
