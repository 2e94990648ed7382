//! Content tables: the authority list and the paid / total note metrics.

use std::collections::HashMap;

use adrecon_core::{NoteAuthorityRecord, NotePaidRecord, NoteTotalRecord};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use crate::persist::{Lookup, Persist};
use crate::DbError;

type NoteDayKey = (NaiveDate, String);

async fn find_note_day(
    conn: &mut PgConnection,
    table: &str,
    key: &NoteDayKey,
) -> Result<Lookup<i64>, sqlx::Error> {
    let id = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT id FROM {table} WHERE date = $1 AND note_id = $2"
    ))
    .bind(key.0)
    .bind(&key.1)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id.into())
}

async fn preload_note_days(
    conn: &mut PgConnection,
    table: &str,
    keys: &[NoteDayKey],
) -> Result<HashMap<NoteDayKey, i64>, sqlx::Error> {
    let dates: Vec<NaiveDate> = keys.iter().map(|k| k.0).collect();
    let notes: Vec<&str> = keys.iter().map(|k| k.1.as_str()).collect();

    let rows = sqlx::query_as::<_, (i64, NaiveDate, String)>(&format!(
        "SELECT t.id, t.date, t.note_id \
         FROM {table} t \
         JOIN UNNEST($1::date[], $2::text[]) AS k(date, note_id) \
           ON t.date = k.date AND t.note_id = k.note_id"
    ))
    .bind(&dates)
    .bind(&notes)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, date, note_id)| ((date, note_id), id))
        .collect())
}

impl Persist for NoteAuthorityRecord {
    async fn find(conn: &mut PgConnection, key: &String) -> Result<Lookup<i64>, sqlx::Error> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM note_authority WHERE note_id = $1")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(id.into())
    }

    async fn preload(
        conn: &mut PgConnection,
        keys: &[String],
    ) -> Result<HashMap<String, i64>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, note_id FROM note_authority WHERE note_id = ANY($1)",
        )
        .bind(keys)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().map(|(id, note_id)| (note_id, id)).collect())
    }

    async fn insert(&self, conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO note_authority \
                 (note_id, title, account_name, producer, strategy, publish_date) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id",
        )
        .bind(&self.note_id)
        .bind(self.title.as_deref())
        .bind(self.account_name.as_deref())
        .bind(self.producer.as_deref())
        .bind(self.strategy.as_deref())
        .bind(self.publish_date)
        .fetch_one(&mut *conn)
        .await
    }

    async fn update(&self, conn: &mut PgConnection, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE note_authority \
             SET title = $1, account_name = $2, producer = $3, strategy = $4, \
                 publish_date = $5, updated_at = NOW() \
             WHERE id = $6",
        )
        .bind(self.title.as_deref())
        .bind(self.account_name.as_deref())
        .bind(self.producer.as_deref())
        .bind(self.strategy.as_deref())
        .bind(self.publish_date)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

impl Persist for NotePaidRecord {
    async fn find(conn: &mut PgConnection, key: &NoteDayKey) -> Result<Lookup<i64>, sqlx::Error> {
        find_note_day(conn, "note_paid_metrics", key).await
    }

    async fn preload(
        conn: &mut PgConnection,
        keys: &[NoteDayKey],
    ) -> Result<HashMap<NoteDayKey, i64>, sqlx::Error> {
        preload_note_days(conn, "note_paid_metrics", keys).await
    }

    async fn insert(&self, conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO note_paid_metrics \
                 (date, note_id, title, account_name, cost, impressions, clicks, \
                  likes, comments, collects, shares, follows) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING id",
        )
        .bind(self.date)
        .bind(&self.note_id)
        .bind(self.title.as_deref())
        .bind(self.account_name.as_deref())
        .bind(self.cost)
        .bind(self.impressions)
        .bind(self.clicks)
        .bind(self.likes)
        .bind(self.comments)
        .bind(self.collects)
        .bind(self.shares)
        .bind(self.follows)
        .fetch_one(&mut *conn)
        .await
    }

    async fn update(&self, conn: &mut PgConnection, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE note_paid_metrics \
             SET title = $1, account_name = $2, cost = $3, impressions = $4, clicks = $5, \
                 likes = $6, comments = $7, collects = $8, shares = $9, follows = $10, \
                 updated_at = NOW() \
             WHERE id = $11",
        )
        .bind(self.title.as_deref())
        .bind(self.account_name.as_deref())
        .bind(self.cost)
        .bind(self.impressions)
        .bind(self.clicks)
        .bind(self.likes)
        .bind(self.comments)
        .bind(self.collects)
        .bind(self.shares)
        .bind(self.follows)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

impl Persist for NoteTotalRecord {
    async fn find(conn: &mut PgConnection, key: &NoteDayKey) -> Result<Lookup<i64>, sqlx::Error> {
        find_note_day(conn, "note_total_metrics", key).await
    }

    async fn preload(
        conn: &mut PgConnection,
        keys: &[NoteDayKey],
    ) -> Result<HashMap<NoteDayKey, i64>, sqlx::Error> {
        preload_note_days(conn, "note_total_metrics", keys).await
    }

    async fn insert(&self, conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO note_total_metrics \
                 (date, note_id, title, account_name, impressions, \
                  likes, comments, collects, shares, follows) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING id",
        )
        .bind(self.date)
        .bind(&self.note_id)
        .bind(self.title.as_deref())
        .bind(self.account_name.as_deref())
        .bind(self.impressions)
        .bind(self.likes)
        .bind(self.comments)
        .bind(self.collects)
        .bind(self.shares)
        .bind(self.follows)
        .fetch_one(&mut *conn)
        .await
    }

    async fn update(&self, conn: &mut PgConnection, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE note_total_metrics \
             SET title = $1, account_name = $2, impressions = $3, likes = $4, \
                 comments = $5, collects = $6, shares = $7, follows = $8, \
                 updated_at = NOW() \
             WHERE id = $9",
        )
        .bind(self.title.as_deref())
        .bind(self.account_name.as_deref())
        .bind(self.impressions)
        .bind(self.likes)
        .bind(self.comments)
        .bind(self.collects)
        .bind(self.shares)
        .bind(self.follows)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Aggregator reads
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct NoteAuthorityRow {
    note_id: String,
    title: Option<String>,
    account_name: Option<String>,
    producer: Option<String>,
    strategy: Option<String>,
    publish_date: Option<NaiveDate>,
}

#[derive(Debug, sqlx::FromRow)]
struct NotePaidRow {
    date: NaiveDate,
    note_id: String,
    title: Option<String>,
    account_name: Option<String>,
    cost: Decimal,
    impressions: i64,
    clicks: i64,
    likes: i64,
    comments: i64,
    collects: i64,
    shares: i64,
    follows: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct NoteTotalRow {
    date: NaiveDate,
    note_id: String,
    title: Option<String>,
    account_name: Option<String>,
    impressions: i64,
    likes: i64,
    comments: i64,
    collects: i64,
    shares: i64,
    follows: i64,
}

/// Every authority row; the list is small and not date-scoped.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn load_note_authority(pool: &PgPool) -> Result<Vec<NoteAuthorityRecord>, DbError> {
    let rows = sqlx::query_as::<_, NoteAuthorityRow>(
        "SELECT note_id, title, account_name, producer, strategy, publish_date \
         FROM note_authority ORDER BY note_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| NoteAuthorityRecord {
            note_id: r.note_id,
            title: r.title,
            account_name: r.account_name,
            producer: r.producer,
            strategy: r.strategy,
            publish_date: r.publish_date,
        })
        .collect())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn load_note_paid(
    pool: &PgPool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<NotePaidRecord>, DbError> {
    let rows = sqlx::query_as::<_, NotePaidRow>(
        "SELECT date, note_id, title, account_name, cost, impressions, clicks, \
                likes, comments, collects, shares, follows \
         FROM note_paid_metrics \
         WHERE date BETWEEN $1 AND $2 \
         ORDER BY date, note_id",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| NotePaidRecord {
            date: r.date,
            note_id: r.note_id,
            title: r.title,
            account_name: r.account_name,
            cost: r.cost,
            impressions: r.impressions,
            clicks: r.clicks,
            likes: r.likes,
            comments: r.comments,
            collects: r.collects,
            shares: r.shares,
            follows: r.follows,
        })
        .collect())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn load_note_total(
    pool: &PgPool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<NoteTotalRecord>, DbError> {
    let rows = sqlx::query_as::<_, NoteTotalRow>(
        "SELECT date, note_id, title, account_name, impressions, \
                likes, comments, collects, shares, follows \
         FROM note_total_metrics \
         WHERE date BETWEEN $1 AND $2 \
         ORDER BY date, note_id",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| NoteTotalRecord {
            date: r.date,
            note_id: r.note_id,
            title: r.title,
            account_name: r.account_name,
            impressions: r.impressions,
            likes: r.likes,
            comments: r.comments,
            collects: r.collects,
            shares: r.shares,
            follows: r.follows,
        })
        .collect())
}

/// Earliest date in either note metrics table or among note-attributed
/// conversions.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn earliest_notes_date(pool: &PgPool) -> Result<Option<NaiveDate>, DbError> {
    let earliest = sqlx::query_scalar::<_, Option<NaiveDate>>(
        "SELECT MIN(d) FROM ( \
             SELECT MIN(date) AS d FROM note_paid_metrics \
             UNION ALL SELECT MIN(date) FROM note_total_metrics \
             UNION ALL SELECT MIN(lead_date) FROM conversions \
                 WHERE note_id IS NOT NULL AND note_id <> '' \
         ) AS sources",
    )
    .fetch_one(pool)
    .await?;

    Ok(earliest)
}
