//! The account → agency dimension table and the abbreviation lookup.

use std::collections::HashMap;

use adrecon_core::{
    AbbreviationRecord, AbbreviationType, MappingIndex, MappingKey, MappingRecord, Platform,
    UNASSIGNED_AGENCY,
};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::persist::{Lookup, Persist};
use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MappingRow {
    pub id: i64,
    pub platform: String,
    pub account_id: Option<String>,
    pub main_account_id: Option<String>,
    pub agency: String,
    pub business_model: String,
    pub updated_at: DateTime<Utc>,
}

impl MappingRow {
    /// `None` when the stored platform is not one the pipeline knows.
    #[must_use]
    pub fn to_record(&self) -> Option<MappingRecord> {
        let platform = self.platform.parse::<Platform>().ok()?;
        Some(MappingRecord {
            platform,
            account_id: self.account_id.clone(),
            main_account_id: self.main_account_id.clone(),
            agency: self.agency.clone(),
            business_model: self.business_model.clone(),
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AbbreviationRow {
    pub id: i64,
    pub abbreviation: String,
    pub full_name: String,
    pub mapping_type: String,
    pub is_active: bool,
}

impl AbbreviationRow {
    #[must_use]
    pub fn to_record(&self) -> Option<AbbreviationRecord> {
        let mapping_type = AbbreviationType::from_label(&self.mapping_type)?;
        Some(AbbreviationRecord {
            abbreviation: self.abbreviation.clone(),
            full_name: self.full_name.clone(),
            mapping_type,
            is_active: self.is_active,
        })
    }
}

const MAPPING_COLUMNS: &str =
    "id, platform, account_id, main_account_id, agency, business_model, updated_at";

// ---------------------------------------------------------------------------
// Importer persistence
// ---------------------------------------------------------------------------

impl Persist for MappingRecord {
    async fn find(conn: &mut PgConnection, key: &MappingKey) -> Result<Lookup<i64>, sqlx::Error> {
        let id = match key {
            MappingKey::Account(platform, account) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM account_agency_mappings \
                     WHERE platform = $1 AND account_id = $2",
                )
                .bind(platform.as_str())
                .bind(account)
                .fetch_optional(&mut *conn)
                .await?
            }
            MappingKey::DirectMain(platform, main) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM account_agency_mappings \
                     WHERE platform = $1 AND main_account_id = $2 AND account_id IS NULL",
                )
                .bind(platform.as_str())
                .bind(main)
                .fetch_optional(&mut *conn)
                .await?
            }
        };
        Ok(id.into())
    }

    async fn preload(
        conn: &mut PgConnection,
        keys: &[MappingKey],
    ) -> Result<HashMap<MappingKey, i64>, sqlx::Error> {
        let mut platforms = Vec::with_capacity(keys.len());
        let mut ids = Vec::with_capacity(keys.len());
        let mut direct = Vec::with_capacity(keys.len());
        for key in keys {
            let (platform, id, is_direct) = match key {
                MappingKey::Account(p, a) => (p, a, false),
                MappingKey::DirectMain(p, m) => (p, m, true),
            };
            platforms.push(platform.as_str());
            ids.push(id.as_str());
            direct.push(is_direct);
        }

        let rows = sqlx::query_as::<_, (i64, String, Option<String>, Option<String>)>(
            "SELECT m.id, m.platform, m.account_id, m.main_account_id \
             FROM account_agency_mappings m \
             JOIN UNNEST($1::text[], $2::text[], $3::bool[]) AS k(platform, ref_id, is_direct) \
               ON m.platform = k.platform \
              AND ( (NOT k.is_direct AND m.account_id = k.ref_id) \
                 OR (k.is_direct AND m.account_id IS NULL AND m.main_account_id = k.ref_id) )",
        )
        .bind(&platforms)
        .bind(&ids)
        .bind(&direct)
        .fetch_all(&mut *conn)
        .await?;

        let mut found = HashMap::with_capacity(rows.len());
        for (id, platform, account, main) in rows {
            let Ok(platform) = platform.parse::<Platform>() else {
                continue;
            };
            let key = match (account, main) {
                (Some(account), _) => MappingKey::Account(platform, account),
                (None, Some(main)) => MappingKey::DirectMain(platform, main),
                (None, None) => continue,
            };
            found.insert(key, id);
        }
        Ok(found)
    }

    async fn insert(&self, conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO account_agency_mappings \
                 (platform, account_id, main_account_id, agency, business_model) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id",
        )
        .bind(self.platform.as_str())
        .bind(self.account_id.as_deref())
        .bind(self.main_account_id.as_deref())
        .bind(&self.agency)
        .bind(&self.business_model)
        .fetch_one(&mut *conn)
        .await
    }

    async fn update(&self, conn: &mut PgConnection, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE account_agency_mappings \
             SET main_account_id = $1, agency = $2, business_model = $3, updated_at = NOW() \
             WHERE id = $4",
        )
        .bind(self.main_account_id.as_deref())
        .bind(&self.agency)
        .bind(&self.business_model)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

impl Persist for AbbreviationRecord {
    async fn find(
        conn: &mut PgConnection,
        key: &(String, AbbreviationType),
    ) -> Result<Lookup<i64>, sqlx::Error> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM agency_abbreviations \
             WHERE LOWER(abbreviation) = $1 AND mapping_type = $2",
        )
        .bind(&key.0)
        .bind(key.1.as_str())
        .fetch_optional(&mut *conn)
        .await?;
        Ok(id.into())
    }

    async fn preload(
        conn: &mut PgConnection,
        keys: &[(String, AbbreviationType)],
    ) -> Result<HashMap<(String, AbbreviationType), i64>, sqlx::Error> {
        let codes: Vec<&str> = keys.iter().map(|k| k.0.as_str()).collect();
        let types: Vec<&str> = keys.iter().map(|k| k.1.as_str()).collect();

        let rows = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT a.id, LOWER(a.abbreviation), a.mapping_type \
             FROM agency_abbreviations a \
             JOIN UNNEST($1::text[], $2::text[]) AS k(code, mapping_type) \
               ON LOWER(a.abbreviation) = k.code AND a.mapping_type = k.mapping_type",
        )
        .bind(&codes)
        .bind(&types)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, code, kind)| {
                AbbreviationType::from_label(&kind).map(|kind| ((code, kind), id))
            })
            .collect())
    }

    async fn insert(&self, conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO agency_abbreviations (abbreviation, full_name, mapping_type, is_active) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(&self.abbreviation)
        .bind(&self.full_name)
        .bind(self.mapping_type.as_str())
        .bind(self.is_active)
        .fetch_one(&mut *conn)
        .await
    }

    async fn update(&self, conn: &mut PgConnection, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE agency_abbreviations \
             SET abbreviation = $1, full_name = $2, is_active = $3, updated_at = NOW() \
             WHERE id = $4",
        )
        .bind(&self.abbreviation)
        .bind(&self.full_name)
        .bind(self.is_active)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

/// Insert an auto-created mapping row unless one already holds its key.
///
/// Returns `true` when a row was inserted.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the insert fails.
pub async fn insert_placeholder_mapping(
    conn: &mut PgConnection,
    mapping: &MappingRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO account_agency_mappings \
             (platform, account_id, main_account_id, agency, business_model) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT DO NOTHING",
    )
    .bind(mapping.platform.as_str())
    .bind(mapping.account_id.as_deref())
    .bind(mapping.main_account_id.as_deref())
    .bind(&mapping.agency)
    .bind(&mapping.business_model)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Run-scoped snapshot and admin operations
// ---------------------------------------------------------------------------

/// Bulk-load both dimension tables into a [`MappingIndex`].
///
/// Rows whose platform or mapping type is unknown are skipped.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if either query fails.
pub async fn load_mapping_index(pool: &PgPool) -> Result<MappingIndex, DbError> {
    let mappings: Vec<MappingRecord> = list_mappings(pool, false)
        .await?
        .iter()
        .filter_map(MappingRow::to_record)
        .collect();
    let abbreviations: Vec<AbbreviationRecord> = list_abbreviations(pool)
        .await?
        .iter()
        .filter_map(AbbreviationRow::to_record)
        .collect();

    Ok(MappingIndex::new(&mappings, &abbreviations))
}

/// List mapping rows, optionally only the auto-created ones still awaiting
/// an operator.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_mappings(pool: &PgPool, unassigned_only: bool) -> Result<Vec<MappingRow>, DbError> {
    let rows = sqlx::query_as::<_, MappingRow>(&format!(
        "SELECT {MAPPING_COLUMNS} FROM account_agency_mappings \
         WHERE NOT $1 OR agency = $2 \
         ORDER BY platform, main_account_id NULLS FIRST, account_id NULLS FIRST"
    ))
    .bind(unassigned_only)
    .bind(UNASSIGNED_AGENCY)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Create or replace the mapping for an account (or a direct-buy main
/// account when `account_id` is `None`). Returns the row id.
///
/// # Errors
///
/// Returns [`DbError::MappingWithoutKey`] if neither id is set, or
/// [`DbError::Sqlx`] if the upsert fails.
pub async fn save_mapping(pool: &PgPool, mapping: &MappingRecord) -> Result<i64, DbError> {
    let conflict = match (&mapping.account_id, &mapping.main_account_id) {
        (Some(_), _) => "(platform, account_id) WHERE account_id IS NOT NULL",
        (None, Some(_)) => "(platform, main_account_id) WHERE account_id IS NULL",
        (None, None) => return Err(DbError::MappingWithoutKey),
    };

    let id = sqlx::query_scalar::<_, i64>(&format!(
        "INSERT INTO account_agency_mappings \
             (platform, account_id, main_account_id, agency, business_model) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT {conflict} DO UPDATE SET \
             main_account_id = EXCLUDED.main_account_id, \
             agency          = EXCLUDED.agency, \
             business_model  = EXCLUDED.business_model, \
             updated_at      = NOW() \
         RETURNING id"
    ))
    .bind(mapping.platform.as_str())
    .bind(mapping.account_id.as_deref())
    .bind(mapping.main_account_id.as_deref())
    .bind(&mapping.agency)
    .bind(&mapping.business_model)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_abbreviations(pool: &PgPool) -> Result<Vec<AbbreviationRow>, DbError> {
    let rows = sqlx::query_as::<_, AbbreviationRow>(
        "SELECT id, abbreviation, full_name, mapping_type, is_active \
         FROM agency_abbreviations \
         ORDER BY mapping_type, LOWER(abbreviation)",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Create or replace an abbreviation, matching existing codes
/// case-insensitively. Returns the row id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn save_abbreviation(
    pool: &PgPool,
    abbreviation: &AbbreviationRecord,
) -> Result<i64, DbError> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO agency_abbreviations (abbreviation, full_name, mapping_type, is_active) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT ((LOWER(abbreviation)), mapping_type) DO UPDATE SET \
             abbreviation = EXCLUDED.abbreviation, \
             full_name    = EXCLUDED.full_name, \
             is_active    = EXCLUDED.is_active, \
             updated_at   = NOW() \
         RETURNING id",
    )
    .bind(&abbreviation.abbreviation)
    .bind(&abbreviation.full_name)
    .bind(abbreviation.mapping_type.as_str())
    .bind(abbreviation.is_active)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(platform: &str) -> MappingRow {
        MappingRow {
            id: 1,
            platform: platform.to_string(),
            account_id: Some("S1".to_string()),
            main_account_id: Some("M1".to_string()),
            agency: "Agency A".to_string(),
            business_model: "feed".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn mapping_row_converts_to_record() {
        let record = row("douyin").to_record().unwrap();
        assert_eq!(record.platform, Platform::Douyin);
        assert_eq!(record.account_id.as_deref(), Some("S1"));
        assert_eq!(record.agency, "Agency A");
    }

    #[test]
    fn mapping_row_with_unknown_platform_is_skipped() {
        assert!(row("myspace").to_record().is_none());
    }

    #[test]
    fn abbreviation_row_converts_mapping_type() {
        let row = AbbreviationRow {
            id: 1,
            abbreviation: "XM".to_string(),
            full_name: "Xingmeng Media".to_string(),
            mapping_type: "agency".to_string(),
            is_active: true,
        };
        let record = row.to_record().unwrap();
        assert_eq!(record.mapping_type, AbbreviationType::Agency);
    }
}
