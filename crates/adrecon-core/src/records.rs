//! Typed rows produced by the importer, one struct per target table.
//!
//! Each record knows its natural key, the business-meaningful column
//! combination used to find an existing row before insert or update.

use std::fmt::Debug;
use std::hash::Hash;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Platform;

/// A record with a natural key used for in-memory de-duplication and
/// find-or-create persistence.
pub trait NaturalKey {
    type Key: Eq + Hash + Clone + Debug;

    /// `None` means the record has no natural key and is always inserted.
    fn natural_key(&self) -> Option<Self::Key>;
}

// ---------------------------------------------------------------------------
// Raw extracts
// ---------------------------------------------------------------------------

/// One day of spend for one ad account on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendRecord {
    pub platform: Platform,
    pub date: NaiveDate,
    /// The account the platform bills against. For Ocean Engine this is the
    /// main account.
    pub account_id: String,
    /// Ocean Engine sub-account; always `None` on single-tier platforms.
    pub sub_account_id: Option<String>,
    pub cost: Decimal,
    pub impressions: i64,
    pub clicks: i64,
}

impl NaturalKey for SpendRecord {
    /// `(platform, date, account_id, sub_account_id or "")`
    type Key = (Platform, NaiveDate, String, String);

    fn natural_key(&self) -> Option<Self::Key> {
        Some((
            self.platform,
            self.date,
            self.account_id.clone(),
            self.sub_account_id.clone().unwrap_or_default(),
        ))
    }
}

/// One lead event from the CRM export.
///
/// Conversions have no uniqueness constraint: the same person can appear on
/// several rows and each row counts as one lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub lead_date: NaiveDate,
    /// Canonical platform name when recognised, otherwise the raw value.
    pub platform_source: String,
    pub ad_account: String,
    /// Agency as written in the export; may be an abbreviation code.
    pub agency: String,
    pub customer_source: String,
    pub note_id: Option<String>,
    pub is_potential_customer: bool,
    pub is_customer_mouth: bool,
    pub is_valid_lead: bool,
    pub is_opened_account: bool,
    pub is_valid_customer: bool,
    pub assets: Decimal,
    /// Every source column without a canonical field, keyed by header.
    pub extra: serde_json::Value,
}

impl NaturalKey for ConversionRecord {
    type Key = ();

    fn natural_key(&self) -> Option<Self::Key> {
        None
    }
}

// ---------------------------------------------------------------------------
// Dimension mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MappingKey {
    /// Keyed by the account itself (sub-account on Ocean Engine).
    Account(Platform, String),
    /// Keyed by a main account with no account id: a direct-buy account.
    DirectMain(Platform, String),
}

/// One row of the account → agency dimension table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub platform: Platform,
    pub account_id: Option<String>,
    pub main_account_id: Option<String>,
    pub agency: String,
    pub business_model: String,
}

impl NaturalKey for MappingRecord {
    type Key = MappingKey;

    fn natural_key(&self) -> Option<Self::Key> {
        match (&self.account_id, &self.main_account_id) {
            (Some(account), _) => Some(MappingKey::Account(self.platform, account.clone())),
            (None, Some(main)) => Some(MappingKey::DirectMain(self.platform, main.clone())),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbbreviationType {
    Agency,
    Platform,
}

impl AbbreviationType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AbbreviationType::Agency => "agency",
            AbbreviationType::Platform => "platform",
        }
    }

    #[must_use]
    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "agency" | "代理" | "代理商" => Some(AbbreviationType::Agency),
            "platform" | "平台" => Some(AbbreviationType::Platform),
            _ => None,
        }
    }
}

/// A short code some feeds use instead of a canonical agency or platform name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbbreviationRecord {
    pub abbreviation: String,
    pub full_name: String,
    pub mapping_type: AbbreviationType,
    pub is_active: bool,
}

impl NaturalKey for AbbreviationRecord {
    /// Abbreviations compare case-insensitively.
    type Key = (String, AbbreviationType);

    fn natural_key(&self) -> Option<Self::Key> {
        Some((self.abbreviation.to_lowercase(), self.mapping_type))
    }
}

// ---------------------------------------------------------------------------
// Content metrics
// ---------------------------------------------------------------------------

/// Canonical dimension values for a note, maintained by the content team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteAuthorityRecord {
    pub note_id: String,
    pub title: Option<String>,
    pub account_name: Option<String>,
    pub producer: Option<String>,
    pub strategy: Option<String>,
    pub publish_date: Option<NaiveDate>,
}

impl NaturalKey for NoteAuthorityRecord {
    type Key = String;

    fn natural_key(&self) -> Option<Self::Key> {
        Some(self.note_id.clone())
    }
}

/// One day of promoted-placement metrics for a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotePaidRecord {
    pub date: NaiveDate,
    pub note_id: String,
    pub title: Option<String>,
    pub account_name: Option<String>,
    pub cost: Decimal,
    pub impressions: i64,
    pub clicks: i64,
    pub likes: i64,
    pub comments: i64,
    pub collects: i64,
    pub shares: i64,
    pub follows: i64,
}

impl NaturalKey for NotePaidRecord {
    type Key = (NaiveDate, String);

    fn natural_key(&self) -> Option<Self::Key> {
        Some((self.date, self.note_id.clone()))
    }
}

/// One day of all-placement engagement for a note. The export carries no
/// click count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteTotalRecord {
    pub date: NaiveDate,
    pub note_id: String,
    pub title: Option<String>,
    pub account_name: Option<String>,
    pub impressions: i64,
    pub likes: i64,
    pub comments: i64,
    pub collects: i64,
    pub shares: i64,
    pub follows: i64,
}

impl NaturalKey for NoteTotalRecord {
    type Key = (NaiveDate, String);

    fn natural_key(&self) -> Option<Self::Key> {
        Some((self.date, self.note_id.clone()))
    }
}
