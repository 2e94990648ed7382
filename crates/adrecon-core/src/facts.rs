//! Rows of the two unified fact tables the aggregators rebuild.

use std::ops::AddAssign;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Platform;

/// Conditional counts over conversion rows. Every conversion row counts as
/// one lead; the other fields count rows whose matching flag is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelCounts {
    pub lead_users: i64,
    pub potential_customers: i64,
    pub customer_mouth_users: i64,
    pub valid_lead_users: i64,
    pub opened_account_users: i64,
    pub valid_customer_users: i64,
}

impl FunnelCounts {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == FunnelCounts::default()
    }
}

impl AddAssign for FunnelCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.lead_users += rhs.lead_users;
        self.potential_customers += rhs.potential_customers;
        self.customer_mouth_users += rhs.customer_mouth_users;
        self.valid_lead_users += rhs.valid_lead_users;
        self.opened_account_users += rhs.opened_account_users;
        self.valid_customer_users += rhs.valid_customer_users;
    }
}

/// One row of `unified_daily_metrics`, keyed by
/// `(date, platform, agency, business_model)`.
///
/// `agency` and `business_model` are empty strings when attribution could
/// not be resolved; such rows are kept and summed like any other bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedDailyMetric {
    pub date: NaiveDate,
    pub platform: Platform,
    pub agency: String,
    pub business_model: String,
    pub cost: Decimal,
    pub impressions: i64,
    pub click_users: i64,
    pub funnel: FunnelCounts,
}

/// Total, paid and organic values of one engagement metric.
///
/// Constructed so that `total >= ad` and `organic == total - ad >= 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTriad {
    pub total: i64,
    pub ad: i64,
    pub organic: i64,
}

/// One row of `unified_daily_note_metrics`, keyed by `(date, note_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedDailyNoteMetric {
    pub date: NaiveDate,
    pub note_id: String,
    pub title: String,
    pub account_name: String,
    pub producer: String,
    pub strategy: String,
    pub impressions: MetricTriad,
    pub likes: MetricTriad,
    pub comments: MetricTriad,
    pub collects: MetricTriad,
    pub shares: MetricTriad,
    pub follows: MetricTriad,
    /// `organic` is estimated from the paid click-rate; see the notes aggregator.
    pub clicks: MetricTriad,
    pub ad_cost: Decimal,
    pub ad_click_rate: f64,
    /// Blended rate over all impressions, built on the organic click estimate.
    pub total_click_rate: f64,
    pub funnel: FunnelCounts,
}
