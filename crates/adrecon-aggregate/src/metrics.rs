//! Platform-grain aggregation into `unified_daily_metrics`.
//!
//! Spend arrives pre-summed per account-day and conversions pre-counted per
//! attribution group, so resolution runs once per group rather than once per
//! raw row. Every platform is rebuilt on its own: a platform whose load or
//! write fails keeps its previous rows and the others still go through.

use std::collections::BTreeMap;

use adrecon_core::{
    infer_business_model, FunnelCounts, InferenceInput, InferenceRules, MappingIndex, Platform,
    Resolution, UnifiedDailyMetric,
};
use adrecon_db::{
    count_unrecognized_conversions, load_conversion_groups, load_mapping_index,
    load_spend_account_days, replace_platform_metrics, ConversionGroup, FactWriteSummary,
    SpendAccountDay,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::{AggregateError, DateWindow};

/// `(date, agency, business_model)` within one platform.
type BucketKey = (NaiveDate, String, String);

/// In-memory fact rows for one platform, built up from spend then
/// conversions.
#[derive(Debug, Clone)]
pub struct PlatformMetrics {
    platform: Platform,
    buckets: BTreeMap<BucketKey, UnifiedDailyMetric>,
}

impl PlatformMetrics {
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            buckets: BTreeMap::new(),
        }
    }

    fn bucket(
        &mut self,
        date: NaiveDate,
        agency: String,
        business_model: String,
    ) -> &mut UnifiedDailyMetric {
        let platform = self.platform;
        self.buckets
            .entry((date, agency.clone(), business_model.clone()))
            .or_insert_with(|| UnifiedDailyMetric {
                date,
                platform,
                agency,
                business_model,
                cost: Decimal::ZERO,
                impressions: 0,
                click_users: 0,
                funnel: FunnelCounts::default(),
            })
    }

    /// Attribute one account-day of spend.
    pub fn add_spend(
        &mut self,
        index: &MappingIndex,
        rules: &InferenceRules,
        day: &SpendAccountDay,
    ) {
        let resolution =
            index.resolve_account(self.platform, &day.account_id, day.sub_account_id.as_deref());
        let business_model = infer_business_model(
            rules,
            &InferenceInput {
                agency: &resolution.agency,
                current_business_model: &resolution.business_model,
                platform: self.platform,
                customer_source: None,
            },
        );

        let row = self.bucket(day.date, resolution.agency, business_model);
        row.cost += day.cost;
        row.impressions += day.impressions;
        row.click_users += day.clicks;
    }

    /// Attribute one conversion group. A key with no spend becomes a
    /// zero-spend row.
    pub fn add_conversions(
        &mut self,
        index: &MappingIndex,
        rules: &InferenceRules,
        group: &ConversionGroup,
    ) {
        let resolution = self.resolve_conversion(index, group);
        let business_model = infer_business_model(
            rules,
            &InferenceInput {
                agency: &resolution.agency,
                current_business_model: &resolution.business_model,
                platform: self.platform,
                customer_source: Some(&group.customer_source),
            },
        );

        let row = self.bucket(group.lead_date, resolution.agency, business_model);
        row.funnel += group.funnel();
    }

    fn resolve_conversion(&self, index: &MappingIndex, group: &ConversionGroup) -> Resolution {
        let found = match self.platform {
            // Tencent leads carry a coded agency, not an account reference.
            Platform::Tencent => None,
            Platform::Douyin => index
                .lookup_account(
                    Platform::Douyin,
                    &group.main_account_id,
                    Some(&group.ad_account),
                )
                .cloned(),
            Platform::Xiaohongshu => index
                .lookup_account(Platform::Xiaohongshu, &group.ad_account, None)
                .cloned(),
        };

        found.unwrap_or_else(|| Resolution {
            agency: index.resolve_agency_code(&group.agency),
            business_model: String::new(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Fact rows ordered by `(date, agency, business_model)`.
    #[must_use]
    pub fn into_rows(self) -> Vec<UnifiedDailyMetric> {
        self.buckets.into_values().collect()
    }
}

/// What happened to one platform in a metrics run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformOutcome {
    pub platform: Platform,
    pub rows: usize,
    /// `None` when the platform was skipped.
    pub written: Option<FactWriteSummary>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsReport {
    pub window: DateWindow,
    pub platforms: Vec<PlatformOutcome>,
    /// Conversions in the window whose platform matched none of the known
    /// platforms; they are left out of every fact row.
    pub unrecognized_conversions: i64,
    pub errors: Vec<String>,
}

impl MetricsReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.platforms
            .iter()
            .filter_map(|p| p.written)
            .map(|w| w.written())
            .sum()
    }
}

/// Recompute `unified_daily_metrics` for `window`.
///
/// # Errors
///
/// Returns [`AggregateError`] only when the mapping index cannot be loaded.
/// Per-platform failures are recorded in the report instead.
pub async fn aggregate_metrics(
    pool: &PgPool,
    rules: &InferenceRules,
    window: DateWindow,
) -> Result<MetricsReport, AggregateError> {
    tracing::info!(window = %window, "aggregating platform metrics");
    let index = load_mapping_index(pool).await?;

    let mut report = MetricsReport {
        window,
        platforms: Vec::with_capacity(Platform::ALL.len()),
        unrecognized_conversions: 0,
        errors: Vec::new(),
    };

    for platform in Platform::ALL {
        let outcome = aggregate_platform(pool, &index, rules, platform, window).await;
        if let Some(error) = &outcome.error {
            tracing::error!(%platform, error = %error, "platform metrics skipped");
            report.errors.push(format!("{platform}: {error}"));
        }
        report.platforms.push(outcome);
    }

    match count_unrecognized_conversions(pool, window.start, window.end).await {
        Ok(0) => {}
        Ok(n) => {
            tracing::warn!(count = n, "conversions with an unrecognized platform were skipped");
            report.unrecognized_conversions = n;
        }
        Err(e) => report
            .errors
            .push(format!("counting unrecognized conversions failed: {e}")),
    }

    tracing::info!(
        window = %window,
        rows = report.rows_written(),
        failed_platforms = report.errors.len(),
        "platform metrics aggregated"
    );
    Ok(report)
}

async fn aggregate_platform(
    pool: &PgPool,
    index: &MappingIndex,
    rules: &InferenceRules,
    platform: Platform,
    window: DateWindow,
) -> PlatformOutcome {
    let skipped = |error: String| PlatformOutcome {
        platform,
        rows: 0,
        written: None,
        error: Some(error),
    };

    let spend = match load_spend_account_days(pool, platform, window.start, window.end).await {
        Ok(rows) => rows,
        Err(e) => return skipped(format!("loading spend failed: {e}")),
    };
    let conversions = match load_conversion_groups(pool, platform, window.start, window.end).await
    {
        Ok(rows) => rows,
        Err(e) => return skipped(format!("loading conversions failed: {e}")),
    };

    let mut metrics = PlatformMetrics::new(platform);
    for day in &spend {
        metrics.add_spend(index, rules, day);
    }
    for group in &conversions {
        metrics.add_conversions(index, rules, group);
    }

    let rows = metrics.into_rows();
    match replace_platform_metrics(pool, platform, window.start, window.end, &rows).await {
        Ok(summary) => {
            tracing::info!(
                %platform,
                inserted = summary.inserted,
                updated = summary.updated,
                deleted = summary.deleted,
                "platform metrics written"
            );
            PlatformOutcome {
                platform,
                rows: rows.len(),
                written: Some(summary),
                error: None,
            }
        }
        Err(e) => skipped(format!("writing metrics failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use adrecon_core::{
        AbbreviationRecord, AbbreviationType, MappingRecord, FEED_MODEL, LIVESTREAM_MODEL,
        UNASSIGNED_AGENCY,
    };

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn spend(date: NaiveDate, account: &str, sub: Option<&str>, cost: i64) -> SpendAccountDay {
        SpendAccountDay {
            date,
            account_id: account.to_string(),
            sub_account_id: sub.map(str::to_string),
            cost: Decimal::new(cost, 0),
            impressions: 100,
            clicks: 10,
        }
    }

    fn group(date: NaiveDate, ad_account: &str, main: &str, agency: &str, source: &str) -> ConversionGroup {
        ConversionGroup {
            lead_date: date,
            ad_account: ad_account.to_string(),
            main_account_id: main.to_string(),
            agency: agency.to_string(),
            customer_source: source.to_string(),
            lead_users: 3,
            potential_customers: 2,
            customer_mouth_users: 0,
            valid_lead_users: 1,
            opened_account_users: 1,
            valid_customer_users: 0,
        }
    }

    fn mapping(
        platform: Platform,
        account: Option<&str>,
        main: Option<&str>,
        agency: &str,
        model: &str,
    ) -> MappingRecord {
        MappingRecord {
            platform,
            account_id: account.map(str::to_string),
            main_account_id: main.map(str::to_string),
            agency: agency.to_string(),
            business_model: model.to_string(),
        }
    }

    fn index() -> MappingIndex {
        MappingIndex::new(
            &[
                mapping(Platform::Douyin, Some("S1"), Some("M1"), "Alpha Media", "feed"),
                mapping(Platform::Douyin, None, Some("M1"), "Direct", ""),
                mapping(Platform::Tencent, Some("T1"), None, "Beta Ads", ""),
                mapping(Platform::Xiaohongshu, Some("X1"), None, "Gamma", ""),
            ],
            &[AbbreviationRecord {
                abbreviation: "BA".to_string(),
                full_name: "Beta Ads".to_string(),
                mapping_type: AbbreviationType::Agency,
                is_active: true,
            }],
        )
    }

    fn build(platform: Platform, spend_rows: &[SpendAccountDay], groups: &[ConversionGroup]) -> Vec<UnifiedDailyMetric> {
        let index = index();
        let rules = InferenceRules::default();
        let mut metrics = PlatformMetrics::new(platform);
        for row in spend_rows {
            metrics.add_spend(&index, &rules, row);
        }
        for g in groups {
            metrics.add_conversions(&index, &rules, g);
        }
        metrics.into_rows()
    }

    #[test]
    fn sub_account_mapping_beats_direct_buy() {
        let rows = build(Platform::Douyin, &[spend(day(1), "M1", Some("S1"), 10)], &[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].agency, "Alpha Media");
        assert_eq!(rows[0].business_model, "feed");
    }

    #[test]
    fn spend_groups_by_attribution_not_account() {
        let rows = build(
            Platform::Douyin,
            &[
                spend(day(1), "M1", Some("S9"), 10),
                spend(day(1), "M1", None, 5),
            ],
            &[],
        );
        // S9 has no mapping of its own and falls through to the direct-buy row.
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].agency, "Direct");
        assert_eq!(rows[0].cost, Decimal::new(15, 0));
        assert_eq!(rows[0].click_users, 20);
    }

    #[test]
    fn unresolved_spend_is_kept_under_empty_agency() {
        let rows = build(
            Platform::Tencent,
            &[spend(day(1), "UNKNOWN1", None, 7), spend(day(1), "UNKNOWN2", None, 3)],
            &[],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].agency, "");
        assert_eq!(rows[0].cost, Decimal::new(10, 0));
    }

    #[test]
    fn tencent_conversions_use_agency_codes() {
        let rows = build(
            Platform::Tencent,
            &[spend(day(1), "T1", None, 10)],
            &[group(day(1), "T1", "T1", "ba", "")],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].agency, "Beta Ads");
        assert_eq!(rows[0].funnel.lead_users, 3);
        assert_eq!(rows[0].cost, Decimal::new(10, 0));
    }

    #[test]
    fn conversion_without_spend_creates_zero_spend_row() {
        let rows = build(
            Platform::Xiaohongshu,
            &[],
            &[group(day(2), "X1", "X1", "", "")],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].agency, "Gamma");
        // Xiaohongshu falls back to the platform default model.
        assert_eq!(rows[0].business_model, FEED_MODEL);
        assert_eq!(rows[0].cost, Decimal::ZERO);
        assert_eq!(rows[0].impressions, 0);
        assert_eq!(rows[0].funnel.valid_lead_users, 1);
    }

    #[test]
    fn douyin_conversion_recovers_direct_buy_through_main_account() {
        let rows = build(
            Platform::Douyin,
            &[],
            &[group(day(1), "S7", "M1", "", "")],
        );
        assert_eq!(rows[0].agency, "Direct");
        assert_eq!(rows[0].business_model, "");
    }

    #[test]
    fn unresolved_douyin_conversion_infers_model_from_customer_source() {
        let rows = build(
            Platform::Douyin,
            &[],
            &[group(day(1), "S8", "S8", "ba", "抖音直播间")],
        );
        assert_eq!(rows[0].agency, "Beta Ads");
        assert_eq!(rows[0].business_model, LIVESTREAM_MODEL);
    }

    #[test]
    fn unassigned_placeholder_flows_into_facts() {
        let index = MappingIndex::new(
            &[mapping(Platform::Tencent, Some("NEW"), None, UNASSIGNED_AGENCY, "")],
            &[],
        );
        let mut metrics = PlatformMetrics::new(Platform::Tencent);
        metrics.add_spend(&index, &InferenceRules::default(), &spend(day(1), "NEW", None, 1));
        let rows = metrics.into_rows();
        assert_eq!(rows[0].agency, UNASSIGNED_AGENCY);
    }

    #[test]
    fn rebuilding_the_same_inputs_is_identical() {
        let spend_rows = [spend(day(1), "M1", Some("S1"), 10), spend(day(2), "M1", None, 4)];
        let groups = [group(day(1), "S1", "M1", "", "")];
        assert_eq!(
            build(Platform::Douyin, &spend_rows, &groups),
            build(Platform::Douyin, &spend_rows, &groups)
        );
    }
}
