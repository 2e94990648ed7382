//! Account → agency resolution over a run-scoped snapshot of the mapping
//! tables.
//!
//! A [`MappingIndex`] is built once per run from one bulk load of
//! `account_agency_mappings` and `agency_abbreviations`, then consulted for
//! every account group. Resolution never writes and never fails: an account
//! nothing matches resolves to empty strings.

use std::collections::HashMap;

use crate::records::{AbbreviationRecord, AbbreviationType, MappingRecord};
use crate::Platform;

/// Agency and business model attributed to an account. Both are empty
/// strings when unresolved, never absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub agency: String,
    pub business_model: String,
}

impl Resolution {
    #[must_use]
    pub fn unresolved() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !self.agency.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MappingIndex {
    by_account: HashMap<(Platform, String), Resolution>,
    direct_by_main: HashMap<(Platform, String), Resolution>,
    agency_codes: HashMap<String, String>,
}

impl MappingIndex {
    #[must_use]
    pub fn new(mappings: &[MappingRecord], abbreviations: &[AbbreviationRecord]) -> Self {
        let mut index = Self::default();
        for mapping in mappings {
            index.insert_mapping(mapping);
        }
        for abbreviation in abbreviations {
            index.insert_abbreviation(abbreviation);
        }
        index
    }

    /// Add or replace one mapping row. Rows with an account id are keyed by
    /// it; rows with only a main account id are direct-buy entries.
    pub fn insert_mapping(&mut self, mapping: &MappingRecord) {
        let resolution = Resolution {
            agency: mapping.agency.trim().to_string(),
            business_model: mapping.business_model.trim().to_string(),
        };
        let account = mapping.account_id.as_deref().map(str::trim);
        let main = mapping.main_account_id.as_deref().map(str::trim);

        match (account, main) {
            (Some(account), _) if !account.is_empty() => {
                self.by_account
                    .insert((mapping.platform, account.to_string()), resolution);
            }
            (_, Some(main)) if !main.is_empty() => {
                self.direct_by_main
                    .insert((mapping.platform, main.to_string()), resolution);
            }
            _ => {}
        }
    }

    /// Inactive codes and platform-type codes are ignored.
    pub fn insert_abbreviation(&mut self, abbreviation: &AbbreviationRecord) {
        if !abbreviation.is_active || abbreviation.mapping_type != AbbreviationType::Agency {
            return;
        }
        self.agency_codes.insert(
            abbreviation.abbreviation.trim().to_lowercase(),
            abbreviation.full_name.trim().to_string(),
        );
    }

    #[must_use]
    pub fn mapping_count(&self) -> usize {
        self.by_account.len() + self.direct_by_main.len()
    }

    /// Find the mapping for an account reference, first match wins:
    ///
    /// 1. on a two-tier platform with a secondary id: `account_id = secondary`;
    ///    on a single-tier platform: `account_id = primary`;
    /// 2. `main_account_id = primary` among direct-buy rows (no account id).
    ///
    /// A miss at one step falls through to the next.
    #[must_use]
    pub fn lookup_account(
        &self,
        platform: Platform,
        primary: &str,
        secondary: Option<&str>,
    ) -> Option<&Resolution> {
        let primary = primary.trim();
        let secondary = secondary.map(str::trim).filter(|s| !s.is_empty());

        let account_key = if platform.has_account_hierarchy() {
            secondary
        } else {
            Some(primary).filter(|p| !p.is_empty())
        };

        if let Some(account) = account_key {
            if let Some(found) = self.by_account.get(&(platform, account.to_string())) {
                return Some(found);
            }
        }

        if primary.is_empty() {
            return None;
        }
        self.direct_by_main.get(&(platform, primary.to_string()))
    }

    /// Resolve an account reference to `(agency, business_model)`, empty
    /// strings when nothing matches.
    #[must_use]
    pub fn resolve_account(
        &self,
        platform: Platform,
        primary: &str,
        secondary: Option<&str>,
    ) -> Resolution {
        self.lookup_account(platform, primary, secondary)
            .cloned()
            .unwrap_or_else(Resolution::unresolved)
    }

    /// Translate an agency short code to its full name, case-insensitively.
    /// Values that are not known codes are returned trimmed but otherwise
    /// unchanged.
    #[must_use]
    pub fn resolve_agency_code(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.agency_codes
            .get(&trimmed.to_lowercase())
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn abbreviation(code: &str, full: &str, active: bool) -> AbbreviationRecord {
        AbbreviationRecord {
            abbreviation: code.to_string(),
            full_name: full.to_string(),
            mapping_type: AbbreviationType::Agency,
            is_active: active,
        }
    }

    #[test]
    fn sub_account_mapping_wins_over_parent_main_account() {
        let index = MappingIndex::new(
            &[
                mapping(Platform::Douyin, Some("X"), Some("Y"), "Sub Agency", "livestream"),
                mapping(Platform::Douyin, None, Some("Y"), "Direct Agency", "feed"),
            ],
            &[],
        );

        let resolved = index.resolve_account(Platform::Douyin, "Y", Some("X"));
        assert_eq!(resolved.agency, "Sub Agency");
        assert_eq!(resolved.business_model, "livestream");
    }

    #[test]
    fn missing_secondary_falls_back_to_direct_buy() {
        let index = MappingIndex::new(
            &[mapping(Platform::Douyin, None, Some("Y"), "Direct Agency", "feed")],
            &[],
        );

        let resolved = index.resolve_account(Platform::Douyin, "Y", None);
        assert_eq!(resolved.agency, "Direct Agency");
    }

    #[test]
    fn unmapped_secondary_falls_through_to_direct_buy() {
        let index = MappingIndex::new(
            &[mapping(Platform::Douyin, None, Some("Y"), "Direct Agency", "feed")],
            &[],
        );

        let resolved = index.resolve_account(Platform::Douyin, "Y", Some("unknown-sub"));
        assert_eq!(resolved.agency, "Direct Agency");
    }

    /// A record without a sub-account shares its main account with siblings
    /// that carry one. It is attributed to the direct-buy row, not to any
    /// sibling's agency, even though the siblings are mapped.
    #[test]
    fn secondary_less_record_ignores_sibling_sub_account_mappings() {
        let index = MappingIndex::new(
            &[
                mapping(Platform::Douyin, Some("S1"), Some("M"), "Agency One", "feed"),
                mapping(Platform::Douyin, Some("S2"), Some("M"), "Agency Two", "feed"),
            ],
            &[],
        );

        let resolved = index.resolve_account(Platform::Douyin, "M", None);
        assert_eq!(resolved, Resolution::unresolved());

        let index = MappingIndex::new(
            &[
                mapping(Platform::Douyin, Some("S1"), Some("M"), "Agency One", "feed"),
                mapping(Platform::Douyin, None, Some("M"), "直客", ""),
            ],
            &[],
        );
        assert_eq!(
            index.resolve_account(Platform::Douyin, "M", None).agency,
            "直客"
        );
    }

    #[test]
    fn single_tier_platform_looks_up_account_id_then_direct_main() {
        let index = MappingIndex::new(
            &[
                mapping(Platform::Tencent, Some("A1"), None, "Agency A", ""),
                mapping(Platform::Tencent, None, Some("A2"), "Agency B", ""),
            ],
            &[],
        );

        assert_eq!(
            index.resolve_account(Platform::Tencent, "A1", None).agency,
            "Agency A"
        );
        assert_eq!(
            index.resolve_account(Platform::Tencent, "A2", None).agency,
            "Agency B"
        );
    }

    #[test]
    fn single_tier_platform_ignores_secondary() {
        let index = MappingIndex::new(
            &[mapping(Platform::Tencent, Some("A1"), None, "Agency A", "")],
            &[],
        );
        assert_eq!(
            index
                .resolve_account(Platform::Tencent, "A1", Some("other"))
                .agency,
            "Agency A"
        );
    }

    #[test]
    fn mappings_are_scoped_by_platform() {
        let index = MappingIndex::new(
            &[mapping(Platform::Tencent, Some("A1"), None, "Agency A", "")],
            &[],
        );
        assert!(!index
            .resolve_account(Platform::Xiaohongshu, "A1", None)
            .is_resolved());
    }

    #[test]
    fn unresolved_account_yields_empty_strings() {
        let index = MappingIndex::default();
        let resolved = index.resolve_account(Platform::Xiaohongshu, "nobody", None);
        assert_eq!(resolved.agency, "");
        assert_eq!(resolved.business_model, "");
        assert!(!resolved.is_resolved());
    }

    #[test]
    fn blank_references_never_match() {
        let index = MappingIndex::new(
            &[mapping(Platform::Douyin, None, Some("M"), "Direct", "")],
            &[],
        );
        assert!(index.lookup_account(Platform::Douyin, "  ", None).is_none());
    }

    #[test]
    fn agency_codes_resolve_case_insensitively() {
        let index = MappingIndex::new(&[], &[abbreviation("XM", "Xingmeng Media", true)]);
        assert_eq!(index.resolve_agency_code(" xm "), "Xingmeng Media");
        assert_eq!(index.resolve_agency_code("XM"), "Xingmeng Media");
    }

    #[test]
    fn unknown_or_inactive_codes_fall_back_to_raw_value() {
        let index = MappingIndex::new(&[], &[abbreviation("OLD", "Retired Agency", false)]);
        assert_eq!(index.resolve_agency_code("OLD"), "OLD");
        assert_eq!(index.resolve_agency_code(" Full Name Co "), "Full Name Co");
    }

    #[test]
    fn platform_type_codes_are_not_agency_codes() {
        let index = MappingIndex::new(
            &[],
            &[AbbreviationRecord {
                abbreviation: "XHS".to_string(),
                full_name: "xiaohongshu".to_string(),
                mapping_type: AbbreviationType::Platform,
                is_active: true,
            }],
        );
        assert_eq!(index.resolve_agency_code("XHS"), "XHS");
    }
}
