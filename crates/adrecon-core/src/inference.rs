//! Business-model inference for rows whose mapping carries no model.
//!
//! Rules are evaluated in order and the first hit wins:
//!
//! 1. a non-empty existing value is kept;
//! 2. platform hard overrides: a named `(platform, agency)` pair, then a
//!    platform-wide default;
//! 3. the static agency → model table;
//! 4. conversion rows only: the free-text customer source, livestream
//!    keywords mapping to the livestream model and any other non-empty text
//!    to the feed model;
//! 5. otherwise the empty string.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Platform};

pub const LIVESTREAM_MODEL: &str = "livestream";
pub const FEED_MODEL: &str = "feed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyOverride {
    pub platform: Platform,
    pub agency: String,
    pub business_model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRules {
    #[serde(default)]
    pub agency_overrides: Vec<AgencyOverride>,
    #[serde(default)]
    pub platform_defaults: BTreeMap<Platform, String>,
    #[serde(default)]
    pub agency_models: BTreeMap<String, String>,
    #[serde(default = "default_livestream_keywords")]
    pub livestream_keywords: Vec<String>,
}

fn default_livestream_keywords() -> Vec<String> {
    ["直播", "livestream", "live"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl Default for InferenceRules {
    fn default() -> Self {
        Self {
            agency_overrides: vec![AgencyOverride {
                platform: Platform::Douyin,
                agency: "直客".to_string(),
                business_model: LIVESTREAM_MODEL.to_string(),
            }],
            platform_defaults: BTreeMap::from([(Platform::Xiaohongshu, FEED_MODEL.to_string())]),
            agency_models: BTreeMap::new(),
            livestream_keywords: default_livestream_keywords(),
        }
    }
}

/// Everything inference looks at for one row.
#[derive(Debug, Clone, Copy)]
pub struct InferenceInput<'a> {
    pub agency: &'a str,
    pub current_business_model: &'a str,
    pub platform: Platform,
    /// `Some` only for conversion-sourced rows.
    pub customer_source: Option<&'a str>,
}

/// Resolve a business model for one row; `""` when no rule applies.
#[must_use]
pub fn infer_business_model(rules: &InferenceRules, input: &InferenceInput<'_>) -> String {
    let current = input.current_business_model.trim();
    if !current.is_empty() {
        return current.to_string();
    }

    let agency = input.agency.trim();

    if let Some(hit) = rules
        .agency_overrides
        .iter()
        .find(|o| o.platform == input.platform && o.agency == agency)
    {
        return hit.business_model.clone();
    }

    if let Some(model) = rules.platform_defaults.get(&input.platform) {
        return model.clone();
    }

    if let Some(model) = rules.agency_models.get(agency) {
        return model.clone();
    }

    if let Some(source) = input.customer_source.map(str::trim) {
        if !source.is_empty() {
            let lowered = source.to_lowercase();
            let is_livestream = rules
                .livestream_keywords
                .iter()
                .any(|k| lowered.contains(&k.to_lowercase()));
            return if is_livestream {
                LIVESTREAM_MODEL.to_string()
            } else {
                FEED_MODEL.to_string()
            };
        }
    }

    String::new()
}

/// Load and validate inference rules from a YAML file.
///
/// Sections absent from the file are empty, except `livestream_keywords`
/// which falls back to the built-in keyword list.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_inference_rules(path: &Path) -> Result<InferenceRules, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::RulesFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let rules: InferenceRules = serde_yaml::from_str(&content)?;
    validate_rules(&rules)?;
    Ok(rules)
}

fn validate_rules(rules: &InferenceRules) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for o in &rules.agency_overrides {
        if o.agency.trim().is_empty() || o.business_model.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "override for platform '{}' must name an agency and a business model",
                o.platform
            )));
        }
        if !seen.insert((o.platform, o.agency.clone())) {
            return Err(ConfigError::Validation(format!(
                "duplicate override for agency '{}' on platform '{}'",
                o.agency, o.platform
            )));
        }
    }

    if let Some((platform, _)) = rules
        .platform_defaults
        .iter()
        .find(|(_, model)| model.trim().is_empty())
    {
        return Err(ConfigError::Validation(format!(
            "platform default for '{platform}' is empty"
        )));
    }

    if let Some((agency, _)) = rules
        .agency_models
        .iter()
        .find(|(_, model)| model.trim().is_empty())
    {
        return Err(ConfigError::Validation(format!(
            "agency '{agency}' maps to an empty business model"
        )));
    }

    if rules.livestream_keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "livestream keywords must be non-empty".to_string(),
        ));
    }

    Ok(())
}
