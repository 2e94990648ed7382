use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Advertising platforms whose spend exports feed the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Tencent,
    /// Ocean Engine. Spend is reported per sub-account under a main account.
    Douyin,
    Xiaohongshu,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Tencent, Platform::Douyin, Platform::Xiaohongshu];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Tencent => "tencent",
            Platform::Douyin => "douyin",
            Platform::Xiaohongshu => "xiaohongshu",
        }
    }

    /// `true` when the platform reports spend per sub-account beneath a main
    /// account, so account resolution tries the sub-account first.
    #[must_use]
    pub fn has_account_hierarchy(self) -> bool {
        matches!(self, Platform::Douyin)
    }

    /// Recognise a platform name as it appears in exports, in either language.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    #[must_use]
    pub fn from_label(raw: &str) -> Option<Self> {
        let label = raw.trim().to_lowercase();
        match label.as_str() {
            "tencent" | "tencent ads" | "gdt" | "腾讯" | "腾讯广告" | "广点通" => {
                Some(Platform::Tencent)
            }
            "douyin" | "ocean engine" | "oceanengine" | "抖音" | "巨量" | "巨量引擎" => {
                Some(Platform::Douyin)
            }
            "xiaohongshu" | "xhs" | "red" | "小红书" | "聚光" => Some(Platform::Xiaohongshu),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::from_label(s).ok_or_else(|| CoreError::UnknownPlatform(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_label_accepts_both_languages() {
        assert_eq!(Platform::from_label("小红书"), Some(Platform::Xiaohongshu));
        assert_eq!(Platform::from_label(" XHS "), Some(Platform::Xiaohongshu));
        assert_eq!(Platform::from_label("巨量引擎"), Some(Platform::Douyin));
        assert_eq!(Platform::from_label("Tencent"), Some(Platform::Tencent));
        assert_eq!(Platform::from_label("广点通"), Some(Platform::Tencent));
    }

    #[test]
    fn from_label_rejects_unknown() {
        assert_eq!(Platform::from_label("weibo"), None);
        assert_eq!(Platform::from_label(""), None);
    }

    #[test]
    fn as_str_round_trips_through_from_str() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
    }

    #[test]
    fn only_douyin_has_account_hierarchy() {
        assert!(Platform::Douyin.has_account_hierarchy());
        assert!(!Platform::Tencent.has_account_hierarchy());
        assert!(!Platform::Xiaohongshu.has_account_hierarchy());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Platform::Xiaohongshu).unwrap();
        assert_eq!(json, "\"xiaohongshu\"");
    }
}
