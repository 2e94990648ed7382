use std::str::FromStr;

use crate::{CoreError, Platform};

/// The kinds of file the importer accepts, one per target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    TencentSpend,
    DouyinSpend,
    XiaohongshuSpend,
    Conversions,
    AccountMappings,
    AgencyAbbreviations,
    NoteAuthority,
    NotePaid,
    NoteTotal,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::TencentSpend,
        EntityKind::DouyinSpend,
        EntityKind::XiaohongshuSpend,
        EntityKind::Conversions,
        EntityKind::AccountMappings,
        EntityKind::AgencyAbbreviations,
        EntityKind::NoteAuthority,
        EntityKind::NotePaid,
        EntityKind::NoteTotal,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::TencentSpend => "tencent-spend",
            EntityKind::DouyinSpend => "douyin-spend",
            EntityKind::XiaohongshuSpend => "xiaohongshu-spend",
            EntityKind::Conversions => "conversions",
            EntityKind::AccountMappings => "account-mappings",
            EntityKind::AgencyAbbreviations => "agency-abbreviations",
            EntityKind::NoteAuthority => "note-authority",
            EntityKind::NotePaid => "note-paid",
            EntityKind::NoteTotal => "note-total",
        }
    }

    /// The platform whose spend table this entity feeds, if it is a spend feed.
    ///
    /// Spend feeds represent ad accounts, so their imports also create
    /// placeholder mappings for accounts seen for the first time.
    #[must_use]
    pub fn spend_platform(self) -> Option<Platform> {
        match self {
            EntityKind::TencentSpend => Some(Platform::Tencent),
            EntityKind::DouyinSpend => Some(Platform::Douyin),
            EntityKind::XiaohongshuSpend => Some(Platform::Xiaohongshu),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| CoreError::UnknownEntity(s.to_string()))
    }
}
