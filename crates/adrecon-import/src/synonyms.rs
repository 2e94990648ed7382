//! Canonical fields per entity and the source headers accepted for each.
//!
//! Headers are compared after lowercasing and dropping whitespace,
//! underscores and hyphens, so `Account ID`, `account_id` and `accountid`
//! are the same header. Synonyms are tried in order and the first header
//! that matches claims the column.

use std::collections::HashMap;

use adrecon_core::EntityKind;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: &'static str,
    pub synonyms: &'static [&'static str],
    pub required: bool,
}

const fn required(field: &'static str, synonyms: &'static [&'static str]) -> FieldSpec {
    FieldSpec {
        field,
        synonyms,
        required: true,
    }
}

const fn optional(field: &'static str, synonyms: &'static [&'static str]) -> FieldSpec {
    FieldSpec {
        field,
        synonyms,
        required: false,
    }
}

const DATE: &[&str] = &["date", "日期", "时间", "day", "统计日期", "数据日期"];
const ACCOUNT_ID: &[&str] = &[
    "account_id",
    "账户ID",
    "账户id",
    "账号ID",
    "广告主ID",
    "广告账户ID",
    "advertiser id",
    "账户",
];
const COST: &[&str] = &["cost", "spend", "消耗", "花费", "消耗(元)", "花费(元)", "总花费"];
const IMPRESSIONS: &[&str] = &["impressions", "曝光量", "展示数", "曝光次数", "展现量", "views"];
const CLICKS: &[&str] = &["clicks", "点击量", "点击数", "点击次数"];
const NOTE_ID: &[&str] = &["note_id", "笔记ID", "笔记id", "内容ID"];
const TITLE: &[&str] = &["title", "标题", "笔记标题"];
const ACCOUNT_NAME: &[&str] = &["account_name", "账号名称", "账号", "博主", "作者"];
const LIKES: &[&str] = &["likes", "点赞", "点赞量", "点赞数"];
const COMMENTS: &[&str] = &["comments", "评论", "评论量", "评论数"];
const COLLECTS: &[&str] = &["collects", "收藏", "收藏量", "收藏数"];
const SHARES: &[&str] = &["shares", "分享", "分享量", "分享数"];
const FOLLOWS: &[&str] = &["follows", "关注", "新增关注", "涨粉"];

const SINGLE_TIER_SPEND: &[FieldSpec] = &[
    required("date", DATE),
    required("account_id", ACCOUNT_ID),
    optional("cost", COST),
    optional("impressions", IMPRESSIONS),
    optional("clicks", CLICKS),
];

const DOUYIN_SPEND: &[FieldSpec] = &[
    required("date", DATE),
    required(
        "main_account_id",
        &["main_account_id", "主账户ID", "主账号ID", "主账户", "母账户ID", "main account"],
    ),
    optional(
        "sub_account_id",
        &["sub_account_id", "子账户ID", "子账号ID", "子账户", "sub account", "账户ID"],
    ),
    optional("cost", COST),
    optional("impressions", IMPRESSIONS),
    optional("clicks", CLICKS),
];

const CONVERSIONS: &[FieldSpec] = &[
    required(
        "lead_date",
        &["lead_date", "线索日期", "留资日期", "留资时间", "创建时间", "日期", "date"],
    ),
    optional(
        "platform_source",
        &["platform_source", "平台", "来源平台", "渠道", "platform"],
    ),
    optional(
        "ad_account",
        &["ad_account", "广告账户", "广告账户ID", "账户ID", "account_id"],
    ),
    optional("agency", &["agency", "代理商", "代理"]),
    optional("customer_source", &["customer_source", "客户来源", "来源"]),
    optional("note_id", NOTE_ID),
    optional(
        "is_potential_customer",
        &["is_potential_customer", "是否潜客", "潜在客户", "potential customer"],
    ),
    optional(
        "is_customer_mouth",
        &["is_customer_mouth", "是否客户口", "客户口", "customer mouth"],
    ),
    optional(
        "is_valid_lead",
        &["is_valid_lead", "是否有效线索", "有效线索", "valid lead"],
    ),
    optional(
        "is_opened_account",
        &["is_opened_account", "是否开户", "开户", "opened account"],
    ),
    optional(
        "is_valid_customer",
        &["is_valid_customer", "是否有效户", "有效户", "valid customer"],
    ),
    optional("assets", &["assets", "资产", "资产(元)", "入金"]),
];

const ACCOUNT_MAPPINGS: &[FieldSpec] = &[
    required("platform", &["platform", "平台"]),
    optional(
        "account_id",
        &["account_id", "账户ID", "子账户ID", "账号ID", "广告账户ID"],
    ),
    optional("main_account_id", &["main_account_id", "主账户ID", "主账号ID"]),
    required("agency", &["agency", "代理商", "代理"]),
    optional(
        "business_model",
        &["business_model", "业务模式", "业务类型", "business model"],
    ),
];

const AGENCY_ABBREVIATIONS: &[FieldSpec] = &[
    required("abbreviation", &["abbreviation", "简称", "缩写", "code"]),
    required("full_name", &["full_name", "全称", "全名", "full name"]),
    optional("mapping_type", &["mapping_type", "类型", "映射类型", "type"]),
    optional("is_active", &["is_active", "是否启用", "启用", "active"]),
];

const NOTE_AUTHORITY: &[FieldSpec] = &[
    required("note_id", NOTE_ID),
    optional("title", TITLE),
    optional("account_name", ACCOUNT_NAME),
    optional("producer", &["producer", "制作人", "产出人", "创作者"]),
    optional("strategy", &["strategy", "策略", "内容策略"]),
    optional("publish_date", &["publish_date", "发布日期", "发布时间"]),
];

const NOTE_PAID: &[FieldSpec] = &[
    required("date", DATE),
    required("note_id", NOTE_ID),
    optional("title", TITLE),
    optional("account_name", ACCOUNT_NAME),
    optional("cost", COST),
    optional("impressions", IMPRESSIONS),
    optional("clicks", CLICKS),
    optional("likes", LIKES),
    optional("comments", COMMENTS),
    optional("collects", COLLECTS),
    optional("shares", SHARES),
    optional("follows", FOLLOWS),
];

const NOTE_TOTAL: &[FieldSpec] = &[
    required("date", DATE),
    required("note_id", NOTE_ID),
    optional("title", TITLE),
    optional("account_name", ACCOUNT_NAME),
    optional("impressions", IMPRESSIONS),
    optional("likes", LIKES),
    optional("comments", COMMENTS),
    optional("collects", COLLECTS),
    optional("shares", SHARES),
    optional("follows", FOLLOWS),
];

/// The field table for an entity.
#[must_use]
pub fn field_specs(entity: EntityKind) -> &'static [FieldSpec] {
    match entity {
        EntityKind::TencentSpend | EntityKind::XiaohongshuSpend => SINGLE_TIER_SPEND,
        EntityKind::DouyinSpend => DOUYIN_SPEND,
        EntityKind::Conversions => CONVERSIONS,
        EntityKind::AccountMappings => ACCOUNT_MAPPINGS,
        EntityKind::AgencyAbbreviations => AGENCY_ABBREVIATIONS,
        EntityKind::NoteAuthority => NOTE_AUTHORITY,
        EntityKind::NotePaid => NOTE_PAID,
        EntityKind::NoteTotal => NOTE_TOTAL,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("missing required column(s): {}", missing.join(", "))]
pub struct MissingColumns {
    pub missing: Vec<&'static str>,
}

/// Canonical field → column index for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    columns: HashMap<&'static str, usize>,
    /// Columns no field claimed, with their header text.
    unmapped: Vec<(usize, String)>,
}

impl ColumnMap {
    #[must_use]
    pub fn column(&self, field: &str) -> Option<usize> {
        self.columns.get(field).copied()
    }

    #[must_use]
    pub fn unmapped(&self) -> &[(usize, String)] {
        &self.unmapped
    }

    /// Trimmed cell for `field`; `None` when the column is absent or blank.
    #[must_use]
    pub fn cell<'a>(&self, cells: &'a [String], field: &str) -> Option<&'a str> {
        let index = self.column(field)?;
        cells
            .get(index)
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
    }
}

fn normalize_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .replace('（', "(")
        .replace('）', ")")
}

/// Resolve an entity's field table against one file's headers.
///
/// # Errors
///
/// Returns [`MissingColumns`] listing every required field no header matched.
pub fn resolve_columns(entity: EntityKind, headers: &[String]) -> Result<ColumnMap, MissingColumns> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    let mut claimed = vec![false; headers.len()];
    let mut columns = HashMap::new();
    let mut missing = Vec::new();

    for spec in field_specs(entity) {
        let hit = spec.synonyms.iter().find_map(|synonym| {
            let wanted = normalize_header(synonym);
            normalized
                .iter()
                .enumerate()
                .find(|(i, header)| !claimed[*i] && **header == wanted)
                .map(|(i, _)| i)
        });

        match hit {
            Some(index) => {
                claimed[index] = true;
                columns.insert(spec.field, index);
            }
            None if spec.required => missing.push(spec.field),
            None => {}
        }
    }

    if !missing.is_empty() {
        return Err(MissingColumns { missing });
    }

    let unmapped = headers
        .iter()
        .enumerate()
        .filter(|(i, header)| !claimed[*i] && !header.trim().is_empty())
        .map(|(i, header)| (i, header.trim().to_string()))
        .collect();

    Ok(ColumnMap { columns, unmapped })
}
