//! Row → record conversion for every importable entity.

use adrecon_core::{
    AbbreviationRecord, AbbreviationType, ConversionRecord, MappingRecord, NoteAuthorityRecord,
    NotePaidRecord, NoteTotalRecord, Platform, SpendRecord,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::parse::{parse_bool, parse_count, parse_date, parse_money, ParseError};
use crate::reader::Table;
use crate::synonyms::ColumnMap;

/// Integer digits of the `NUMERIC(14,2)` cost columns.
const COST_DIGITS: u32 = 12;
/// Integer digits of `conversions.assets`, a `NUMERIC(16,2)`.
const ASSETS_DIGITS: u32 = 14;

/// Why one row was rejected. The rest of the file still imports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("missing required value for '{field}'")]
    MissingField { field: &'static str },
    #[error("invalid {field}: {source}")]
    InvalidField {
        field: &'static str,
        #[source]
        source: ParseError,
    },
    #[error("'{0}' is not a known platform")]
    UnknownPlatform(String),
    #[error("a mapping row needs an account id or a main account id")]
    MappingWithoutAccount,
}

/// Field accessors over one row. Optional fields that fail to parse fall
/// back to their default and leave a warning behind.
pub struct RowReader<'a> {
    columns: &'a ColumnMap,
    cells: &'a [String],
    warnings: Vec<String>,
}

impl<'a> RowReader<'a> {
    #[must_use]
    pub fn new(columns: &'a ColumnMap, cells: &'a [String]) -> Self {
        Self {
            columns,
            cells,
            warnings: Vec::new(),
        }
    }

    fn raw(&self, field: &str) -> Option<&'a str> {
        self.columns.cell(self.cells, field)
    }

    fn text(&self, field: &str) -> Option<String> {
        self.raw(field).map(str::to_string)
    }

    fn text_or_empty(&self, field: &str) -> String {
        self.text(field).unwrap_or_default()
    }

    fn required_text(&self, field: &'static str) -> Result<String, RowError> {
        self.text(field).ok_or(RowError::MissingField { field })
    }

    fn required_date(&self, field: &'static str) -> Result<NaiveDate, RowError> {
        let raw = self.raw(field).ok_or(RowError::MissingField { field })?;
        parse_date(raw).map_err(|source| RowError::InvalidField { field, source })
    }

    fn degrade<T>(&mut self, field: &str, parsed: Result<T, ParseError>, default: T) -> T {
        match parsed {
            Ok(value) => value,
            Err(ParseError::Empty) => default,
            Err(e) => {
                self.warnings.push(format!("{field}: {e}; using default"));
                default
            }
        }
    }

    fn optional_date(&mut self, field: &str) -> Option<NaiveDate> {
        let raw = self.raw(field)?;
        let parsed = parse_date(raw).map(Some);
        self.degrade(field, parsed, None)
    }

    fn count(&mut self, field: &str) -> i64 {
        match self.raw(field) {
            Some(raw) => self.degrade(field, parse_count(raw), 0),
            None => 0,
        }
    }

    fn money(&mut self, field: &str, integer_digits: u32) -> Decimal {
        match self.raw(field) {
            Some(raw) => self.degrade(field, parse_money(raw, integer_digits), Decimal::ZERO),
            None => Decimal::ZERO,
        }
    }

    fn flag_or(&mut self, field: &str, default: bool) -> bool {
        match self.raw(field) {
            Some(raw) => self.degrade(field, parse_bool(raw), default),
            None => default,
        }
    }

    fn flag(&mut self, field: &str) -> bool {
        self.flag_or(field, false)
    }

    #[must_use]
    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }
}

/// A record that parsed, with its source line and any degraded-field notes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow<R> {
    pub line: usize,
    pub record: R,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub line: usize,
    pub error: RowError,
}

/// Parse every data row of `table` with `parse`, splitting successes from
/// row-level failures.
pub fn parse_rows<R, F>(
    table: &Table,
    columns: &ColumnMap,
    mut parse: F,
) -> (Vec<ParsedRow<R>>, Vec<RowFailure>)
where
    F: FnMut(&mut RowReader<'_>) -> Result<R, RowError>,
{
    let mut parsed = Vec::with_capacity(table.rows.len());
    let mut failures = Vec::new();

    for row in &table.rows {
        let mut reader = RowReader::new(columns, &row.cells);
        match parse(&mut reader) {
            Ok(record) => parsed.push(ParsedRow {
                line: row.line,
                record,
                warnings: reader.into_warnings(),
            }),
            Err(error) => failures.push(RowFailure {
                line: row.line,
                error,
            }),
        }
    }

    (parsed, failures)
}

/// # Errors
///
/// Returns [`RowError`] when the date or account is missing or the date is
/// unparseable.
pub fn parse_spend(platform: Platform, row: &mut RowReader<'_>) -> Result<SpendRecord, RowError> {
    let date = row.required_date("date")?;
    let (account_id, sub_account_id) = if platform.has_account_hierarchy() {
        (
            row.required_text("main_account_id")?,
            row.text("sub_account_id"),
        )
    } else {
        (row.required_text("account_id")?, None)
    };

    Ok(SpendRecord {
        platform,
        date,
        account_id,
        sub_account_id,
        cost: row.money("cost", COST_DIGITS),
        impressions: row.count("impressions"),
        clicks: row.count("clicks"),
    })
}

/// Parse a conversion row. Columns without a canonical field are kept in
/// `extra` keyed by their header.
///
/// # Errors
///
/// Returns [`RowError`] when the lead date is missing or unparseable.
pub fn parse_conversion(row: &mut RowReader<'_>) -> Result<ConversionRecord, RowError> {
    let lead_date = row.required_date("lead_date")?;

    let platform_source = row
        .raw("platform_source")
        .map(|raw| {
            Platform::from_label(raw).map_or_else(|| raw.to_string(), |p| p.as_str().to_string())
        })
        .unwrap_or_default();

    let extra: serde_json::Map<String, serde_json::Value> = row
        .columns
        .unmapped()
        .iter()
        .filter_map(|(index, header)| {
            row.cells
                .get(*index)
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(|value| (header.clone(), serde_json::Value::String(value.to_string())))
        })
        .collect();

    Ok(ConversionRecord {
        lead_date,
        platform_source,
        ad_account: row.text_or_empty("ad_account"),
        agency: row.text_or_empty("agency"),
        customer_source: row.text_or_empty("customer_source"),
        note_id: row.text("note_id"),
        is_potential_customer: row.flag("is_potential_customer"),
        is_customer_mouth: row.flag("is_customer_mouth"),
        is_valid_lead: row.flag("is_valid_lead"),
        is_opened_account: row.flag("is_opened_account"),
        is_valid_customer: row.flag("is_valid_customer"),
        assets: row.money("assets", ASSETS_DIGITS),
        extra: serde_json::Value::Object(extra),
    })
}

/// # Errors
///
/// Returns [`RowError`] for an unknown platform, a missing agency, or a row
/// with neither account id.
pub fn parse_mapping(row: &mut RowReader<'_>) -> Result<MappingRecord, RowError> {
    let raw_platform = row.required_text("platform")?;
    let platform =
        Platform::from_label(&raw_platform).ok_or(RowError::UnknownPlatform(raw_platform))?;

    let account_id = row.text("account_id");
    let main_account_id = row.text("main_account_id");
    if account_id.is_none() && main_account_id.is_none() {
        return Err(RowError::MappingWithoutAccount);
    }

    Ok(MappingRecord {
        platform,
        account_id,
        main_account_id,
        agency: row.required_text("agency")?,
        business_model: row.text_or_empty("business_model"),
    })
}

/// Mapping type defaults to `agency` and the active flag to `true` when
/// their columns are absent.
///
/// # Errors
///
/// Returns [`RowError::MissingField`] when the code or full name is blank.
pub fn parse_abbreviation(row: &mut RowReader<'_>) -> Result<AbbreviationRecord, RowError> {
    let abbreviation = row.required_text("abbreviation")?;
    let full_name = row.required_text("full_name")?;

    let mapping_type = match row.raw("mapping_type") {
        None => AbbreviationType::Agency,
        Some(raw) => AbbreviationType::from_label(raw).unwrap_or_else(|| {
            row.warnings
                .push(format!("mapping_type: '{raw}' is not agency or platform; using agency"));
            AbbreviationType::Agency
        }),
    };

    Ok(AbbreviationRecord {
        abbreviation,
        full_name,
        mapping_type,
        is_active: row.flag_or("is_active", true),
    })
}

/// # Errors
///
/// Returns [`RowError::MissingField`] when the note id is blank.
pub fn parse_note_authority(row: &mut RowReader<'_>) -> Result<NoteAuthorityRecord, RowError> {
    Ok(NoteAuthorityRecord {
        note_id: row.required_text("note_id")?,
        title: row.text("title"),
        account_name: row.text("account_name"),
        producer: row.text("producer"),
        strategy: row.text("strategy"),
        publish_date: row.optional_date("publish_date"),
    })
}

/// # Errors
///
/// Returns [`RowError`] when the date or note id is missing, or the date is
/// unparseable.
pub fn parse_note_paid(row: &mut RowReader<'_>) -> Result<NotePaidRecord, RowError> {
    Ok(NotePaidRecord {
        date: row.required_date("date")?,
        note_id: row.required_text("note_id")?,
        title: row.text("title"),
        account_name: row.text("account_name"),
        cost: row.money("cost", COST_DIGITS),
        impressions: row.count("impressions"),
        clicks: row.count("clicks"),
        likes: row.count("likes"),
        comments: row.count("comments"),
        collects: row.count("collects"),
        shares: row.count("shares"),
        follows: row.count("follows"),
    })
}

/// # Errors
///
/// Returns [`RowError`] when the date or note id is missing, or the date is
/// unparseable.
pub fn parse_note_total(row: &mut RowReader<'_>) -> Result<NoteTotalRecord, RowError> {
    Ok(NoteTotalRecord {
        date: row.required_date("date")?,
        note_id: row.required_text("note_id")?,
        title: row.text("title"),
        account_name: row.text("account_name"),
        impressions: row.count("impressions"),
        likes: row.count("likes"),
        comments: row.count("comments"),
        collects: row.count("collects"),
        shares: row.count("shares"),
        follows: row.count("follows"),
    })
}

#[cfg(test)]
mod tests {
    use adrecon_core::EntityKind;

    use super::*;
    use crate::reader::TableRow;
    use crate::synonyms::resolve_columns;

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        Table {
            headers: headers.iter().map(|h| (*h).to_string()).collect(),
            rows: rows
                .iter()
                .enumerate()
                .map(|(i, cells)| TableRow {
                    line: i + 2,
                    cells: cells.iter().map(|c| (*c).to_string()).collect(),
                })
                .collect(),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn empty_lead_date_fails_only_that_row() {
        let table = table(
            &["线索日期", "平台", "广告账户", "是否有效线索"],
            &[
                &["2024-03-01", "抖音", "S1", "是"],
                &["", "抖音", "S2", "否"],
                &["2024-03-02", "小红书", "X1", "1"],
            ],
        );
        let columns = resolve_columns(EntityKind::Conversions, &table.headers).unwrap();

        let (parsed, failures) = parse_rows(&table, &columns, parse_conversion);

        assert_eq!(parsed.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].line, 3);
        assert_eq!(
            failures[0].error,
            RowError::MissingField { field: "lead_date" }
        );
        assert_eq!(parsed[0].record.platform_source, "douyin");
        assert!(parsed[0].record.is_valid_lead);
        assert_eq!(parsed[1].record.platform_source, "xiaohongshu");
    }

    #[test]
    fn unparseable_date_is_a_row_error() {
        let table = table(&["日期", "账户ID"], &[&["not a date", "A1"]]);
        let columns = resolve_columns(EntityKind::TencentSpend, &table.headers).unwrap();

        let (parsed, failures) =
            parse_rows(&table, &columns, |row| parse_spend(Platform::Tencent, row));

        assert!(parsed.is_empty());
        assert!(matches!(
            failures[0].error,
            RowError::InvalidField { field: "date", .. }
        ));
    }

    #[test]
    fn bad_optional_values_degrade_to_defaults_with_warnings() {
        let table = table(
            &["日期", "账户ID", "消耗", "点击量"],
            &[&["2024-03-01", "A1", "lots", "1,200"]],
        );
        let columns = resolve_columns(EntityKind::XiaohongshuSpend, &table.headers).unwrap();

        let (parsed, _) =
            parse_rows(&table, &columns, |row| parse_spend(Platform::Xiaohongshu, row));

        let row = &parsed[0];
        assert_eq!(row.record.cost, Decimal::ZERO);
        assert_eq!(row.record.clicks, 1200);
        assert_eq!(row.record.impressions, 0);
        assert_eq!(row.warnings.len(), 1);
        assert!(row.warnings[0].starts_with("cost:"));
    }

    #[test]
    fn money_too_large_for_its_column_degrades_to_zero() {
        let table = table(
            &["日期", "账户ID", "消耗"],
            &[&["2024-03-01", "A1", "10"], &["2024-03-01", "A2", "1e13"]],
        );
        let columns = resolve_columns(EntityKind::TencentSpend, &table.headers).unwrap();

        let (parsed, failures) =
            parse_rows(&table, &columns, |row| parse_spend(Platform::Tencent, row));

        assert!(failures.is_empty());
        assert_eq!(parsed[0].record.cost, Decimal::new(10, 0));
        assert_eq!(parsed[1].record.cost, Decimal::ZERO);
        assert!(parsed[1].warnings[0].contains("out of range"));

        let leads = table_with_assets("1e13");
        let columns = resolve_columns(EntityKind::Conversions, &leads.headers).unwrap();
        let (parsed, _) = parse_rows(&leads, &columns, parse_conversion);
        assert_eq!(parsed[0].record.assets, Decimal::new(10_000_000_000_000, 0));
        assert!(parsed[0].warnings.is_empty());
    }

    fn table_with_assets(assets: &str) -> Table {
        table(&["线索日期", "资产"], &[&["2024-03-01", assets]])
    }

    #[test]
    fn douyin_spend_keeps_main_and_sub_accounts() {
        let table = table(
            &["日期", "主账户ID", "子账户ID", "消耗"],
            &[&["20240301", "M1", "", "10"], &["20240301", "M1", "S1", "5"]],
        );
        let columns = resolve_columns(EntityKind::DouyinSpend, &table.headers).unwrap();

        let (parsed, failures) =
            parse_rows(&table, &columns, |row| parse_spend(Platform::Douyin, row));

        assert!(failures.is_empty());
        assert_eq!(parsed[0].record.date, day(1));
        assert_eq!(parsed[0].record.account_id, "M1");
        assert_eq!(parsed[0].record.sub_account_id, None);
        assert_eq!(parsed[1].record.sub_account_id.as_deref(), Some("S1"));
    }

    #[test]
    fn unmapped_conversion_columns_land_in_extra() {
        let table = table(
            &["线索日期", "城市", "销售"],
            &[&["2024-03-01", "上海", ""]],
        );
        let columns = resolve_columns(EntityKind::Conversions, &table.headers).unwrap();

        let (parsed, _) = parse_rows(&table, &columns, parse_conversion);

        assert_eq!(
            parsed[0].record.extra,
            serde_json::json!({ "城市": "上海" })
        );
        assert_eq!(parsed[0].record.platform_source, "");
    }

    #[test]
    fn mapping_rows_need_a_known_platform_and_an_account() {
        let table = table(
            &["平台", "账户ID", "主账户ID", "代理商"],
            &[
                &["巨量引擎", "S1", "M1", "Agency A"],
                &["myspace", "A1", "", "Agency B"],
                &["小红书", "", "", "Agency C"],
                &["抖音", "", "M2", "直客"],
            ],
        );
        let columns = resolve_columns(EntityKind::AccountMappings, &table.headers).unwrap();

        let (parsed, failures) = parse_rows(&table, &columns, parse_mapping);

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].record.platform, Platform::Douyin);
        assert_eq!(parsed[1].record.account_id, None);
        assert_eq!(parsed[1].record.main_account_id.as_deref(), Some("M2"));
        assert_eq!(
            failures.iter().map(|f| f.error.clone()).collect::<Vec<_>>(),
            vec![
                RowError::UnknownPlatform("myspace".to_string()),
                RowError::MappingWithoutAccount,
            ]
        );
    }

    #[test]
    fn abbreviations_default_to_active_agency_codes() {
        let table = table(&["简称", "全称"], &[&["XM", "Xingmeng Media"]]);
        let columns = resolve_columns(EntityKind::AgencyAbbreviations, &table.headers).unwrap();

        let (parsed, _) = parse_rows(&table, &columns, parse_abbreviation);

        assert_eq!(parsed[0].record.mapping_type, AbbreviationType::Agency);
        assert!(parsed[0].record.is_active);
    }

    #[test]
    fn note_rows_parse_engagement_counts() {
        let table = table(
            &["日期", "笔记ID", "展现量", "点赞", "收藏"],
            &[&["2024-03-01", "N1", "1,000", "12", "x"]],
        );
        let columns = resolve_columns(EntityKind::NoteTotal, &table.headers).unwrap();

        let (parsed, _) = parse_rows(&table, &columns, parse_note_total);

        let record = &parsed[0].record;
        assert_eq!(record.impressions, 1000);
        assert_eq!(record.likes, 12);
        assert_eq!(record.collects, 0);
        assert_eq!(parsed[0].warnings.len(), 1);
    }
}
