//! The import run: read, resolve headers, parse, de-duplicate, write.
//!
//! Rows are written in batches, one transaction per batch. A failed batch is
//! rolled back and its rows counted as failed; the next batch starts clean.
//! A conversion overwrite is written as one batch.
//! Only whole-file problems (unreadable file, missing columns) abort.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use adrecon_core::{
    AppConfig, ConversionRecord, EntityKind, MappingIndex, MappingKey, MappingRecord, NaturalKey,
    Platform, SpendRecord, UNASSIGNED_AGENCY,
};
use adrecon_db::{
    delete_conversions_on_dates, insert_placeholder_mapping, load_mapping_index, write_record,
    KeyCache, Persist, WriteOutcome,
};
use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};

use crate::dedupe::dedupe_by_key;
use crate::entities::{
    parse_abbreviation, parse_conversion, parse_mapping, parse_note_authority, parse_note_paid,
    parse_note_total, parse_rows, parse_spend, ParsedRow, RowFailure,
};
use crate::reader::{read_table, Table};
use crate::synonyms::{resolve_columns, ColumnMap};

const DEFAULT_BATCH_SIZE: usize = 500;
const DEFAULT_PRELOAD_THRESHOLD: usize = 200;
const DEFAULT_MAX_ERRORS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub preload_threshold: usize,
    pub max_errors: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            preload_threshold: DEFAULT_PRELOAD_THRESHOLD,
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }
}

impl ImportSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.import_batch_size.max(1),
            preload_threshold: config.import_preload_threshold,
            max_errors: config.import_max_errors,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub path: PathBuf,
    pub entity: EntityKind,
    /// Replace non-key fields of rows that already exist instead of skipping
    /// them. For conversions, replace every lead on the file's dates in a
    /// single transaction.
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Completed,
    /// Finished, but some rows or batches failed.
    CompletedWithErrors,
    /// A whole-file problem stopped the import before anything was written.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub entity: EntityKind,
    pub status: ImportStatus,
    pub fatal_error: Option<String>,
    pub total_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Rows collapsed into a later row with the same natural key.
    pub deduplicated: usize,
    pub placeholders_created: usize,
    /// Conversions deleted before an overwrite re-import.
    pub conversions_replaced: u64,
    /// First `max_errors` error messages.
    pub errors: Vec<String>,
    pub error_count: usize,
    pub warnings: Vec<String>,
    pub warning_count: usize,
    max_messages: usize,
}

impl ImportReport {
    fn new(entity: EntityKind, max_messages: usize) -> Self {
        Self {
            entity,
            status: ImportStatus::Completed,
            fatal_error: None,
            total_rows: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            deduplicated: 0,
            placeholders_created: 0,
            conversions_replaced: 0,
            errors: Vec::new(),
            error_count: 0,
            warnings: Vec::new(),
            warning_count: 0,
            max_messages,
        }
    }

    fn push_error(&mut self, message: String) {
        self.error_count += 1;
        if self.errors.len() < self.max_messages {
            self.errors.push(message);
        }
    }

    fn push_warning(&mut self, message: String) {
        self.warning_count += 1;
        if self.warnings.len() < self.max_messages {
            self.warnings.push(message);
        }
    }

    fn abort(mut self, message: String) -> Self {
        tracing::error!(entity = %self.entity, error = %message, "import aborted");
        self.status = ImportStatus::Aborted;
        self.fatal_error = Some(message);
        self
    }

    fn finish(mut self) -> Self {
        self.status = if self.failed > 0 || self.error_count > 0 {
            ImportStatus::CompletedWithErrors
        } else {
            ImportStatus::Completed
        };
        self
    }

    /// Rows that reached the database, whether written or skipped.
    #[must_use]
    pub fn records_processed(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.status == ImportStatus::Aborted
    }
}

/// Import one file. Never returns an error: whole-file failures come back
/// as an [`ImportStatus::Aborted`] report with `fatal_error` set.
pub async fn run_import(
    pool: &PgPool,
    request: &ImportRequest,
    settings: &ImportSettings,
) -> ImportReport {
    let report = ImportReport::new(request.entity, settings.max_errors);
    tracing::info!(
        entity = %request.entity,
        path = %request.path.display(),
        overwrite = request.overwrite,
        "starting import"
    );

    let table = match read_table(&request.path) {
        Ok(table) => table,
        Err(e) => return report.abort(e.to_string()),
    };
    let columns = match resolve_columns(request.entity, &table.headers) {
        Ok(columns) => columns,
        Err(e) => return report.abort(e.to_string()),
    };

    let ctx = ImportContext {
        pool,
        settings,
        overwrite: request.overwrite,
    };
    let mut report = report;
    report.total_rows = table.rows.len();

    let report = if let Some(platform) = request.entity.spend_platform() {
        import_spend(&ctx, platform, &table, &columns, report).await
    } else {
        match request.entity {
            EntityKind::Conversions => import_conversions(&ctx, &table, &columns, report).await,
            EntityKind::AccountMappings => {
                let (parsed, failures) = parse_rows(&table, &columns, parse_mapping);
                write_all(&ctx, parsed, failures, &mut NoHook, report).await
            }
            EntityKind::AgencyAbbreviations => {
                let (parsed, failures) = parse_rows(&table, &columns, parse_abbreviation);
                write_all(&ctx, parsed, failures, &mut NoHook, report).await
            }
            EntityKind::NoteAuthority => {
                let (parsed, failures) = parse_rows(&table, &columns, parse_note_authority);
                write_all(&ctx, parsed, failures, &mut NoHook, report).await
            }
            EntityKind::NotePaid => {
                let (parsed, failures) = parse_rows(&table, &columns, parse_note_paid);
                write_all(&ctx, parsed, failures, &mut NoHook, report).await
            }
            EntityKind::NoteTotal => {
                let (parsed, failures) = parse_rows(&table, &columns, parse_note_total);
                write_all(&ctx, parsed, failures, &mut NoHook, report).await
            }
            EntityKind::TencentSpend | EntityKind::DouyinSpend | EntityKind::XiaohongshuSpend => {
                report
            }
        }
    };

    if report.is_aborted() {
        return report;
    }

    let report = report.finish();
    tracing::info!(
        entity = %report.entity,
        inserted = report.inserted,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        deduplicated = report.deduplicated,
        placeholders = report.placeholders_created,
        "import finished"
    );
    report
}

struct ImportContext<'a> {
    pool: &'a PgPool,
    settings: &'a ImportSettings,
    overwrite: bool,
}

async fn import_spend(
    ctx: &ImportContext<'_>,
    platform: Platform,
    table: &Table,
    columns: &ColumnMap,
    report: ImportReport,
) -> ImportReport {
    let index = match load_mapping_index(ctx.pool).await {
        Ok(index) => index,
        Err(e) => return report.abort(format!("failed to load account mappings: {e}")),
    };

    let (parsed, failures) = parse_rows(table, columns, |row| parse_spend(platform, row));
    let mut hook = PlaceholderHook::new(index);
    let mut report = write_all(ctx, parsed, failures, &mut hook, report).await;
    report.placeholders_created = hook.created;
    report
}

async fn import_conversions(
    ctx: &ImportContext<'_>,
    table: &Table,
    columns: &ColumnMap,
    report: ImportReport,
) -> ImportReport {
    let (parsed, failures) = parse_rows(table, columns, parse_conversion);

    if !ctx.overwrite {
        return write_all(ctx, parsed, failures, &mut NoHook, report).await;
    }

    // The delete and every insert share one transaction: either the file's
    // dates are fully replaced or the existing leads stay untouched.
    let settings = ImportSettings {
        batch_size: usize::MAX,
        ..*ctx.settings
    };
    let ctx = ImportContext {
        settings: &settings,
        ..*ctx
    };
    let mut hook = ReplaceDatesHook::new(&parsed);
    let mut report = write_all(&ctx, parsed, failures, &mut hook, report).await;
    report.conversions_replaced = hook.replaced;
    if hook.replaced > 0 {
        tracing::info!(
            dates = hook.dates.len(),
            deleted = hook.replaced,
            "replaced conversions for re-import"
        );
    }
    report
}

// ---------------------------------------------------------------------------
// Batch writer
// ---------------------------------------------------------------------------

/// Per-row side effect run inside the row's batch transaction.
#[allow(async_fn_in_trait)]
trait RowHook<R> {
    /// Returns a warning to report once the batch commits.
    async fn after_write(
        &mut self,
        conn: &mut PgConnection,
        record: &R,
        line: usize,
    ) -> Result<Option<String>, sqlx::Error>;

    /// Runs in the batch transaction before any row is written.
    async fn before_batch(
        &mut self,
        _conn: &mut PgConnection,
        _rows: &[ParsedRow<R>],
    ) -> Result<(), sqlx::Error> {
        Ok(())
    }

    fn batch_committed(&mut self) {}

    fn batch_rolled_back(&mut self) {}
}

struct NoHook;

impl<R> RowHook<R> for NoHook {
    async fn after_write(
        &mut self,
        _conn: &mut PgConnection,
        _record: &R,
        _line: usize,
    ) -> Result<Option<String>, sqlx::Error> {
        Ok(None)
    }
}

/// Deletes the existing conversions on every lead date the file covers,
/// inside the transaction that inserts the replacements.
struct ReplaceDatesHook {
    dates: Vec<NaiveDate>,
    pending: u64,
    replaced: u64,
}

impl ReplaceDatesHook {
    fn new(rows: &[ParsedRow<ConversionRecord>]) -> Self {
        let dates: BTreeSet<NaiveDate> = rows.iter().map(|row| row.record.lead_date).collect();
        Self {
            dates: dates.into_iter().collect(),
            pending: 0,
            replaced: 0,
        }
    }
}

impl RowHook<ConversionRecord> for ReplaceDatesHook {
    async fn before_batch(
        &mut self,
        conn: &mut PgConnection,
        _rows: &[ParsedRow<ConversionRecord>],
    ) -> Result<(), sqlx::Error> {
        self.pending = delete_conversions_on_dates(conn, &self.dates).await?;
        Ok(())
    }

    async fn after_write(
        &mut self,
        _conn: &mut PgConnection,
        _record: &ConversionRecord,
        _line: usize,
    ) -> Result<Option<String>, sqlx::Error> {
        Ok(None)
    }

    fn batch_committed(&mut self) {
        self.replaced += self.pending;
        self.pending = 0;
    }

    fn batch_rolled_back(&mut self) {
        self.pending = 0;
    }
}

/// Creates an `unassigned` mapping for every spend account no mapping rule
/// resolves, so operators can find and assign it later.
struct PlaceholderHook {
    index: MappingIndex,
    pending: Vec<(MappingRecord, bool)>,
    pending_keys: HashSet<MappingKey>,
    created: usize,
}

impl PlaceholderHook {
    fn new(index: MappingIndex) -> Self {
        Self {
            index,
            pending: Vec::new(),
            pending_keys: HashSet::new(),
            created: 0,
        }
    }
}

/// The mapping row that would resolve `record` through the first rule the
/// resolver tries for it.
fn placeholder_for(record: &SpendRecord) -> MappingRecord {
    let (account_id, main_account_id) = if record.platform.has_account_hierarchy() {
        match record.sub_account_id.as_deref().map(str::trim) {
            Some(sub) if !sub.is_empty() => {
                (Some(sub.to_string()), Some(record.account_id.clone()))
            }
            _ => (None, Some(record.account_id.clone())),
        }
    } else {
        (Some(record.account_id.clone()), None)
    };

    MappingRecord {
        platform: record.platform,
        account_id,
        main_account_id,
        agency: UNASSIGNED_AGENCY.to_string(),
        business_model: String::new(),
    }
}

impl RowHook<SpendRecord> for PlaceholderHook {
    async fn after_write(
        &mut self,
        conn: &mut PgConnection,
        record: &SpendRecord,
        line: usize,
    ) -> Result<Option<String>, sqlx::Error> {
        if self
            .index
            .lookup_account(
                record.platform,
                &record.account_id,
                record.sub_account_id.as_deref(),
            )
            .is_some()
        {
            return Ok(None);
        }

        let placeholder = placeholder_for(record);
        let Some(key) = placeholder.natural_key() else {
            return Ok(None);
        };
        if self.pending_keys.contains(&key) {
            return Ok(None);
        }

        let inserted = insert_placeholder_mapping(conn, &placeholder).await?;
        self.pending_keys.insert(key);

        let account = placeholder
            .account_id
            .as_deref()
            .or(placeholder.main_account_id.as_deref())
            .unwrap_or_default()
            .to_string();
        self.pending.push((placeholder, inserted));

        Ok(inserted.then(|| {
            format!(
                "line {line}: {} account '{account}' has no mapping; created one with agency \
                 '{UNASSIGNED_AGENCY}' for manual follow-up",
                record.platform
            )
        }))
    }

    fn batch_committed(&mut self) {
        for (mapping, inserted) in self.pending.drain(..) {
            self.index.insert_mapping(&mapping);
            if inserted {
                self.created += 1;
            }
        }
        self.pending_keys.clear();
    }

    fn batch_rolled_back(&mut self) {
        self.pending.clear();
        self.pending_keys.clear();
    }
}

#[derive(Debug, Default)]
struct BatchCounts {
    inserted: usize,
    updated: usize,
    skipped: usize,
    warnings: Vec<String>,
}

async fn write_all<R, H>(
    ctx: &ImportContext<'_>,
    parsed: Vec<ParsedRow<R>>,
    failures: Vec<RowFailure>,
    hook: &mut H,
    mut report: ImportReport,
) -> ImportReport
where
    R: Persist,
    H: RowHook<R>,
{
    report.failed += failures.len();
    for failure in failures {
        report.push_error(format!("line {}: {}", failure.line, failure.error));
    }
    for row in &parsed {
        for warning in &row.warnings {
            report.push_warning(format!("line {}: {warning}", row.line));
        }
    }

    let (rows, dropped) = dedupe_by_key(parsed);
    report.deduplicated = dropped;
    if rows.is_empty() {
        return report;
    }

    let mut cache = build_key_cache(ctx, &rows, &mut report).await;

    for (batch_no, chunk) in rows.chunks(ctx.settings.batch_size.max(1)).enumerate() {
        let first_line = chunk.first().map_or(0, |r| r.line);
        let last_line = chunk.last().map_or(0, |r| r.line);

        match write_batch(ctx.pool, &mut cache, chunk, ctx.overwrite, hook).await {
            Ok(counts) => {
                hook.batch_committed();
                report.inserted += counts.inserted;
                report.updated += counts.updated;
                report.skipped += counts.skipped;
                for warning in counts.warnings {
                    tracing::warn!(entity = %report.entity, "{warning}");
                    report.push_warning(warning);
                }
            }
            Err(e) => {
                hook.batch_rolled_back();
                let keys: Vec<R::Key> = chunk.iter().filter_map(|r| r.record.natural_key()).collect();
                cache.forget(&keys);
                tracing::warn!(
                    entity = %report.entity,
                    batch = batch_no + 1,
                    error = %e,
                    "batch rolled back"
                );
                report.failed += chunk.len();
                report.push_error(format!(
                    "batch {} (lines {first_line}-{last_line}) rolled back: {e}",
                    batch_no + 1
                ));
            }
        }
    }

    report
}

async fn build_key_cache<R: Persist>(
    ctx: &ImportContext<'_>,
    rows: &[ParsedRow<R>],
    report: &mut ImportReport,
) -> KeyCache<R::Key> {
    let keys: Vec<R::Key> = rows.iter().filter_map(|r| r.record.natural_key()).collect();
    if keys.len() <= ctx.settings.preload_threshold {
        return KeyCache::PerRow;
    }

    match preload_keys::<R>(ctx.pool, &keys).await {
        Ok(found) => {
            tracing::debug!(keys = keys.len(), existing = found.len(), "pre-loaded natural keys");
            KeyCache::Preloaded(found)
        }
        Err(e) => {
            report.push_warning(format!(
                "could not pre-load existing keys ({e}); looking rows up one at a time"
            ));
            KeyCache::PerRow
        }
    }
}

async fn preload_keys<R: Persist>(
    pool: &PgPool,
    keys: &[R::Key],
) -> Result<HashMap<R::Key, i64>, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    R::preload(&mut *conn, keys).await
}

async fn write_batch<R, H>(
    pool: &PgPool,
    cache: &mut KeyCache<R::Key>,
    rows: &[ParsedRow<R>],
    overwrite: bool,
    hook: &mut H,
) -> Result<BatchCounts, sqlx::Error>
where
    R: Persist,
    H: RowHook<R>,
{
    let mut tx = pool.begin().await?;
    let mut counts = BatchCounts::default();

    // An early return drops `tx`, which rolls the batch back.
    hook.before_batch(&mut *tx, rows).await?;
    for row in rows {
        match write_record(&mut *tx, cache, &row.record, overwrite).await? {
            WriteOutcome::Inserted => counts.inserted += 1,
            WriteOutcome::Updated => counts.updated += 1,
            WriteOutcome::Skipped => counts.skipped += 1,
        }
        if let Some(warning) = hook.after_write(&mut *tx, &row.record, row.line).await? {
            counts.warnings.push(warning);
        }
    }

    tx.commit().await?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn spend(platform: Platform, account: &str, sub: Option<&str>) -> SpendRecord {
        SpendRecord {
            platform,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            account_id: account.to_string(),
            sub_account_id: sub.map(str::to_string),
            cost: Decimal::ZERO,
            impressions: 0,
            clicks: 0,
        }
    }

    #[test]
    fn placeholder_for_sub_account_keys_by_sub_under_main() {
        let mapping = placeholder_for(&spend(Platform::Douyin, "M1", Some("S1")));
        assert_eq!(mapping.account_id.as_deref(), Some("S1"));
        assert_eq!(mapping.main_account_id.as_deref(), Some("M1"));
        assert_eq!(mapping.agency, UNASSIGNED_AGENCY);
    }

    #[test]
    fn placeholder_for_main_only_row_is_a_direct_buy_entry() {
        let mapping = placeholder_for(&spend(Platform::Douyin, "M1", None));
        assert_eq!(mapping.account_id, None);
        assert_eq!(mapping.main_account_id.as_deref(), Some("M1"));
    }

    #[test]
    fn placeholder_for_single_tier_keys_by_account() {
        let mapping = placeholder_for(&spend(Platform::Tencent, "A1", None));
        assert_eq!(mapping.account_id.as_deref(), Some("A1"));
        assert_eq!(mapping.main_account_id, None);
    }

    #[test]
    fn placeholders_resolve_once_committed() {
        let mut hook = PlaceholderHook::new(MappingIndex::default());
        let record = spend(Platform::Douyin, "M1", Some("S1"));
        hook.pending.push((placeholder_for(&record), true));
        hook.batch_committed();

        assert_eq!(hook.created, 1);
        assert_eq!(
            hook.index
                .resolve_account(Platform::Douyin, "M1", Some("S1"))
                .agency,
            UNASSIGNED_AGENCY
        );
    }

    #[test]
    fn rolled_back_placeholders_are_forgotten() {
        let mut hook = PlaceholderHook::new(MappingIndex::default());
        let record = spend(Platform::Tencent, "A1", None);
        hook.pending.push((placeholder_for(&record), true));
        hook.batch_rolled_back();
        hook.batch_committed();

        assert_eq!(hook.created, 0);
        assert!(hook
            .index
            .lookup_account(Platform::Tencent, "A1", None)
            .is_none());
    }

    fn lead(day: u32, line: usize) -> ParsedRow<ConversionRecord> {
        ParsedRow {
            line,
            record: ConversionRecord {
                lead_date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
                platform_source: "tencent".to_string(),
                ad_account: "A1".to_string(),
                agency: String::new(),
                customer_source: String::new(),
                note_id: None,
                is_potential_customer: false,
                is_customer_mouth: false,
                is_valid_lead: false,
                is_opened_account: false,
                is_valid_customer: false,
                assets: Decimal::ZERO,
                extra: serde_json::json!({}),
            },
            warnings: Vec::new(),
        }
    }

    #[test]
    fn replaced_dates_are_distinct_and_sorted() {
        let hook = ReplaceDatesHook::new(&[lead(2, 2), lead(1, 3), lead(2, 4)]);
        assert_eq!(
            hook.dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            ]
        );
    }

    #[test]
    fn replaced_count_only_includes_committed_deletes() {
        let mut hook = ReplaceDatesHook::new(&[lead(1, 2)]);
        hook.pending = 4;
        hook.batch_rolled_back();
        hook.batch_committed();
        assert_eq!(hook.replaced, 0);

        hook.pending = 2;
        hook.batch_committed();
        assert_eq!(hook.replaced, 2);
    }

    #[test]
    fn report_caps_messages_but_counts_all() {
        let mut report = ImportReport::new(EntityKind::Conversions, 2);
        for i in 0..5 {
            report.push_error(format!("error {i}"));
        }
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.error_count, 5);

        let report = report.finish();
        assert_eq!(report.status, ImportStatus::CompletedWithErrors);
    }

    #[test]
    fn clean_report_completes() {
        let mut report = ImportReport::new(EntityKind::NotePaid, 50);
        report.inserted = 3;
        let report = report.finish();
        assert_eq!(report.status, ImportStatus::Completed);
        assert_eq!(report.records_processed(), 3);
    }

    #[test]
    fn settings_never_use_a_zero_batch() {
        let settings = ImportSettings::default();
        assert_eq!(settings.batch_size, 500);
        assert_eq!(settings.preload_threshold, 200);
        assert_eq!(settings.max_errors, 50);
    }
}
