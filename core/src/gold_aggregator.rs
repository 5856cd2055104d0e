//! Gold aggregator: folds classified transfers into per-account-per-day
//! buckets and a per-day per-anomaly-type summary.
//!
//! RULE: gold rows are frozen once written.
//! Every day present in silver is recomputed from its full population on
//! every run, and each row is inserted only if its key is absent. A key
//! that already exists (in either bucket) is reported as skipped.
//!
//! The folds are pure functions of the day's rows and the catalog; only
//! `materialize` touches the store.
//!
//! Only IDR transfers are aggregated. The summary key has no currency
//! column, so a row in any other currency is rejected before folding,
//! along with any silver row that does not decode.

use crate::{
    cancel::CancelToken,
    criteria::{AnomalyLevel, CriteriaCatalog, NORMAL_TYPE},
    error::PipelineResult,
    event::PipelineEvent,
    model::{ClassifiedTransaction, DebitCredit},
    stage::{Layer, PipelineStage, StageReport},
    store::{GoldLayer, PipelineStore, SilverLayer},
    types::{AccountNumber, Amount, DEFAULT_CURRENCY},
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GoldBucket {
    Normal,
    Abnormal,
}

impl GoldBucket {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Normal => "transactions_normal",
            Self::Abnormal => "transactions_abnormal",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::Normal => Self::Abnormal,
            Self::Abnormal => Self::Normal,
        }
    }
}

/// One sender account's activity on one day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountDayRecord {
    /// Surrogate key (uuid v4). The natural key is (account_number, trx_date).
    pub id: String,
    pub account_number: AccountNumber,
    pub trx_date: NaiveDate,
    pub total_trx: i64,
    pub total_amount: Amount,
    pub total_debit: Amount,
    pub total_credit: Amount,
    pub failed_trx: i64,
    pub anomaly_trx: i64,
    pub created_at: NaiveDateTime,
}

impl AccountDayRecord {
    pub fn bucket(&self) -> GoldBucket {
        if self.anomaly_trx > 0 {
            GoldBucket::Abnormal
        } else {
            GoldBucket::Normal
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryRecord {
    pub trx_date: NaiveDate,
    /// Criterion name, or "normal".
    pub anomaly_type: String,
    pub level: AnomalyLevel,
    pub success_count: i64,
    pub failed_count: i64,
    pub total_amount: Amount,
    pub total_count: i64,
    pub currency: String,
    pub created_at: NaiveDateTime,
}

// ── Folds ────────────────────────────────────────────────────────────────────

/// Fold one day's rows per sender account. Output is ordered by
/// (account, day) so repeated folds of the same input agree.
pub fn fold_account_days(rows: &[ClassifiedTransaction], now: NaiveDateTime) -> Vec<AccountDayRecord> {
    let mut groups: BTreeMap<(&str, NaiveDate), AccountDayRecord> = BTreeMap::new();
    for row in rows {
        let raw = &row.raw;
        let rec = groups
            .entry((raw.sender_account_number.as_str(), raw.trx_date))
            .or_insert_with(|| AccountDayRecord {
                id: uuid::Uuid::new_v4().to_string(),
                account_number: raw.sender_account_number.clone(),
                trx_date: raw.trx_date,
                total_trx: 0,
                total_amount: 0,
                total_debit: 0,
                total_credit: 0,
                failed_trx: 0,
                anomaly_trx: 0,
                created_at: now,
            });
        rec.total_trx += 1;
        rec.total_amount += raw.amount;
        match raw.debit_credit {
            DebitCredit::Debit => rec.total_debit += raw.amount,
            DebitCredit::Credit => rec.total_credit += raw.amount,
        }
        if row.is_failed() {
            rec.failed_trx += 1;
        }
        if row.is_anomaly() {
            rec.anomaly_trx += 1;
        }
    }
    groups.into_values().collect()
}

/// Whether a row's currency takes part in gold. An empty currency is
/// the default one.
pub fn is_aggregated_currency(currency: &str) -> bool {
    currency.is_empty() || currency.eq_ignore_ascii_case(DEFAULT_CURRENCY)
}

/// Fold one day's rows per anomaly type. Rows must already be filtered
/// with `is_aggregated_currency`.
///
/// The level comes from the catalog; a code the catalog no longer knows
/// keeps the level stamped on the silver row.
pub fn fold_summary(
    rows: &[ClassifiedTransaction],
    catalog: &CriteriaCatalog,
    now: NaiveDateTime,
) -> Vec<SummaryRecord> {
    let mut groups: BTreeMap<(NaiveDate, String), SummaryRecord> = BTreeMap::new();
    for row in rows {
        let raw = &row.raw;
        let anomaly_type = catalog.anomaly_type(row.anomaly_code);
        let level = match row.anomaly_code {
            None => AnomalyLevel::Low,
            Some(code) => catalog
                .by_code(code)
                .map(|c| c.level)
                .or(row.anomaly_level)
                .unwrap_or(AnomalyLevel::Low),
        };
        let rec = groups
            .entry((raw.trx_date, anomaly_type.clone()))
            .or_insert_with(|| SummaryRecord {
                trx_date: raw.trx_date,
                anomaly_type,
                level,
                success_count: 0,
                failed_count: 0,
                total_amount: 0,
                total_count: 0,
                currency: DEFAULT_CURRENCY.to_string(),
                created_at: now,
            });
        rec.total_count += 1;
        rec.total_amount += raw.amount;
        if row.is_failed() {
            rec.failed_count += 1;
        }
        rec.success_count = rec.total_count - rec.failed_count;
    }
    groups.into_values().collect()
}

// ── Materialization ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GoldReport {
    pub days: usize,
    pub computed: u64,
    pub normal_inserted: u64,
    pub abnormal_inserted: u64,
    pub summary_inserted: u64,
    pub skipped: u64,
    /// Silver rows left out of the folds: undecodable or not in IDR.
    pub rejected: u64,
}

impl GoldReport {
    pub fn inserted(&self) -> u64 {
        self.normal_inserted + self.abnormal_inserted + self.summary_inserted
    }
}

/// Recompute every silver day and insert whatever gold keys are absent.
pub fn materialize<S: GoldLayer>(
    store: &S,
    catalog: &CriteriaCatalog,
    now: NaiveDateTime,
) -> PipelineResult<GoldReport> {
    let days = store.classified_days()?;
    let mut report = GoldReport {
        days: days.len(),
        ..GoldReport::default()
    };

    for day in days {
        let mut rows = Vec::new();
        for decoded in store.classified_for_day(day)? {
            match decoded {
                Ok(row) if is_aggregated_currency(&row.raw.currency) => rows.push(row),
                Ok(row) => {
                    log::warn!("Gold day {day}: leaving out {} in {}", row.raw.id, row.raw.currency);
                    report.rejected += 1;
                }
                Err(bad) => {
                    log::warn!("Gold day {day}: skipping undecodable silver row {}: {}", bad.id, bad.reason);
                    report.rejected += 1;
                }
            }
        }
        if rows.is_empty() {
            continue;
        }

        for record in fold_account_days(&rows, now) {
            report.computed += 1;
            let bucket = record.bucket();
            // A key already materialized in the other bucket stays where it is.
            if store.account_day_exists(bucket.other(), &record.account_number, day)? {
                report.skipped += 1;
                continue;
            }
            let outcome = store.insert_account_day_if_absent(bucket, &record)?;
            match (outcome.is_inserted(), bucket) {
                (true, GoldBucket::Normal) => report.normal_inserted += 1,
                (true, GoldBucket::Abnormal) => report.abnormal_inserted += 1,
                (false, _) => report.skipped += 1,
            }
        }

        for record in fold_summary(&rows, catalog, now) {
            report.computed += 1;
            if store.insert_summary_if_absent(&record)?.is_inserted() {
                report.summary_inserted += 1;
            } else {
                report.skipped += 1;
            }
        }
        log::debug!("Gold day {day}: {} classified rows folded", rows.len());
    }
    Ok(report)
}

pub struct GoldStage {
    now: fn() -> NaiveDateTime,
}

impl GoldStage {
    pub fn new() -> Self {
        Self {
            now: || chrono::Local::now().naive_local(),
        }
    }
}

impl Default for GoldStage {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for GoldStage {
    fn layer(&self) -> Layer {
        Layer::Gold
    }

    fn run(&mut self, store: &PipelineStore, _cancel: &CancelToken) -> PipelineResult<StageReport> {
        let catalog = CriteriaCatalog::new(store.load_criteria()?);
        let report = materialize(store, &catalog, (self.now)())?;
        log::info!(
            "Gold: {} days, {} normal / {} abnormal / {} summary rows inserted, {} skipped, {} rejected",
            report.days,
            report.normal_inserted,
            report.abnormal_inserted,
            report.summary_inserted,
            report.skipped,
            report.rejected
        );
        let mut stage_report = StageReport::new(report.computed, report.rejected);
        stage_report.push(PipelineEvent::GoldMaterialized {
            days: report.days,
            normal_inserted: report.normal_inserted,
            abnormal_inserted: report.abnormal_inserted,
            summary_inserted: report.summary_inserted,
            skipped: report.skipped,
            rejected: report.rejected,
        });
        Ok(stage_report)
    }
}
