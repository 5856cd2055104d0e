//! Capability traits every backing store implements.
//!
//! "Insert if absent" is the only concurrency primitive the pipeline
//! relies on. Each layer exposes a conditional insert that reports
//! whether the row landed, an existence check by key, and the range
//! queries its downstream fold needs. `PipelineStore` implements all of
//! them; test doubles implement the subset they stand in for.

use crate::{
    criteria::{AnomalyCriterion, HistoryWindow},
    error::PipelineResult,
    gold_aggregator::{AccountDayRecord, GoldBucket, SummaryRecord},
    model::{Account, ClassifiedTransaction, RawTransaction},
    types::AccountNumber,
};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The key already existed; nothing was written.
    Skipped,
}

impl InsertOutcome {
    pub fn from_changes(changes: usize) -> Self {
        if changes > 0 {
            Self::Inserted
        } else {
            Self::Skipped
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// A stored row whose columns did not decode. Readers report it and move on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodableRow {
    pub id: String,
    pub reason: String,
}

pub type Decoded<T> = Result<T, UndecodableRow>;

/// Position in bronze `(trx_ts, id)` order, exactly as stored.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RawKey {
    pub trx_ts: String,
    pub id: String,
}

/// A bronze row waiting for classification. The key is read even when the
/// rest of the row does not decode, so a reader can page past it.
#[derive(Debug, Clone)]
pub struct PendingRaw {
    pub key: RawKey,
    pub row: Decoded<RawTransaction>,
}

/// Read-only account reference data.
pub trait AccountSource {
    /// Accounts eligible as generator counterparties (status OPENED).
    fn opened_accounts(&self) -> PipelineResult<Vec<Account>>;

    /// Every account, keyed by account number.
    fn accounts_by_number(&self) -> PipelineResult<HashMap<AccountNumber, Account>>;
}

pub trait BronzeSink {
    /// Insert each row whose id is absent. One outcome per input row, in order.
    fn insert_raw_batch(&self, rows: &[RawTransaction]) -> PipelineResult<Vec<InsertOutcome>>;

    fn raw_exists(&self, id: &str) -> PipelineResult<bool>;
}

pub trait SilverLayer {
    fn load_criteria(&self) -> PipelineResult<Vec<AnomalyCriterion>>;

    /// Bronze rows without a silver row, ordered by `(trx_ts, id)`,
    /// strictly after `after` when given.
    fn unclassified_raw(&self, after: Option<&RawKey>, limit: usize) -> PipelineResult<Vec<PendingRaw>>;

    /// Bronze transfers sharing the sender or the beneficiary, strictly
    /// before `trx` in `(timestamp, id)` order and no older than the lookback.
    fn history_window(&self, trx: &RawTransaction, lookback_secs: i64) -> PipelineResult<HistoryWindow>;

    fn insert_classified_if_absent(&self, row: &ClassifiedTransaction) -> PipelineResult<InsertOutcome>;

    fn classified_exists(&self, id: &str) -> PipelineResult<bool>;
}

pub trait GoldLayer {
    /// Distinct transaction dates present in silver, ascending.
    fn classified_days(&self) -> PipelineResult<Vec<NaiveDate>>;

    /// The full classified population for one day. Rows that do not
    /// decode come back as `Err` in place.
    fn classified_for_day(&self, day: NaiveDate) -> PipelineResult<Vec<Decoded<ClassifiedTransaction>>>;

    fn insert_account_day_if_absent(
        &self,
        bucket: GoldBucket,
        record: &AccountDayRecord,
    ) -> PipelineResult<InsertOutcome>;

    fn account_day_exists(&self, bucket: GoldBucket, account_number: &str, day: NaiveDate) -> PipelineResult<bool>;

    fn insert_summary_if_absent(&self, record: &SummaryRecord) -> PipelineResult<InsertOutcome>;

    fn summary_exists(&self, day: NaiveDate, anomaly_type: &str) -> PipelineResult<bool>;
}
