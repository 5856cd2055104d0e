//! Silver classifier: assigns every bronze transfer a settlement status
//! and at most one anomaly criterion.
//!
//! RULE: classification is a pure function.
//! `classify_transaction` sees only the transfer, its history snapshot,
//! the catalog and the account reference data. Everything that touches
//! the store lives in `classify_pending`.
//!
//! RULE: silver rows are written once.
//! A transfer that already has a silver row is never re-evaluated, even
//! if the catalog changes later.

use crate::{
    cancel::CancelToken,
    criteria::{CriteriaCatalog, HistoryWindow},
    error::PipelineResult,
    event::PipelineEvent,
    model::{Account, ClassifiedTransaction, RawTransaction, TrxStatus},
    stage::{Layer, PipelineStage, StageReport},
    store::{AccountSource, PendingRaw, PipelineStore, RawKey, SilverLayer},
    types::{AccountNumber, TransactionId},
};
use chrono::NaiveDateTime;
use std::collections::HashMap;

/// SUCCESS when the sender exists and can settle, and, for an in-house
/// beneficiary, the beneficiary can too.
pub fn transaction_status(trx: &RawTransaction, accounts: &HashMap<AccountNumber, Account>) -> TrxStatus {
    let settles = |number: &str| accounts.get(number).is_some_and(|a| a.status.can_settle());
    if !settles(trx.sender_account_number.as_str()) {
        return TrxStatus::Failed;
    }
    if trx.is_in_house_transfer() && !settles(trx.beneficiary_account_number.as_str()) {
        return TrxStatus::Failed;
    }
    TrxStatus::Success
}

pub fn classify_transaction(
    trx: RawTransaction,
    history: &HistoryWindow,
    catalog: &CriteriaCatalog,
    accounts: &HashMap<AccountNumber, Account>,
    classified_at: NaiveDateTime,
) -> ClassifiedTransaction {
    let status = transaction_status(&trx, accounts);
    let hit = catalog.classify(&trx, history);
    ClassifiedTransaction {
        status,
        anomaly_code: hit.map(|c| c.code),
        anomaly_level: hit.map(|c| c.level),
        classified_at,
        raw: trx,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SilverReport {
    pub classified: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub anomalies: u64,
    pub failed: u64,
    pub rejected: Vec<(TransactionId, String)>,
}

/// Classify every bronze transfer that has no silver row yet.
///
/// Rows are read in `(trx_ts, id)` order behind a cursor, so a row that
/// fails, including one whose stored columns do not decode, is passed over
/// instead of being read again. Connectivity errors abort the pass; any
/// other per-row error is counted and logged. A rejected row stays
/// unclassified and is reported again by the next pass.
pub fn classify_pending<S: SilverLayer + AccountSource>(
    store: &S,
    catalog: &CriteriaCatalog,
    batch_size: usize,
    classified_at: NaiveDateTime,
    cancel: &CancelToken,
) -> PipelineResult<SilverReport> {
    let accounts = store.accounts_by_number()?;
    if accounts.is_empty() {
        log::warn!("Account store is empty, every transfer will classify as FAILED");
    }
    let lookback = catalog.lookback_secs();
    let mut report = SilverReport::default();
    let mut cursor: Option<RawKey> = None;

    loop {
        if cancel.is_cancelled() {
            log::info!("Silver: cancelled after {} transfers", report.classified);
            break;
        }
        let batch = store.unclassified_raw(cursor.as_ref(), batch_size.max(1))?;
        if batch.is_empty() {
            break;
        }

        for PendingRaw { key, row } in batch {
            cursor = Some(key);
            let trx = match row {
                Ok(trx) => trx,
                Err(bad) => {
                    log::warn!("Silver: skipping undecodable bronze row {}: {}", bad.id, bad.reason);
                    report.failed += 1;
                    report.rejected.push((bad.id, bad.reason));
                    continue;
                }
            };

            let history = if catalog.needs_history() {
                match store.history_window(&trx, lookback) {
                    Ok(h) => h,
                    Err(e) if e.is_connectivity() => return Err(e),
                    Err(e) => {
                        log::warn!("Silver: history lookup failed for {}: {e}", trx.id);
                        report.failed += 1;
                        report.rejected.push((trx.id.clone(), e.to_string()));
                        continue;
                    }
                }
            } else {
                HistoryWindow::default()
            };

            let id = trx.id.clone();
            let row = classify_transaction(trx, &history, catalog, &accounts, classified_at);
            report.classified += 1;
            if row.is_anomaly() {
                report.anomalies += 1;
                log::debug!(
                    "Silver: {id} matched {} ({})",
                    catalog.anomaly_type(row.anomaly_code),
                    row.anomaly_level.map(|l| l.as_str()).unwrap_or("-")
                );
            }

            match store.insert_classified_if_absent(&row) {
                Ok(outcome) if outcome.is_inserted() => report.inserted += 1,
                Ok(_) => report.skipped += 1,
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => {
                    log::warn!("Silver: could not persist {id}: {e}");
                    report.failed += 1;
                    report.rejected.push((id, e.to_string()));
                }
            }
        }
    }
    Ok(report)
}

pub struct SilverStage {
    batch_size: usize,
}

impl SilverStage {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }
}

impl PipelineStage for SilverStage {
    fn layer(&self) -> Layer {
        Layer::Silver
    }

    fn run(&mut self, store: &PipelineStore, cancel: &CancelToken) -> PipelineResult<StageReport> {
        let catalog = CriteriaCatalog::new(store.load_criteria()?);
        if catalog.is_empty() {
            log::warn!("Silver: criteria catalog is empty, no transfer will be flagged");
        } else {
            log::info!("Silver: loaded {} criteria", catalog.len());
        }

        let now = chrono::Local::now().naive_local();
        let report = classify_pending(store, &catalog, self.batch_size, now, cancel)?;
        log::info!(
            "Silver: {} classified ({} inserted, {} skipped), {} anomalies, {} failed",
            report.classified,
            report.inserted,
            report.skipped,
            report.anomalies,
            report.failed
        );

        let mut stage_report = StageReport::new(report.classified, report.failed);
        stage_report.push(PipelineEvent::CriteriaLoaded { count: catalog.len() });
        if catalog.is_empty() {
            stage_report.push(PipelineEvent::Degraded {
                reason: "empty criteria catalog".into(),
            });
        }
        stage_report.push(PipelineEvent::SilverClassified {
            classified: report.classified,
            inserted: report.inserted,
            skipped: report.skipped,
            anomalies: report.anomalies,
            failed: report.failed,
        });
        for (id, reason) in report.rejected {
            stage_report.push(PipelineEvent::RowRejected { id, reason });
        }
        Ok(stage_report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        criteria::{AnomalyCriterion, AnomalyLevel, RuleKind},
        error::PipelineError,
        model::{AccountStatus, DebitCredit},
        store::{Decoded, InsertOutcome, UndecodableRow},
    };
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn trx(sender: &str, beneficiary: &str, bank: &str, amount: i64) -> RawTransaction {
        RawTransaction {
            id: "t1".into(),
            trx_type: "Transfer".into(),
            sender_account_number: sender.into(),
            beneficiary_account_number: beneficiary.into(),
            beneficiary_bank: bank.into(),
            beneficiary_name: "JANE DOE".into(),
            amount,
            debit_credit: DebitCredit::Debit,
            trx_date: ts().date(),
            trx_time: ts().time(),
            currency: "IDR".into(),
            created_at: ts(),
        }
    }

    fn accounts(entries: &[(&str, AccountStatus)]) -> HashMap<AccountNumber, Account> {
        entries
            .iter()
            .map(|(n, s)| {
                (
                    n.to_string(),
                    Account {
                        account_number: n.to_string(),
                        name: "HOLDER".into(),
                        status: *s,
                        current_balance: 0,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn status_requires_a_settling_sender() {
        let book = accounts(&[("S1", AccountStatus::Opened), ("S2", AccountStatus::Closed)]);
        assert_eq!(transaction_status(&trx("S1", "X", "BCA", 10), &book), TrxStatus::Success);
        assert_eq!(transaction_status(&trx("S2", "X", "BCA", 10), &book), TrxStatus::Failed);
        assert_eq!(transaction_status(&trx("S9", "X", "BCA", 10), &book), TrxStatus::Failed);
    }

    #[test]
    fn in_house_transfer_also_checks_beneficiary() {
        let book = accounts(&[("S1", AccountStatus::Opened), ("R1", AccountStatus::Blocked)]);
        assert_eq!(transaction_status(&trx("S1", "R1", "BNI", 10), &book), TrxStatus::Success);
        assert_eq!(transaction_status(&trx("S1", "R9", "BNI", 10), &book), TrxStatus::Failed);
        // External beneficiaries are not in the account store.
        assert_eq!(transaction_status(&trx("S1", "R9", "BCA", 10), &book), TrxStatus::Success);
    }

    #[test]
    fn classification_carries_code_and_level() {
        let catalog = CriteriaCatalog::new(vec![AnomalyCriterion {
            code: 'C',
            name: "high-value".into(),
            description: "large".into(),
            level: AnomalyLevel::High,
            rule: RuleKind::HighValue { min_amount: 1_000 },
        }]);
        let book = accounts(&[("S1", AccountStatus::Opened)]);
        let hit = classify_transaction(trx("S1", "X", "BCA", 5_000), &HistoryWindow::default(), &catalog, &book, ts());
        assert_eq!(hit.anomaly_code, Some('C'));
        assert_eq!(hit.anomaly_level, Some(AnomalyLevel::High));
        assert_eq!(hit.status, TrxStatus::Success);

        let miss = classify_transaction(trx("S1", "X", "BCA", 50), &HistoryWindow::default(), &catalog, &book, ts());
        assert_eq!(miss.anomaly_code, None);
        assert_eq!(miss.anomaly_level, None);
    }

    /// In-memory silver layer whose history lookup fails for one id.
    struct FlakyHistory {
        pending: Vec<PendingRaw>,
        failing_id: &'static str,
        book: HashMap<AccountNumber, Account>,
        written: std::cell::RefCell<Vec<ClassifiedTransaction>>,
    }

    impl FlakyHistory {
        fn new(rows: Vec<Decoded<RawTransaction>>, failing_id: &'static str) -> Self {
            let pending = rows
                .into_iter()
                .enumerate()
                .map(|(i, row)| {
                    let id = match &row {
                        Ok(trx) => trx.id.clone(),
                        Err(bad) => bad.id.clone(),
                    };
                    PendingRaw {
                        key: RawKey {
                            trx_ts: format!("2024-01-05 10:00:{i:02}"),
                            id,
                        },
                        row,
                    }
                })
                .collect();
            Self {
                pending,
                failing_id,
                book: accounts(&[("S1", AccountStatus::Opened)]),
                written: Default::default(),
            }
        }

        fn written_ids(&self) -> Vec<String> {
            self.written.borrow().iter().map(|c| c.raw.id.clone()).collect()
        }
    }

    impl AccountSource for FlakyHistory {
        fn opened_accounts(&self) -> PipelineResult<Vec<Account>> {
            Ok(self.book.values().cloned().collect())
        }

        fn accounts_by_number(&self) -> PipelineResult<HashMap<AccountNumber, Account>> {
            Ok(self.book.clone())
        }
    }

    impl SilverLayer for FlakyHistory {
        fn load_criteria(&self) -> PipelineResult<Vec<AnomalyCriterion>> {
            Ok(Vec::new())
        }

        fn unclassified_raw(&self, after: Option<&RawKey>, limit: usize) -> PipelineResult<Vec<PendingRaw>> {
            let written = self.written_ids();
            Ok(self
                .pending
                .iter()
                .filter(|p| after.map_or(true, |a| p.key > *a))
                .filter(|p| !written.contains(&p.key.id))
                .take(limit)
                .cloned()
                .collect())
        }

        fn history_window(&self, trx: &RawTransaction, _lookback_secs: i64) -> PipelineResult<HistoryWindow> {
            if trx.id == self.failing_id {
                return Err(PipelineError::Other(anyhow::anyhow!("history index corrupt for {}", trx.id)));
            }
            Ok(HistoryWindow::default())
        }

        fn insert_classified_if_absent(&self, row: &ClassifiedTransaction) -> PipelineResult<InsertOutcome> {
            let mut written = self.written.borrow_mut();
            if written.iter().any(|c| c.raw.id == row.raw.id) {
                return Ok(InsertOutcome::Skipped);
            }
            written.push(row.clone());
            Ok(InsertOutcome::Inserted)
        }

        fn classified_exists(&self, id: &str) -> PipelineResult<bool> {
            Ok(self.written_ids().iter().any(|w| w == id))
        }
    }

    fn velocity_catalog() -> CriteriaCatalog {
        CriteriaCatalog::new(vec![AnomalyCriterion {
            code: 'E',
            name: "velocity".into(),
            description: "many transfers".into(),
            level: AnomalyLevel::Medium,
            rule: RuleKind::Velocity {
                max_count: 10,
                window_secs: 3_600,
            },
        }])
    }

    fn trx_with_id(id: &str) -> RawTransaction {
        let mut t = trx("S1", "X", "BCA", 10);
        t.id = id.into();
        t
    }

    #[test]
    fn history_failure_rejects_only_that_row() {
        let store = FlakyHistory::new(
            vec![Ok(trx_with_id("a")), Ok(trx_with_id("b")), Ok(trx_with_id("c"))],
            "b",
        );
        let report = classify_pending(&store, &velocity_catalog(), 2, ts(), &CancelToken::new()).unwrap();

        assert_eq!(report.classified, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, "b");
        assert_eq!(store.written_ids(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn undecodable_row_is_rejected_and_paged_past() {
        let store = FlakyHistory::new(
            vec![
                Err(UndecodableRow {
                    id: "broken".into(),
                    reason: "unknown debit/credit flag".into(),
                }),
                Ok(trx_with_id("ok")),
            ],
            "none",
        );
        let report = classify_pending(&store, &velocity_catalog(), 1, ts(), &CancelToken::new()).unwrap();

        assert_eq!(report.classified, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.rejected, vec![("broken".to_string(), "unknown debit/credit flag".to_string())]);
        assert_eq!(store.written_ids(), vec!["ok".to_string()]);
    }

    #[test]
    fn connectivity_error_during_history_aborts_the_pass() {
        struct Unreachable(FlakyHistory);
        impl AccountSource for Unreachable {
            fn opened_accounts(&self) -> PipelineResult<Vec<Account>> {
                self.0.opened_accounts()
            }
            fn accounts_by_number(&self) -> PipelineResult<HashMap<AccountNumber, Account>> {
                self.0.accounts_by_number()
            }
        }
        impl SilverLayer for Unreachable {
            fn load_criteria(&self) -> PipelineResult<Vec<AnomalyCriterion>> {
                Ok(Vec::new())
            }
            fn unclassified_raw(&self, after: Option<&RawKey>, limit: usize) -> PipelineResult<Vec<PendingRaw>> {
                self.0.unclassified_raw(after, limit)
            }
            fn history_window(&self, _trx: &RawTransaction, _lookback_secs: i64) -> PipelineResult<HistoryWindow> {
                Err(PipelineError::StoreUnreachable {
                    path: "pipeline.db".into(),
                    reason: "connection reset".into(),
                })
            }
            fn insert_classified_if_absent(&self, row: &ClassifiedTransaction) -> PipelineResult<InsertOutcome> {
                self.0.insert_classified_if_absent(row)
            }
            fn classified_exists(&self, id: &str) -> PipelineResult<bool> {
                self.0.classified_exists(id)
            }
        }

        let store = Unreachable(FlakyHistory::new(vec![Ok(trx_with_id("a"))], "none"));
        let err = classify_pending(&store, &velocity_catalog(), 10, ts(), &CancelToken::new()).unwrap_err();
        assert!(err.is_connectivity());
        assert!(store.0.written_ids().is_empty());
    }

    #[test]
    fn empty_catalog_classifies_everything_as_none() {
        let catalog = CriteriaCatalog::default();
        let row = classify_transaction(
            trx("S1", "X", "BCA", 50_000_000),
            &HistoryWindow::default(),
            &catalog,
            &HashMap::new(),
            ts(),
        );
        assert!(!row.is_anomaly());
        assert!(row.is_failed());
    }
}
