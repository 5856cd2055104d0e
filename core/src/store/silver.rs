//! Store methods for the silver layer (criteria + classified transfers).

use super::{
    gold::classified_from_row,
    layers::{PendingRaw, RawKey},
    parse_code_col, InsertOutcome, PipelineStore, SilverLayer,
};
use crate::{
    criteria::{AnomalyCriterion, AnomalyLevel, HistoryWindow, RuleKind},
    error::{PipelineError, PipelineResult},
    model::{ClassifiedTransaction, RawTransaction, DATE_FMT, TIME_FMT, TS_FMT},
};
use rusqlite::params;

impl PipelineStore {
    pub fn insert_criterion(&self, criterion: &AnomalyCriterion) -> PipelineResult<InsertOutcome> {
        let rule = serde_json::to_string(&criterion.rule)?;
        let changes = self.conn.execute(
            "INSERT INTO criteria (code, name, description, level, rule)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(code) DO NOTHING",
            params![
                criterion.code.to_string(),
                criterion.name,
                criterion.description,
                criterion.level.as_str(),
                rule,
            ],
        )?;
        Ok(InsertOutcome::from_changes(changes))
    }

    /// Drop every criterion. Reference-data maintenance and tests only.
    pub fn clear_criteria(&self) -> PipelineResult<()> {
        self.conn.execute("DELETE FROM criteria", [])?;
        Ok(())
    }

    pub fn classified_count(&self) -> PipelineResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn classified_by_id(&self, id: &str) -> PipelineResult<Option<ClassifiedTransaction>> {
        use rusqlite::OptionalExtension;
        let sql = format!("SELECT {} FROM transactions WHERE id = ?1", super::gold::SILVER_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], classified_from_row)
            .optional()?;
        Ok(row)
    }

    /// Count of silver rows carrying `code`.
    pub fn classified_count_for_code(&self, code: char) -> PipelineResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE anomaly_code = ?1",
            params![code.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl SilverLayer for PipelineStore {
    fn load_criteria(&self) -> PipelineResult<Vec<AnomalyCriterion>> {
        let mut stmt = self.conn.prepare(
            "SELECT code, name, description, level, rule FROM criteria ORDER BY code ASC",
        )?;
        let raw_rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut criteria = Vec::with_capacity(raw_rows.len());
        for (code, name, description, level, rule) in raw_rows {
            let parsed = (|| -> PipelineResult<AnomalyCriterion> {
                let code = parse_code_col(&code, 0)?;
                let level = AnomalyLevel::parse(&level).ok_or_else(|| PipelineError::Malformed {
                    id: code.to_string(),
                    reason: format!("unknown level '{level}'"),
                })?;
                let rule: RuleKind = serde_json::from_str(&rule)?;
                rule.validate().map_err(|reason| PipelineError::Malformed {
                    id: code.to_string(),
                    reason,
                })?;
                Ok(AnomalyCriterion {
                    code,
                    name: name.clone(),
                    description,
                    level,
                    rule,
                })
            })();
            match parsed {
                Ok(c) => criteria.push(c),
                // One bad reference row never disables the rest of the catalog.
                Err(e) => log::warn!("Skipping malformed criterion '{name}': {e}"),
            }
        }
        Ok(criteria)
    }

    fn unclassified_raw(&self, after: Option<&RawKey>, limit: usize) -> PipelineResult<Vec<PendingRaw>> {
        self.bronze_unclassified(after, limit)
    }

    fn history_window(&self, trx: &RawTransaction, lookback_secs: i64) -> PipelineResult<HistoryWindow> {
        self.bronze_history_window(trx, lookback_secs)
    }

    fn insert_classified_if_absent(&self, row: &ClassifiedTransaction) -> PipelineResult<InsertOutcome> {
        let raw = &row.raw;
        let changes = self.conn.execute(
            "INSERT INTO transactions (
                id, trx_type, sender_account_number, beneficiary_account_number,
                beneficiary_bank, beneficiary_name, amount, debit_credit,
                trx_date, trx_time, currency, status_trx, anomaly_code, anomaly_level, classified_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id) DO NOTHING",
            params![
                raw.id,
                raw.trx_type,
                raw.sender_account_number,
                raw.beneficiary_account_number,
                raw.beneficiary_bank,
                raw.beneficiary_name,
                raw.amount,
                raw.debit_credit.as_str(),
                raw.trx_date.format(DATE_FMT).to_string(),
                raw.trx_time.format(TIME_FMT).to_string(),
                raw.currency,
                row.status.as_str(),
                row.anomaly_code.map(|c| c.to_string()),
                row.anomaly_level.map(|l| l.as_str()),
                row.classified_at.format(TS_FMT).to_string(),
            ],
        )?;
        Ok(InsertOutcome::from_changes(changes))
    }

    fn classified_exists(&self, id: &str) -> PipelineResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}
