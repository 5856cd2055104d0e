//! Store methods for the bronze layer (raw transfers).

use super::{
    decode_row,
    layers::{PendingRaw, RawKey},
    parse_date_col, parse_time_col, parse_ts_col, BronzeSink, InsertOutcome, PipelineStore,
};
use crate::{
    criteria::{HistoryEntry, HistoryWindow},
    error::PipelineResult,
    model::{DebitCredit, RawTransaction, TS_FMT},
};
use chrono::Duration;
use rusqlite::{params, types::Type, Row};

pub(crate) const RAW_COLUMNS: &str = "id, trx_type, sender_account_number, beneficiary_account_number,
     beneficiary_bank, beneficiary_name, amount, debit_credit, trx_date, trx_time,
     currency, created_at";

/// Map a row selected with `RAW_COLUMNS` (in that order, from `offset`).
pub(crate) fn raw_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<RawTransaction> {
    let dc: String = row.get(offset + 7)?;
    let debit_credit = DebitCredit::parse(&dc).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            offset + 7,
            Type::Text,
            format!("unknown debit_credit flag '{dc}'").into(),
        )
    })?;
    let date: String = row.get(offset + 8)?;
    let time: String = row.get(offset + 9)?;
    let created: String = row.get(offset + 11)?;
    Ok(RawTransaction {
        id: row.get(offset)?,
        trx_type: row.get(offset + 1)?,
        sender_account_number: row.get(offset + 2)?,
        beneficiary_account_number: row.get(offset + 3)?,
        beneficiary_bank: row.get(offset + 4)?,
        beneficiary_name: row.get(offset + 5)?,
        amount: row.get(offset + 6)?,
        debit_credit,
        trx_date: parse_date_col(&date, offset + 8)?,
        trx_time: parse_time_col(&time, offset + 9)?,
        currency: row.get(offset + 10)?,
        created_at: parse_ts_col(&created, offset + 11)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let ts: String = row.get(4)?;
    Ok(HistoryEntry {
        id: row.get(0)?,
        sender_account_number: row.get(1)?,
        beneficiary_account_number: row.get(2)?,
        amount: row.get(3)?,
        timestamp: parse_ts_col(&ts, 4)?,
    })
}

impl PipelineStore {
    pub fn raw_count(&self) -> PipelineResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions_raw", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn raw_by_id(&self, id: &str) -> PipelineResult<Option<RawTransaction>> {
        use rusqlite::OptionalExtension;
        let sql = format!("SELECT {RAW_COLUMNS} FROM transactions_raw WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], |row| raw_from_row(row, 0))
            .optional()?;
        Ok(row)
    }

    fn history_query(
        &self,
        column: &str,
        key: &str,
        since: &str,
        until: &str,
        before_id: &str,
    ) -> PipelineResult<Vec<HistoryEntry>> {
        let sql = format!(
            "SELECT id, sender_account_number, beneficiary_account_number, amount, trx_ts
             FROM transactions_raw
             WHERE {column} = ?1
               AND trx_ts >= ?2
               AND (trx_ts < ?3 OR (trx_ts = ?3 AND id < ?4))
             ORDER BY trx_ts ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![key, since, until, before_id], |row| {
            decode_row(row, 0, history_from_row)
        })?;
        let mut entries = Vec::new();
        for row in rows {
            match row? {
                Ok(entry) => entries.push(entry),
                Err(bad) => log::warn!("History: skipping undecodable bronze row {}: {}", bad.id, bad.reason),
            }
        }
        Ok(entries)
    }

    pub(crate) fn bronze_history_window(
        &self,
        trx: &RawTransaction,
        lookback_secs: i64,
    ) -> PipelineResult<HistoryWindow> {
        let until = trx.timestamp();
        let since = until - Duration::seconds(lookback_secs.max(0));
        let until_s = until.format(TS_FMT).to_string();
        let since_s = since.format(TS_FMT).to_string();
        Ok(HistoryWindow {
            to_beneficiary: self.history_query(
                "beneficiary_account_number",
                &trx.beneficiary_account_number,
                &since_s,
                &until_s,
                &trx.id,
            )?,
            from_sender: self.history_query(
                "sender_account_number",
                &trx.sender_account_number,
                &since_s,
                &until_s,
                &trx.id,
            )?,
        })
    }

    /// Each row is decoded on its own; the stored `(trx_ts, id)` key is
    /// read separately so an undecodable row can still be paged past.
    pub(crate) fn bronze_unclassified(&self, after: Option<&RawKey>, limit: usize) -> PipelineResult<Vec<PendingRaw>> {
        let (cursor_ts, cursor_id) = match after {
            Some(key) => (Some(key.trx_ts.as_str()), key.id.as_str()),
            None => (None, ""),
        };
        let sql = format!(
            "SELECT {RAW_COLUMNS}, r.trx_ts FROM transactions_raw r
             WHERE NOT EXISTS (SELECT 1 FROM transactions s WHERE s.id = r.id)
               AND (?1 IS NULL OR r.trx_ts > ?1 OR (r.trx_ts = ?1 AND r.id > ?2))
             ORDER BY r.trx_ts ASC, r.id ASC
             LIMIT ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cursor_ts, cursor_id, limit as i64], |row| {
            let key = RawKey {
                trx_ts: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
                id: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            };
            Ok(PendingRaw {
                key,
                row: decode_row(row, 0, |r| raw_from_row(r, 0))?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl BronzeSink for PipelineStore {
    /// One store transaction per batch; each row is `INSERT OR IGNORE`.
    fn insert_raw_batch(&self, rows: &[RawTransaction]) -> PipelineResult<Vec<InsertOutcome>> {
        let tx = self.conn.unchecked_transaction()?;
        let mut outcomes = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO transactions_raw (
                    id, trx_type, sender_account_number, beneficiary_account_number,
                    beneficiary_bank, beneficiary_name, amount, debit_credit,
                    trx_date, trx_time, trx_ts, currency, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(id) DO NOTHING",
            )?;
            for trx in rows {
                let changes = stmt.execute(params![
                    trx.id,
                    trx.trx_type,
                    trx.sender_account_number,
                    trx.beneficiary_account_number,
                    trx.beneficiary_bank,
                    trx.beneficiary_name,
                    trx.amount,
                    trx.debit_credit.as_str(),
                    trx.trx_date.format(crate::model::DATE_FMT).to_string(),
                    trx.trx_time.format(crate::model::TIME_FMT).to_string(),
                    trx.timestamp().format(TS_FMT).to_string(),
                    trx.currency,
                    trx.created_at.format(TS_FMT).to_string(),
                ])?;
                outcomes.push(InsertOutcome::from_changes(changes));
            }
        }
        tx.commit()?;
        Ok(outcomes)
    }

    fn raw_exists(&self, id: &str) -> PipelineResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM transactions_raw WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}
