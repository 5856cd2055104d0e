//! Store methods for the gold layer (account-day buckets + daily summary).

use super::{
    bronze::raw_from_row, decode_row, layers::Decoded, parse_code_col, parse_date_col, parse_ts_col, GoldLayer,
    InsertOutcome, PipelineStore,
};
use crate::{
    criteria::AnomalyLevel,
    error::PipelineResult,
    gold_aggregator::{AccountDayRecord, GoldBucket, SummaryRecord},
    model::{ClassifiedTransaction, TrxStatus, DATE_FMT, TS_FMT},
};
use chrono::NaiveDate;
use rusqlite::{params, types::Type, Row};

/// Silver columns in raw order (classified_at sits where bronze keeps
/// created_at), followed by status, code and level.
pub(crate) const SILVER_COLUMNS: &str = "id, trx_type, sender_account_number, beneficiary_account_number,
     beneficiary_bank, beneficiary_name, amount, debit_credit, trx_date, trx_time,
     currency, classified_at, status_trx, anomaly_code, anomaly_level";

pub(crate) fn classified_from_row(row: &Row<'_>) -> rusqlite::Result<ClassifiedTransaction> {
    let raw = raw_from_row(row, 0)?;
    let classified_at = raw.created_at;
    let status_raw: String = row.get(12)?;
    let status = TrxStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(12, Type::Text, format!("unknown status '{status_raw}'").into())
    })?;
    let code = row
        .get::<_, Option<String>>(13)?
        .map(|c| parse_code_col(&c, 13))
        .transpose()?;
    let anomaly_level = row
        .get::<_, Option<String>>(14)?
        .map(|l| {
            AnomalyLevel::parse(&l).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(14, Type::Text, format!("unknown level '{l}'").into())
            })
        })
        .transpose()?;
    Ok(ClassifiedTransaction {
        raw,
        status,
        anomaly_code: code,
        anomaly_level,
        classified_at,
    })
}

fn account_day_from_row(row: &Row<'_>) -> rusqlite::Result<AccountDayRecord> {
    let date: String = row.get(2)?;
    let created: String = row.get(9)?;
    Ok(AccountDayRecord {
        id: row.get(0)?,
        account_number: row.get(1)?,
        trx_date: parse_date_col(&date, 2)?,
        total_trx: row.get(3)?,
        total_amount: row.get(4)?,
        total_debit: row.get(5)?,
        total_credit: row.get(6)?,
        failed_trx: row.get(7)?,
        anomaly_trx: row.get(8)?,
        created_at: parse_ts_col(&created, 9)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<SummaryRecord> {
    let date: String = row.get(0)?;
    let level: String = row.get(2)?;
    let created: String = row.get(8)?;
    Ok(SummaryRecord {
        trx_date: parse_date_col(&date, 0)?,
        anomaly_type: row.get(1)?,
        level: AnomalyLevel::parse(&level).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, format!("unknown level '{level}'").into())
        })?,
        success_count: row.get(3)?,
        failed_count: row.get(4)?,
        total_amount: row.get(5)?,
        total_count: row.get(6)?,
        currency: row.get(7)?,
        created_at: parse_ts_col(&created, 8)?,
    })
}

impl PipelineStore {
    // ── Gold reads ────────────────────────────────────────────────

    /// All rows of one bucket, ordered by (day, account).
    pub fn account_days(&self, bucket: GoldBucket) -> PipelineResult<Vec<AccountDayRecord>> {
        let sql = format!(
            "SELECT id, account_number, trx_date, total_trx, total_amount, total_debit,
                    total_credit, failed_trx, anomaly_trx, created_at
             FROM {} ORDER BY trx_date ASC, account_number ASC",
            bucket.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], account_day_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn summary_for_day(&self, day: NaiveDate) -> PipelineResult<Vec<SummaryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT trx_date, anomaly_type, level, success_count, failed_count,
                    total_amount, total_count, currency, created_at
             FROM transactions_summary WHERE trx_date = ?1
             ORDER BY anomaly_type ASC",
        )?;
        let rows = stmt.query_map(params![day.format(DATE_FMT).to_string()], summary_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl GoldLayer for PipelineStore {
    fn classified_days(&self) -> PipelineResult<Vec<NaiveDate>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT trx_date FROM transactions ORDER BY trx_date ASC")?;
        let rows = stmt.query_map([], |row| {
            decode_row(row, 0, |r| {
                let raw: String = r.get(0)?;
                parse_date_col(&raw, 0)
            })
        })?;
        let mut days = Vec::new();
        for row in rows {
            match row? {
                Ok(day) => days.push(day),
                Err(bad) => log::warn!("Gold: skipping silver rows with undecodable trx_date '{}': {}", bad.id, bad.reason),
            }
        }
        Ok(days)
    }

    fn classified_for_day(&self, day: NaiveDate) -> PipelineResult<Vec<Decoded<ClassifiedTransaction>>> {
        let sql = format!(
            "SELECT {SILVER_COLUMNS} FROM transactions WHERE trx_date = ?1
             ORDER BY trx_time ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![day.format(DATE_FMT).to_string()], |row| {
            decode_row(row, 0, classified_from_row)
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn insert_account_day_if_absent(
        &self,
        bucket: GoldBucket,
        record: &AccountDayRecord,
    ) -> PipelineResult<InsertOutcome> {
        let sql = format!(
            "INSERT INTO {} (
                id, account_number, trx_date, total_trx, total_amount, total_debit,
                total_credit, failed_trx, anomaly_trx, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT DO NOTHING",
            bucket.table()
        );
        let changes = self.conn.execute(
            &sql,
            params![
                record.id,
                record.account_number,
                record.trx_date.format(DATE_FMT).to_string(),
                record.total_trx,
                record.total_amount,
                record.total_debit,
                record.total_credit,
                record.failed_trx,
                record.anomaly_trx,
                record.created_at.format(TS_FMT).to_string(),
            ],
        )?;
        Ok(InsertOutcome::from_changes(changes))
    }

    fn account_day_exists(&self, bucket: GoldBucket, account_number: &str, day: NaiveDate) -> PipelineResult<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE account_number = ?1 AND trx_date = ?2)",
            bucket.table()
        );
        let exists: bool = self.conn.query_row(
            &sql,
            params![account_number, day.format(DATE_FMT).to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn insert_summary_if_absent(&self, record: &SummaryRecord) -> PipelineResult<InsertOutcome> {
        let changes = self.conn.execute(
            "INSERT INTO transactions_summary (
                trx_date, anomaly_type, level, success_count, failed_count,
                total_amount, total_count, currency, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(trx_date, anomaly_type) DO NOTHING",
            params![
                record.trx_date.format(DATE_FMT).to_string(),
                record.anomaly_type,
                record.level.as_str(),
                record.success_count,
                record.failed_count,
                record.total_amount,
                record.total_count,
                record.currency,
                record.created_at.format(TS_FMT).to_string(),
            ],
        )?;
        Ok(InsertOutcome::from_changes(changes))
    }

    fn summary_exists(&self, day: NaiveDate, anomaly_type: &str) -> PipelineResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM transactions_summary WHERE trx_date = ?1 AND anomaly_type = ?2)",
            params![day.format(DATE_FMT).to_string(), anomaly_type],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}
