//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Stages call store methods (through the capability traits in
//! `layers`); they never execute SQL directly.
//!
//! RULE: Every layer write is conditional on a uniqueness constraint
//! (`INSERT ... ON CONFLICT DO NOTHING`). Nothing blindly appends.

use crate::{
    error::{PipelineError, PipelineResult},
    event::EventLogEntry,
    model::{DATE_FMT, TIME_FMT, TS_FMT},
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, types::Type, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

mod account;
mod bronze;
mod gold;
pub mod layers;
mod silver;

pub use layers::{
    AccountSource, BronzeSink, Decoded, GoldLayer, InsertOutcome, PendingRaw, RawKey, SilverLayer, UndecodableRow,
};

/// Tables a store must carry before any stage may run.
pub const REQUIRED_TABLES: &[&str] = &[
    "pipeline_run",
    "layer_run",
    "event_log",
    "account",
    "transactions_raw",
    "criteria",
    "transactions",
    "transactions_normal",
    "transactions_abnormal",
    "transactions_summary",
];

pub struct PipelineStore {
    conn: Connection,
}

impl PipelineStore {
    /// Open (or create) the pipeline database at `path`.
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| unreachable_store(path, e))?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_millis(5_000))?;
        Ok(Self { conn })
    }

    /// Open an existing database without create permission and with
    /// writes disabled. Used by dry-run and the introspection modes.
    pub fn open_read_only(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| unreachable_store(path, e))?;
        conn.execute_batch("PRAGMA query_only=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    pub fn set_busy_timeout(&self, millis: u64) -> PipelineResult<()> {
        self.conn
            .busy_timeout(std::time::Duration::from_millis(millis))?;
        Ok(())
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_bronze.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_silver.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_gold.sql"))?;
        Ok(())
    }

    // ── Connectivity / schema checks ───────────────────────────

    /// Round-trip a trivial query.
    pub fn ping(&self) -> PipelineResult<()> {
        let one: i64 = self.conn.query_row("SELECT 1", [], |row| row.get(0))?;
        debug_assert_eq!(one, 1);
        Ok(())
    }

    pub fn table_exists(&self, table: &str) -> PipelineResult<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Fails on the first missing required table.
    pub fn check_schema(&self) -> PipelineResult<()> {
        for table in REQUIRED_TABLES {
            if !self.table_exists(table)? {
                return Err(PipelineError::MissingTable {
                    table: table.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Row count of one required table.
    pub fn table_count(&self, table: &str) -> PipelineResult<i64> {
        if !REQUIRED_TABLES.contains(&table) {
            return Err(PipelineError::MissingTable {
                table: table.to_string(),
            });
        }
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    // ── Pipeline runs ──────────────────────────────────────────

    pub fn insert_pipeline_run(&self, run_id: &str, mode: &str, started_at: &str) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO pipeline_run (run_id, mode, status, started_at) VALUES (?1, ?2, 'running', ?3)",
            params![run_id, mode, started_at],
        )?;
        Ok(())
    }

    pub fn finish_pipeline_run(
        &self,
        run_id: &str,
        status: &str,
        finished_at: &str,
        error_message: Option<&str>,
    ) -> PipelineResult<()> {
        self.conn.execute(
            "UPDATE pipeline_run SET status = ?1, finished_at = ?2, error_message = ?3 WHERE run_id = ?4",
            params![status, finished_at, error_message, run_id],
        )?;
        Ok(())
    }

    pub fn insert_layer_run(&self, row: &LayerRunRow) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO layer_run (run_id, layer, status, records_processed, records_failed, duration_ms, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(run_id, layer) DO NOTHING",
            params![
                row.run_id,
                row.layer,
                row.status,
                row.records_processed,
                row.records_failed,
                row.duration_ms,
                row.error_message,
            ],
        )?;
        Ok(())
    }

    pub fn recent_pipeline_runs(&self, limit: usize) -> PipelineResult<Vec<PipelineRunRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, mode, status, started_at, finished_at, error_message
             FROM pipeline_run ORDER BY started_at DESC, run_id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(PipelineRunRow {
                run_id: row.get(0)?,
                mode: row.get(1)?,
                status: row.get(2)?,
                started_at: row.get(3)?,
                finished_at: row.get(4)?,
                error_message: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn layer_runs(&self, run_id: &str) -> PipelineResult<Vec<LayerRunRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, layer, status, records_processed, records_failed, duration_ms, error_message
             FROM layer_run WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(LayerRunRow {
                run_id: row.get(0)?,
                layer: row.get(1)?,
                status: row.get(2)?,
                records_processed: row.get(3)?,
                records_failed: row.get(4)?,
                duration_ms: row.get(5)?,
                error_message: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Aggregate of finished runs started at or after `since`.
    pub fn run_history_since(&self, since: &str) -> PipelineResult<RunHistorySummary> {
        let (total, succeeded, avg_ms): (i64, i64, Option<f64>) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                    AVG((julianday(finished_at) - julianday(started_at)) * 86400000.0)
             FROM pipeline_run
             WHERE started_at >= ?1 AND finished_at IS NOT NULL",
            params![since],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let records: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(l.records_processed), 0)
             FROM layer_run l JOIN pipeline_run p ON p.run_id = l.run_id
             WHERE p.started_at >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        Ok(RunHistorySummary {
            total_runs: total,
            successful_runs: succeeded,
            failed_runs: total - succeeded,
            average_duration_ms: avg_ms.unwrap_or(0.0),
            total_records_processed: records,
        })
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, layer, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.layer,
                entry.event_type,
                entry.payload,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> PipelineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, layer, event_type, payload, created_at
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    layer: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn unreachable_store(path: &str, err: rusqlite::Error) -> PipelineError {
    PipelineError::StoreUnreachable {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

// ── Column parsing helpers ────────────────────────────────────────────────────

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

pub(crate) fn parse_date_col(raw: &str, idx: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FMT)
        .map_err(|e| conversion_error(idx, format!("bad date '{raw}': {e}")))
}

pub(crate) fn parse_time_col(raw: &str, idx: usize) -> rusqlite::Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, TIME_FMT)
        .map_err(|e| conversion_error(idx, format!("bad time '{raw}': {e}")))
}

pub(crate) fn parse_ts_col(raw: &str, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FMT)
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{raw}': {e}")))
}

/// Decode one row on its own. A column that fails to convert yields an
/// `UndecodableRow` named by the `id_idx` column instead of failing the
/// whole read; statement and I/O errors still propagate.
pub(crate) fn decode_row<T>(
    row: &Row<'_>,
    id_idx: usize,
    decode: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Decoded<T>> {
    match decode(row) {
        Ok(value) => Ok(Ok(value)),
        Err(e) if is_decode_error(&e) => {
            let id = row
                .get::<_, Option<String>>(id_idx)
                .ok()
                .flatten()
                .unwrap_or_default();
            Ok(Err(UndecodableRow {
                id,
                reason: e.to_string(),
            }))
        }
        Err(e) => Err(e),
    }
}

fn is_decode_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
    )
}

pub(crate) fn parse_code_col(raw: &str, idx: usize) -> rusqlite::Result<char> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(conversion_error(idx, format!("criterion code '{raw}' is not one character"))),
    }
}

// ── Row types ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PipelineRunRow {
    pub run_id: String,
    pub mode: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LayerRunRow {
    pub run_id: String,
    pub layer: String,
    pub status: String,
    pub records_processed: i64,
    pub records_failed: i64,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunHistorySummary {
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub average_duration_ms: f64,
    pub total_records_processed: i64,
}

impl RunHistorySummary {
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.successful_runs as f64 * 100.0 / self.total_runs as f64
        }
    }
}
