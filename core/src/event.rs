//! Pipeline events: what each stage did, appended to `event_log`.
//!
//! RULE: events describe stage outcomes only. Per-transaction rule
//! evaluations are never logged here; the silver row is the record.

use crate::types::{RunId, TransactionId};
use serde::{Deserialize, Serialize};

/// Every event a pipeline run may emit.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // ── Run lifecycle ──────────────────────────────
    RunStarted {
        run_id: RunId,
        mode: String,
    },
    RunFinished {
        run_id: RunId,
        success: bool,
    },

    // ── Bronze ─────────────────────────────────────
    BronzeGenerated {
        generated: u64,
        fraud: u64,
        inserted: u64,
        skipped: u64,
    },
    BronzeSnapshot {
        accounts: i64,
        raw_transactions: i64,
    },

    // ── Silver ─────────────────────────────────────
    CriteriaLoaded {
        count: usize,
    },
    SilverClassified {
        classified: u64,
        inserted: u64,
        skipped: u64,
        anomalies: u64,
        failed: u64,
    },
    RowRejected {
        id: TransactionId,
        reason: String,
    },

    // ── Gold ───────────────────────────────────────
    GoldMaterialized {
        days: usize,
        normal_inserted: u64,
        abnormal_inserted: u64,
        summary_inserted: u64,
        skipped: u64,
        rejected: u64,
    },

    // ── Degraded modes ─────────────────────────────
    Degraded {
        reason: String,
    },
}

impl PipelineEvent {
    /// Stable name stored in the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunFinished { .. } => "run_finished",
            Self::BronzeGenerated { .. } => "bronze_generated",
            Self::BronzeSnapshot { .. } => "bronze_snapshot",
            Self::CriteriaLoaded { .. } => "criteria_loaded",
            Self::SilverClassified { .. } => "silver_classified",
            Self::RowRejected { .. } => "row_rejected",
            Self::GoldMaterialized { .. } => "gold_materialized",
            Self::Degraded { .. } => "degraded",
        }
    }
}

/// A persisted event_log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub layer: String,
    pub event_type: String,
    pub payload: String,
    pub created_at: String,
}
