//! The pipeline engine: sequences the layer stages for one run.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Bronze stage  (inline generator + raw snapshot)
//!   2. Silver stage  (classification)
//!   3. Gold stage    (aggregation)
//!
//! RULES:
//!   - The mode selects a subset; it never changes the order.
//!   - Configuration is validated before any stage runs.
//!   - Stages communicate only through the rows they write.
//!   - A failed stage stops the run; later stages do not see partial input.
//!   - Every stage-running mode records a pipeline_run row, one layer_run
//!     row per stage and the stage events in event_log.
//!   - dry-run, status and config open the store read-only and never write.

use crate::{
    bronze_writer::BronzeStage,
    cancel::CancelToken,
    command::PipelineMode,
    config::PipelineConfig,
    error::{PipelineError, PipelineResult},
    event::{EventLogEntry, PipelineEvent},
    gold_aggregator::GoldStage,
    model::TS_FMT,
    silver_classifier::SilverStage,
    stage::{Layer, PipelineStage, StageReport},
    store::{LayerRunRow, PipelineRunRow, PipelineStore, RunHistorySummary, SilverLayer, REQUIRED_TABLES},
    types::RunId,
};
use chrono::{Duration, Local};
use serde::Serialize;
use std::time::Instant;

pub const RUN_STATUS_RUNNING: &str = "running";
pub const RUN_STATUS_COMPLETED: &str = "completed";
pub const RUN_STATUS_FAILED: &str = "failed";
pub const RUN_STATUS_CANCELLED: &str = "cancelled";

fn now_string() -> String {
    Local::now().naive_local().format(TS_FMT).to_string()
}

pub fn new_run_id() -> RunId {
    let stamp = Local::now().format("%Y%m%d%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{stamp}-{}", &suffix[..8])
}

// ── Outcomes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LayerOutcome {
    pub layer: Layer,
    pub status: String,
    pub processed: u64,
    pub failed: u64,
    pub duration_ms: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub mode: PipelineMode,
    pub status: String,
    pub layers: Vec<LayerOutcome>,
    pub duration_ms: i64,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RUN_STATUS_COMPLETED
    }

    pub fn records_processed(&self) -> u64 {
        self.layers.iter().map(|l| l.processed).sum()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DryRunOutcome {
    pub path: String,
    pub mode: PipelineMode,
    pub stages: Vec<Layer>,
    pub tables: Vec<(String, i64)>,
    pub criteria: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunWithLayers {
    pub run: PipelineRunRow,
    pub layers: Vec<LayerRunRow>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusReport {
    pub path: String,
    pub recent_runs: Vec<RunWithLayers>,
    pub history_days: i64,
    pub history: RunHistorySummary,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModeOutcome {
    Run(RunOutcome),
    DryRun(DryRunOutcome),
    Status(StatusReport),
    Config { effective: PipelineConfig },
}

impl ModeOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            Self::Run(run) => run.is_success(),
            Self::DryRun(_) | Self::Status(_) | Self::Config { .. } => true,
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct PipelineEngine {
    pub run_id: RunId,
    mode: PipelineMode,
    stages: Vec<Box<dyn PipelineStage>>,
    store: PipelineStore,
}

impl PipelineEngine {
    pub fn new(run_id: RunId, mode: PipelineMode, store: PipelineStore) -> Self {
        Self {
            run_id,
            mode,
            stages: Vec::new(),
            store,
        }
    }

    /// Build a fully wired engine for `mode`.
    /// Call this instead of new() + manual register() calls.
    pub fn build(config: &PipelineConfig, mode: PipelineMode, store: PipelineStore) -> PipelineResult<Self> {
        let mut effective = config.clone();
        effective.pipeline.mode = mode.as_str().to_string();
        effective.validate()?;
        if !mode.writes() {
            return Err(PipelineError::InvalidConfig(format!(
                "mode '{mode}' does not run stages"
            )));
        }

        let mut engine = PipelineEngine::new(new_run_id(), mode, store);

        // EXECUTION ORDER: fixed, never reordered.
        if mode.runs_bronze() && effective.bronze.enabled {
            engine.register(Box::new(BronzeStage::new(effective.generator.clone())));
        }
        if mode.runs_silver() && effective.silver.enabled {
            engine.register(Box::new(SilverStage::new(effective.silver.batch_size)));
        }
        if mode.runs_gold() && effective.gold.enabled {
            engine.register(Box::new(GoldStage::new()));
        }
        Ok(engine)
    }

    /// Register a stage. Call in the documented execution order.
    pub fn register(&mut self, stage: Box<dyn PipelineStage>) {
        self.stages.push(stage);
    }

    pub fn layers(&self) -> Vec<Layer> {
        self.stages.iter().map(|s| s.layer()).collect()
    }

    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    /// Run every registered stage once, in order.
    ///
    /// Returns Err only when the run bookkeeping itself cannot be written;
    /// a failed stage yields an outcome with status "failed".
    pub fn run(&mut self, cancel: &CancelToken) -> PipelineResult<RunOutcome> {
        let started = Instant::now();
        self.store
            .insert_pipeline_run(&self.run_id, self.mode.as_str(), &now_string())?;
        self.persist(
            "engine",
            &PipelineEvent::RunStarted {
                run_id: self.run_id.clone(),
                mode: self.mode.as_str().to_string(),
            },
        )?;
        log::info!("Run {} started in {} mode", self.run_id, self.mode);

        let mut status = RUN_STATUS_COMPLETED;
        let mut first_error: Option<String> = None;
        let mut layers = Vec::with_capacity(self.stages.len());

        for stage in &mut self.stages {
            let layer = stage.layer();
            if cancel.is_cancelled() {
                log::info!("Run {}: cancelled before {layer}", self.run_id);
                status = RUN_STATUS_CANCELLED;
                break;
            }

            let stage_started = Instant::now();
            let result = stage.run(&self.store, cancel);
            let duration_ms = stage_started.elapsed().as_millis() as i64;

            let outcome = match result {
                Ok(report) => {
                    if let Err(e) = persist_events(&self.store, &self.run_id, layer, &report) {
                        log::error!("Run {}: could not record {layer} events: {e}", self.run_id);
                        return Err(abandon(&self.store, &self.run_id, e));
                    }
                    LayerOutcome {
                        layer,
                        status: RUN_STATUS_COMPLETED.to_string(),
                        processed: report.processed,
                        failed: report.failed,
                        duration_ms,
                        error: None,
                    }
                }
                Err(e) => {
                    log::error!("Run {}: {layer} stage failed: {e}", self.run_id);
                    LayerOutcome {
                        layer,
                        status: RUN_STATUS_FAILED.to_string(),
                        processed: 0,
                        failed: 0,
                        duration_ms,
                        error: Some(e.to_string()),
                    }
                }
            };

            let row = LayerRunRow {
                run_id: self.run_id.clone(),
                layer: layer.as_str().to_string(),
                status: outcome.status.clone(),
                records_processed: outcome.processed as i64,
                records_failed: outcome.failed as i64,
                duration_ms,
                error_message: outcome.error.clone(),
            };
            let failed = outcome.error.clone();
            layers.push(outcome);

            if let Err(e) = self.store.insert_layer_run(&row) {
                log::error!("Run {}: could not record {layer} layer run: {e}", self.run_id);
                return Err(abandon(&self.store, &self.run_id, e));
            }
            if let Some(err) = failed {
                status = RUN_STATUS_FAILED;
                first_error = Some(err);
                break;
            }
        }

        self.store.finish_pipeline_run(
            &self.run_id,
            status,
            &now_string(),
            first_error.as_deref(),
        )?;
        self.persist(
            "engine",
            &PipelineEvent::RunFinished {
                run_id: self.run_id.clone(),
                success: status == RUN_STATUS_COMPLETED,
            },
        )?;

        let outcome = RunOutcome {
            run_id: self.run_id.clone(),
            mode: self.mode,
            status: status.to_string(),
            layers,
            duration_ms: started.elapsed().as_millis() as i64,
        };
        log::info!(
            "Run {} {} in {} ms, {} records processed",
            outcome.run_id,
            outcome.status,
            outcome.duration_ms,
            outcome.records_processed()
        );
        Ok(outcome)
    }

    fn persist(&self, layer: &str, event: &PipelineEvent) -> PipelineResult<()> {
        append(&self.store, &self.run_id, layer, event)
    }
}

fn append(store: &PipelineStore, run_id: &str, layer: &str, event: &PipelineEvent) -> PipelineResult<()> {
    let entry = EventLogEntry {
        id: None,
        run_id: run_id.to_string(),
        layer: layer.to_string(),
        event_type: event.type_name().to_string(),
        payload: serde_json::to_string(event)?,
        created_at: now_string(),
    };
    store.append_event(&entry)
}

/// Mark a run FAILED after a bookkeeping write fails mid-run, so it does
/// not stay "running". The original error is handed back.
fn abandon(store: &PipelineStore, run_id: &str, err: PipelineError) -> PipelineError {
    if let Err(e) = store.finish_pipeline_run(run_id, RUN_STATUS_FAILED, &now_string(), Some(&err.to_string())) {
        log::warn!("Run {run_id}: could not mark the run failed: {e}");
    }
    err
}

fn persist_events(store: &PipelineStore, run_id: &str, layer: Layer, report: &StageReport) -> PipelineResult<()> {
    for event in &report.events {
        append(store, run_id, layer.as_str(), event)?;
    }
    Ok(())
}

// ── Store access ─────────────────────────────────────────────────────────────

/// Open (creating if needed) and migrate the configured store.
pub fn open_store(config: &PipelineConfig) -> PipelineResult<PipelineStore> {
    let store = if config.database.path == ":memory:" {
        PipelineStore::in_memory()?
    } else {
        PipelineStore::open(&config.database.path)?
    };
    store.set_busy_timeout(config.database.busy_timeout_ms)?;
    store.migrate()?;
    Ok(store)
}

/// Stages `mode` would run under `config`, in execution order.
pub fn planned_layers(config: &PipelineConfig, mode: PipelineMode) -> Vec<Layer> {
    let mut layers = Vec::new();
    if mode.runs_bronze() && config.bronze.enabled {
        layers.push(Layer::Bronze);
    }
    if mode.runs_silver() && config.silver.enabled {
        layers.push(Layer::Silver);
    }
    if mode.runs_gold() && config.gold.enabled {
        layers.push(Layer::Gold);
    }
    layers
}

// ── Read-only modes ──────────────────────────────────────────────────────────

/// Validate config and store without writing anything.
///
/// The store is opened read-only without create permission, so a missing
/// file or directory fails with `StoreUnreachable` and leaves nothing
/// behind.
pub fn dry_run(config: &PipelineConfig) -> PipelineResult<DryRunOutcome> {
    config.validate()?;
    let mode = match config.mode()? {
        m if m.writes() => m,
        _ => PipelineMode::Complete,
    };
    let path = config.database.path.clone();
    let store = PipelineStore::open_read_only(&path)?;
    store.ping()?;
    store.check_schema()?;

    let mut tables = Vec::with_capacity(REQUIRED_TABLES.len());
    for table in REQUIRED_TABLES {
        tables.push((table.to_string(), store.table_count(table)?));
    }
    let criteria = store.load_criteria()?.len();
    if criteria == 0 {
        log::warn!("Dry run: criteria catalog is empty");
    }
    let stages = planned_layers(config, mode);
    log::info!("Dry run OK: {path} reachable, schema complete, {mode} would run {stages:?}");
    Ok(DryRunOutcome {
        path,
        mode,
        stages,
        tables,
        criteria,
    })
}

/// Recent runs and the aggregate over the configured history window.
pub fn status(config: &PipelineConfig) -> PipelineResult<StatusReport> {
    let path = config.database.path.clone();
    let store = PipelineStore::open_read_only(&path)?;
    store.check_schema()?;

    let mut recent_runs = Vec::new();
    for run in store.recent_pipeline_runs(config.monitoring.history_limit)? {
        let layers = store.layer_runs(&run.run_id)?;
        recent_runs.push(RunWithLayers { run, layers });
    }
    let since = Local::now().naive_local() - Duration::days(config.monitoring.history_days);
    let history = store.run_history_since(&since.format(TS_FMT).to_string())?;
    Ok(StatusReport {
        path,
        recent_runs,
        history_days: config.monitoring.history_days,
        history,
    })
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// Run one mode once.
pub fn execute(config: &PipelineConfig, mode: PipelineMode, cancel: &CancelToken) -> PipelineResult<ModeOutcome> {
    let mut effective = config.clone();
    effective.pipeline.mode = mode.as_str().to_string();
    effective.validate()?;

    match mode {
        PipelineMode::DryRun => dry_run(&effective).map(ModeOutcome::DryRun),
        PipelineMode::Status => status(&effective).map(ModeOutcome::Status),
        PipelineMode::Config => Ok(ModeOutcome::Config { effective }),
        _ => {
            let store = open_store(&effective)?;
            let mut engine = PipelineEngine::build(&effective, mode, store)?;
            engine.run(cancel).map(ModeOutcome::Run)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchSummary {
    pub iterations: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Repeat `mode` every `pipeline.interval_seconds` until cancelled (or
/// until `max_iterations`, when given).
///
/// Each iteration opens its own store and builds a fresh engine. A failed
/// iteration is logged and the loop waits for the next tick.
pub fn watch(
    config: &PipelineConfig,
    mode: PipelineMode,
    cancel: &CancelToken,
    max_iterations: Option<u64>,
) -> PipelineResult<WatchSummary> {
    if !mode.is_watchable() {
        return Err(PipelineError::InvalidConfig(format!("mode '{mode}' cannot be watched")));
    }
    let mut effective = config.clone();
    effective.pipeline.mode = mode.as_str().to_string();
    effective.validate()?;

    let interval = std::time::Duration::from_secs(effective.pipeline.interval_seconds);
    let mut summary = WatchSummary::default();
    log::info!("Watching {mode} every {}s", effective.pipeline.interval_seconds);

    while !cancel.is_cancelled() {
        summary.iterations += 1;
        match execute(&effective, mode, cancel) {
            Ok(outcome) if outcome.is_success() => summary.succeeded += 1,
            Ok(_) => {
                log::warn!("Watch iteration {} did not complete", summary.iterations);
                summary.failed += 1;
            }
            Err(e) => {
                log::error!("Watch iteration {} failed: {e}", summary.iterations);
                summary.failed += 1;
            }
        }
        if max_iterations.is_some_and(|max| summary.iterations >= max) {
            break;
        }
        if !cancel.sleep(interval) {
            break;
        }
    }
    log::info!(
        "Watch stopped after {} iterations ({} ok, {} failed)",
        summary.iterations,
        summary.succeeded,
        summary.failed
    );
    Ok(summary)
}
