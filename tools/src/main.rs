//! pipeline-runner: orchestrates the bronze, silver and gold stages.
//!
//! Usage:
//!   pipeline-runner --mode complete --db pipeline.db
//!   pipeline-runner --mode silver-only --watch --interval 30
//!   pipeline-runner --dry-run | --status | --config
//!   pipeline-runner --generate --max-transactions 500 --seed 7

mod cli;

use anyhow::{bail, Result};
use cli::{cancel_on_interrupt, has_flag, init_logging, parse_arg, parse_opt};
use medallion_core::{
    cancel::CancelToken,
    command::PipelineMode,
    config::PipelineConfig,
    engine::{self, DryRunOutcome, ModeOutcome, RunOutcome, StatusReport},
};
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config_file = parse_arg(&args, "--config-file", "pipeline_config.json".to_string());
    let mut config = PipelineConfig::load(&config_file)?;
    apply_overrides(&mut config, &args);

    let verbose = has_flag(&args, &["--verbose", "-v"]);
    init_logging(verbose, &config.monitoring.log_level);

    let mode = if has_flag(&args, &["--dry-run"]) {
        PipelineMode::DryRun
    } else if has_flag(&args, &["--status"]) {
        PipelineMode::Status
    } else if has_flag(&args, &["--config"]) {
        PipelineMode::Config
    } else {
        match parse_opt::<String>(&args, "--mode") {
            Some(raw) => raw.parse()?,
            None => config.mode()?,
        }
    };

    println!("{}", config.pipeline.name);
    println!("  mode:      {mode}");
    println!("  db:        {}", config.database.path);
    println!();

    let cancel = CancelToken::new();
    cancel_on_interrupt(&cancel)?;

    if has_flag(&args, &["--watch"]) {
        let summary = engine::watch(&config, mode, &cancel, None)?;
        println!("=== WATCH SUMMARY ===");
        println!("  iterations: {}", summary.iterations);
        println!("  succeeded:  {}", summary.succeeded);
        println!("  failed:     {}", summary.failed);
        return Ok(());
    }

    let outcome = engine::execute(&config, mode, &cancel)?;
    print_outcome(&outcome)?;
    if !outcome.is_success() {
        bail!("pipeline run did not complete");
    }
    Ok(())
}

fn apply_overrides(config: &mut PipelineConfig, args: &[String]) {
    if let Some(db) = parse_opt::<String>(args, "--db") {
        config.database.path = db;
    }
    if let Some(interval) = parse_opt(args, "--interval") {
        config.pipeline.interval_seconds = interval;
    }
    if let Some(seed) = parse_opt(args, "--seed") {
        config.generator.seed = Some(seed);
    }
    if has_flag(args, &["--generate"]) {
        config.generator.enabled = true;
    }
    if let Some(max) = parse_opt(args, "--max-transactions") {
        config.generator.max_transactions = max;
    }
}

fn print_outcome(outcome: &ModeOutcome) -> Result<()> {
    match outcome {
        ModeOutcome::Run(run) => print_run(run),
        ModeOutcome::DryRun(dry) => print_dry_run(dry),
        ModeOutcome::Status(status) => print_status(status),
        ModeOutcome::Config { effective } => {
            println!("=== EFFECTIVE CONFIGURATION ===");
            println!("{}", serde_json::to_string_pretty(effective)?);
        }
    }
    Ok(())
}

fn print_run(run: &RunOutcome) {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:     {}", run.run_id);
    println!("  mode:       {}", run.mode);
    println!("  status:     {}", run.status);
    println!("  duration:   {} ms", run.duration_ms);
    println!("  processed:  {}", run.records_processed());
    for layer in &run.layers {
        println!(
            "  {:<7} {:<10} processed {:>6}  failed {:>4}  {:>6} ms{}",
            layer.layer.as_str(),
            layer.status,
            layer.processed,
            layer.failed,
            layer.duration_ms,
            layer.error.as_deref().map(|e| format!("  ({e})")).unwrap_or_default()
        );
    }
}

fn print_dry_run(dry: &DryRunOutcome) {
    println!("=== DRY RUN ===");
    println!("  store:      {} (reachable, schema complete)", dry.path);
    println!("  criteria:   {}", dry.criteria);
    let stages: Vec<&str> = dry.stages.iter().map(|l| l.as_str()).collect();
    println!("  {} would run: {}", dry.mode, stages.join(" -> "));
    for (table, count) in &dry.tables {
        println!("  {table:<24} {count:>8} rows");
    }
}

fn print_status(status: &StatusReport) {
    println!("=== PIPELINE STATUS ===");
    println!("  store: {}", status.path);
    if status.recent_runs.is_empty() {
        println!("  (No runs recorded yet)");
    }
    for entry in &status.recent_runs {
        let run = &entry.run;
        println!(
            "  {}  {:<12} {:<10} started {}",
            run.run_id, run.mode, run.status, run.started_at
        );
        for layer in &entry.layers {
            println!(
                "      {:<7} {:<10} processed {:>6}  failed {:>4}  {:>6} ms",
                layer.layer, layer.status, layer.records_processed, layer.records_failed, layer.duration_ms
            );
        }
    }
    let h = &status.history;
    println!();
    println!("=== LAST {} DAYS ===", status.history_days);
    println!("  runs:         {}", h.total_runs);
    println!("  successful:   {}", h.successful_runs);
    println!("  failed:       {}", h.failed_runs);
    println!("  success rate: {:.1}%", h.success_rate());
    println!("  avg duration: {:.0} ms", h.average_duration_ms);
    println!("  records:      {}", h.total_records_processed);
}
