//! trx-generator: standalone transfer generator writing to the bronze layer.
//!
//! Usage:
//!   trx-generator --rate 120 --fraud-ratio 0.25 --db pipeline.db
//!   trx-generator --max-transactions 1000 --batch-size 50 --seed 42

#[path = "../cli.rs"]
mod cli;

use anyhow::Result;
use cli::{cancel_on_interrupt, has_flag, init_logging, parse_arg, parse_opt};
use medallion_core::{
    bronze_writer::BronzeWriter,
    cancel::CancelToken,
    config::PipelineConfig,
    engine::open_store,
    generator::TransactionGenerator,
};
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config_file = parse_arg(&args, "--config-file", "pipeline_config.json".to_string());
    let mut config = PipelineConfig::load(&config_file)?;

    let g = &mut config.generator;
    g.rate_per_minute = parse_arg(&args, "--rate", g.rate_per_minute);
    g.fraud_ratio = parse_arg(&args, "--fraud-ratio", g.fraud_ratio);
    g.repeat_probability = parse_arg(&args, "--repeat-prob", g.repeat_probability);
    g.max_transactions = parse_arg(&args, "--max-transactions", g.max_transactions);
    if let Some(batch) = parse_opt(&args, "--batch-size") {
        g.batch_size = batch;
        g.realtime_write = false;
    }
    if let Some(seed) = parse_opt(&args, "--seed") {
        g.seed = Some(seed);
    }
    if let Some(db) = parse_opt::<String>(&args, "--db") {
        config.database.path = db;
    }

    init_logging(has_flag(&args, &["--verbose", "-v"]), &config.monitoring.log_level);

    // Standalone generation may be unbounded, so only the generator
    // section is checked against the bronze-only rules.
    let mut check = config.clone();
    check.pipeline.mode = "bronze-only".into();
    check.generator.enabled = false;
    check.validate()?;

    let g = &config.generator;
    println!("Transfer generator");
    println!("  rate:         {}/min", g.rate_per_minute);
    println!("  fraud ratio:  {}", g.fraud_ratio);
    println!("  repeat prob:  {}", g.repeat_probability);
    println!(
        "  max:          {}",
        if g.max_transactions == 0 { "unbounded".to_string() } else { g.max_transactions.to_string() }
    );
    println!("  batch size:   {}", g.effective_batch_size());
    println!("  db:           {}", config.database.path);
    println!();

    let cancel = CancelToken::new();
    cancel_on_interrupt(&cancel)?;

    let store = open_store(&config)?;
    let mut generator = TransactionGenerator::from_source(config.generator.clone(), &store);
    let mut writer = BronzeWriter::from_config(&store, &config.generator);
    let stats = generator.run(&mut writer, &cancel)?;
    let closing = writer.close()?;

    println!("=== GENERATOR SUMMARY ===");
    println!("  generated:  {}", stats.generated);
    println!("  fraud:      {}", stats.fraud);
    println!("  repeats:    {}", stats.repeats);
    println!("  alerts:     {}", stats.alerts);
    println!("  inserted:   {}", stats.inserted + closing.inserted);
    println!("  skipped:    {}", stats.skipped + closing.skipped);
    println!("  rejected:   {}", stats.rejected);
    if closing.deferred > 0 {
        println!("  unwritten:  {}", closing.deferred);
    }
    println!("  suspicious beneficiaries: {}", generator.suspicious_beneficiaries());
    Ok(())
}
