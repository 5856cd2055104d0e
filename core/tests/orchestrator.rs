//! Engine: mode sequencing, run bookkeeping, dry-run, status and watch.

use medallion_core::{
    cancel::CancelToken,
    command::PipelineMode,
    config::PipelineConfig,
    engine::{self, ModeOutcome, PipelineEngine, RUN_STATUS_CANCELLED, RUN_STATUS_COMPLETED, RUN_STATUS_FAILED},
    error::PipelineError,
    stage::Layer,
    store::PipelineStore,
};
use std::path::PathBuf;

fn temp_db(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("medallion-{tag}-{}.db", uuid::Uuid::new_v4().simple()))
}

fn cleanup(path: &PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
}

fn generating_config(path: &str) -> PipelineConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = PipelineConfig::default_test();
    config.database.path = path.to_string();
    config.generator.enabled = true;
    config.generator.max_transactions = 25;
    config
}

fn in_memory_store() -> PipelineStore {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = PipelineStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

#[test]
fn complete_run_flows_through_every_layer() {
    let config = generating_config(":memory:");
    let mut engine =
        PipelineEngine::build(&config, PipelineMode::Complete, in_memory_store()).expect("build engine");
    assert_eq!(engine.layers(), vec![Layer::Bronze, Layer::Silver, Layer::Gold]);

    let outcome = engine.run(&CancelToken::new()).expect("run");
    assert!(outcome.is_success(), "run failed: {outcome:?}");

    let store = engine.store();
    assert_eq!(store.raw_count().unwrap(), 25);
    assert_eq!(store.classified_count().unwrap(), 25, "silver saw every bronze row");
    assert!(store.table_count("transactions_summary").unwrap() > 0, "gold materialized");

    let runs = store.recent_pipeline_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RUN_STATUS_COMPLETED);
    assert!(runs[0].finished_at.is_some());

    let layers = store.layer_runs(&outcome.run_id).unwrap();
    let names: Vec<&str> = layers.iter().map(|l| l.layer.as_str()).collect();
    assert_eq!(names, vec!["bronze", "silver", "gold"]);
    assert!(layers.iter().all(|l| l.status == RUN_STATUS_COMPLETED));

    let events = store.events_for_run(&outcome.run_id).unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types.first(), Some(&"run_started"));
    assert_eq!(types.last(), Some(&"run_finished"));
    assert!(types.contains(&"bronze_generated"));
    assert!(types.contains(&"silver_classified"));
    assert!(types.contains(&"gold_materialized"));
}

#[test]
fn single_layer_modes_register_one_stage() {
    let config = PipelineConfig::default_test();
    for (mode, layer) in [
        (PipelineMode::BronzeOnly, Layer::Bronze),
        (PipelineMode::SilverOnly, Layer::Silver),
        (PipelineMode::GoldOnly, Layer::Gold),
    ] {
        let engine = PipelineEngine::build(&config, mode, in_memory_store()).expect("build");
        assert_eq!(engine.layers(), vec![layer], "{mode}");
    }
}

#[test]
fn invalid_config_is_rejected_before_any_stage() {
    let mut config = PipelineConfig::default_test();
    config.generator.enabled = true;
    config.generator.max_transactions = 0;
    let result = PipelineEngine::build(&config, PipelineMode::Complete, in_memory_store());
    assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
}

#[test]
fn cancelled_run_skips_stages_and_is_recorded() {
    let config = PipelineConfig::default_test();
    let mut engine = PipelineEngine::build(&config, PipelineMode::Complete, in_memory_store()).expect("build");
    let cancel = CancelToken::new();
    cancel.cancel();
    let outcome = engine.run(&cancel).expect("run");
    assert_eq!(outcome.status, RUN_STATUS_CANCELLED);
    assert!(outcome.layers.is_empty());
    assert_eq!(engine.store().recent_pipeline_runs(1).unwrap()[0].status, RUN_STATUS_CANCELLED);
}

#[test]
fn failed_layer_bookkeeping_marks_the_run_failed() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = temp_db("bookkeeping");
    let store = PipelineStore::open(path.to_str().unwrap()).expect("open");
    store.migrate().unwrap();
    let conn = rusqlite::Connection::open(&path).expect("raw connection");
    conn.execute_batch(
        "CREATE TRIGGER refuse_layer_runs BEFORE INSERT ON layer_run
         BEGIN SELECT RAISE(ABORT, 'layer_run is read-only'); END;",
    )
    .expect("trigger");
    drop(conn);

    let config = PipelineConfig::default_test();
    let mut engine = PipelineEngine::build(&config, PipelineMode::SilverOnly, store).expect("build");
    assert!(engine.run(&CancelToken::new()).is_err());

    let runs = engine.store().recent_pipeline_runs(1).unwrap();
    assert_eq!(runs[0].status, RUN_STATUS_FAILED);
    assert!(runs[0].finished_at.is_some());
    assert!(runs[0].error_message.is_some());

    drop(engine);
    cleanup(&path);
}

#[test]
fn dry_run_against_unreachable_store_writes_nothing() {
    let dir = std::env::temp_dir().join(format!("medallion-missing-{}", uuid::Uuid::new_v4().simple()));
    let path = dir.join("pipeline.db");
    let mut config = PipelineConfig::default_test();
    config.database.path = path.display().to_string();

    let result = engine::execute(&config, PipelineMode::DryRun, &CancelToken::new());
    match result {
        Err(e) => assert!(e.is_connectivity(), "expected a connectivity error, got {e}"),
        Ok(outcome) => panic!("dry run should fail, got {outcome:?}"),
    }
    assert!(!path.exists(), "dry run must not create the database");
    assert!(!dir.exists(), "dry run must not create the directory");
}

#[test]
fn dry_run_on_a_migrated_store_reports_tables() {
    let path = temp_db("dry");
    let mut config = PipelineConfig::default_test();
    config.database.path = path.display().to_string();
    drop(engine::open_store(&config).expect("create store"));

    let outcome = engine::execute(&config, PipelineMode::DryRun, &CancelToken::new()).expect("dry run");
    match outcome {
        ModeOutcome::DryRun(dry) => {
            assert_eq!(dry.criteria, 5);
            assert_eq!(dry.stages, vec![Layer::Bronze, Layer::Silver, Layer::Gold]);
            assert!(dry.tables.iter().any(|(t, _)| t == "transactions_raw"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let store = PipelineStore::open(&config.database.path).expect("reopen");
    assert_eq!(store.table_count("pipeline_run").unwrap(), 0, "dry run records no run");
    drop(store);
    cleanup(&path);
}

#[test]
fn watch_repeats_with_fresh_engines_and_status_reports_them() {
    let path = temp_db("watch");
    let mut config = generating_config(&path.display().to_string());
    config.generator.max_transactions = 5;
    config.pipeline.interval_seconds = 1;

    let summary = engine::watch(&config, PipelineMode::Complete, &CancelToken::new(), Some(2)).expect("watch");
    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.succeeded, 2);

    let report = match engine::execute(&config, PipelineMode::Status, &CancelToken::new()).expect("status") {
        ModeOutcome::Status(report) => report,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(report.recent_runs.len(), 2);
    assert!(report.recent_runs.iter().all(|r| r.layers.len() == 3));
    assert_eq!(report.history.total_runs, 2);
    assert_eq!(report.history.successful_runs, 2);
    assert!(report.history.total_records_processed >= 10);

    // Same seed both ticks: the second batch is all duplicates.
    let store = PipelineStore::open(&config.database.path).expect("reopen");
    assert_eq!(store.raw_count().unwrap(), 5);
    assert_eq!(store.classified_count().unwrap(), 5);
    drop(store);
    cleanup(&path);
}

#[test]
fn watch_survives_failing_iterations() {
    let dir = std::env::temp_dir().join(format!("medallion-gone-{}", uuid::Uuid::new_v4().simple()));
    let mut config = PipelineConfig::default_test();
    config.database.path = dir.join("pipeline.db").display().to_string();
    config.pipeline.interval_seconds = 1;

    let summary = engine::watch(&config, PipelineMode::SilverOnly, &CancelToken::new(), Some(2)).expect("watch");
    assert_eq!(summary.iterations, 2, "a failed iteration does not stop the loop");
    assert_eq!(summary.failed, 2);
}

#[test]
fn introspection_modes_cannot_be_watched() {
    let config = PipelineConfig::default_test();
    let result = engine::watch(&config, PipelineMode::Status, &CancelToken::new(), Some(1));
    assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
}
