//! medallion-core: bronze/silver/gold transfer anomaly pipeline.
//!
//! Data flows one way: generator → bronze → silver → gold. Each layer is
//! written only through "insert if absent", so every stage can be re-run.

pub mod bronze_writer;
pub mod cancel;
pub mod clock;
pub mod command;
pub mod config;
pub mod criteria;
pub mod engine;
pub mod error;
pub mod event;
pub mod generator;
pub mod gold_aggregator;
pub mod model;
pub mod name_generator;
pub mod rng;
pub mod silver_classifier;
pub mod stage;
pub mod store;
pub mod types;
