use crate::{
    clock::{ClockMode, DEFAULT_TZ_OFFSET_MINUTES},
    command::PipelineMode,
    error::{PipelineError, PipelineResult},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ── Generator ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub enabled: bool,
    pub rate_per_minute: u32,
    pub fraud_ratio: f64,
    pub repeat_probability: f64,
    /// 0 = unbounded.
    pub max_transactions: u64,
    /// Rows buffered before a bronze write.
    #[serde(alias = "csv_batch_size")]
    pub batch_size: usize,
    /// Write every event immediately, ignoring `batch_size`.
    pub realtime_write: bool,
    /// Rows kept in memory while the store is unreachable.
    pub retry_capacity: usize,
    pub progress_every: u64,
    pub timezone_offset_minutes: i32,
    pub clock: ClockMode,
    /// Seconds between events on a simulated clock.
    pub simulated_step_secs: i64,
    /// None = derive from wall time at startup.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_per_minute: 60,
            fraud_ratio: 0.25,
            repeat_probability: 0.15,
            max_transactions: 0,
            batch_size: 1,
            realtime_write: true,
            retry_capacity: 10_000,
            progress_every: 100,
            timezone_offset_minutes: DEFAULT_TZ_OFFSET_MINUTES,
            clock: ClockMode::Wall,
            simulated_step_secs: 60,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    pub fn effective_batch_size(&self) -> usize {
        if self.realtime_write {
            1
        } else {
            self.batch_size
        }
    }
}

// ── Pipeline / layers ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSection {
    pub name: String,
    pub mode: String,
    pub interval_seconds: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            name: "Bronze-Silver-Gold Data Pipeline".into(),
            mode: PipelineMode::Complete.as_str().into(),
            interval_seconds: 60,
        }
    }
}

/// Bronze and gold: an on/off switch only. Bronze batching is
/// `generator.batch_size`; gold folds a whole day at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayerConfig {
    pub enabled: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SilverConfig {
    pub enabled: bool,
    /// Bronze rows read per classification page.
    pub batch_size: usize,
}

impl Default for SilverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    /// Pipeline runs shown by the status view.
    pub history_limit: usize,
    pub history_days: i64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            history_limit: 10,
            history_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "pipeline.db".into(),
            busy_timeout_ms: 5_000,
        }
    }
}

// ── Root ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub generator: GeneratorConfig,
    pub pipeline: PipelineSection,
    pub bronze: LayerConfig,
    pub silver: SilverConfig,
    pub gold: LayerConfig,
    pub monitoring: MonitoringConfig,
    pub database: DatabaseConfig,
}

impl PipelineConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn mode(&self) -> PipelineResult<PipelineMode> {
        self.pipeline.mode.parse()
    }

    /// Reject out-of-range values before any stage runs.
    pub fn validate(&self) -> PipelineResult<()> {
        let g = &self.generator;
        let mut problems = Vec::new();

        if g.rate_per_minute == 0 {
            problems.push("generator.rate_per_minute must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&g.fraud_ratio) {
            problems.push(format!("generator.fraud_ratio {} not in [0, 1]", g.fraud_ratio));
        }
        if !(0.0..=1.0).contains(&g.repeat_probability) {
            problems.push(format!(
                "generator.repeat_probability {} not in [0, 1]",
                g.repeat_probability
            ));
        }
        if g.batch_size == 0 {
            problems.push("generator.batch_size must be > 0".to_string());
        }
        if g.retry_capacity < g.effective_batch_size() {
            problems.push("generator.retry_capacity must be >= batch size".to_string());
        }
        if g.progress_every == 0 {
            problems.push("generator.progress_every must be > 0".to_string());
        }
        if g.simulated_step_secs <= 0 {
            problems.push("generator.simulated_step_secs must be > 0".to_string());
        }
        if self.pipeline.interval_seconds == 0 {
            problems.push("pipeline.interval_seconds must be > 0".to_string());
        }
        if self.silver.batch_size == 0 {
            problems.push("silver.batch_size must be > 0".to_string());
        }
        if self.monitoring.history_days <= 0 {
            problems.push("monitoring.history_days must be > 0".to_string());
        }

        match self.mode() {
            Ok(mode) => {
                if g.enabled && mode.runs_bronze() && g.max_transactions == 0 {
                    problems.push(
                        "generator.max_transactions must be > 0 when the generator runs inside the pipeline"
                            .to_string(),
                    );
                }
            }
            Err(e) => problems.push(e.to_string()),
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig(problems.join("; ")))
        }
    }

    /// Minimal config for tests: simulated clock, fixed seed, generator off.
    pub fn default_test() -> Self {
        let mut config = Self::default();
        config.generator.clock = ClockMode::Simulated;
        config.generator.seed = Some(42);
        config.generator.simulated_step_secs = 30;
        config.database.path = ":memory:".into();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PipelineConfig::default().validate().expect("defaults are valid");
        PipelineConfig::default_test().validate().expect("test defaults are valid");
    }

    #[test]
    fn out_of_range_values_are_all_reported() {
        let mut config = PipelineConfig::default();
        config.generator.rate_per_minute = 0;
        config.generator.fraud_ratio = 1.5;
        config.pipeline.interval_seconds = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("rate_per_minute"), "{err}");
        assert!(err.contains("fraud_ratio"), "{err}");
        assert!(err.contains("interval_seconds"), "{err}");
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut config = PipelineConfig::default();
        config.pipeline.mode = "platinum-only".into();
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn inline_generator_must_be_bounded() {
        let mut config = PipelineConfig::default();
        config.generator.enabled = true;
        config.generator.max_transactions = 0;
        assert!(config.validate().is_err());
        config.generator.max_transactions = 100;
        assert!(config.validate().is_ok());
        // gold-only never runs the generator
        config.generator.max_transactions = 0;
        config.pipeline.mode = "gold-only".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults_and_accepts_legacy_batch_key() {
        let json = r#"{
            "generator": { "fraud_ratio": 0.5, "csv_batch_size": 25, "realtime_write": false },
            "pipeline": { "mode": "silver-only" }
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.generator.fraud_ratio, 0.5);
        assert_eq!(config.generator.batch_size, 25);
        assert_eq!(config.generator.effective_batch_size(), 25);
        assert_eq!(config.generator.rate_per_minute, 60);
        assert_eq!(config.mode().unwrap(), PipelineMode::SilverOnly);
        assert!(config.gold.enabled);
    }

    #[test]
    fn only_silver_has_a_batch_size() {
        let mut config = PipelineConfig::default();
        config.silver.batch_size = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("silver.batch_size"), "{err}");

        // Older files that still carry bronze/gold batch sizes keep parsing.
        let json = r#"{
            "bronze": { "enabled": false, "batch_size": 500 },
            "silver": { "batch_size": 250 },
            "gold": { "batch_size": 0 }
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).expect("parse");
        assert!(!config.bronze.enabled);
        assert_eq!(config.silver.batch_size, 250);
        assert!(config.gold.enabled);
        config.validate().expect("gold batch size is ignored");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = PipelineConfig::load("/nonexistent/dir/pipeline_config.json").expect("defaults");
        assert_eq!(config, PipelineConfig::default());
    }
}
