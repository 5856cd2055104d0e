use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Every mode the orchestrator accepts.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineMode {
    // ── Stage-running modes ───────────────────────
    Complete,
    BronzeOnly,
    SilverOnly,
    GoldOnly,

    // ── Validation and introspection ──────────────
    DryRun,
    Status,
    Config,
}

impl PipelineMode {
    pub const ALL: [PipelineMode; 7] = [
        Self::Complete,
        Self::BronzeOnly,
        Self::SilverOnly,
        Self::GoldOnly,
        Self::DryRun,
        Self::Status,
        Self::Config,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::BronzeOnly => "bronze-only",
            Self::SilverOnly => "silver-only",
            Self::GoldOnly => "gold-only",
            Self::DryRun => "dry-run",
            Self::Status => "status",
            Self::Config => "config",
        }
    }

    pub fn runs_bronze(&self) -> bool {
        matches!(self, Self::Complete | Self::BronzeOnly)
    }

    pub fn runs_silver(&self) -> bool {
        matches!(self, Self::Complete | Self::SilverOnly)
    }

    pub fn runs_gold(&self) -> bool {
        matches!(self, Self::Complete | Self::GoldOnly)
    }

    /// Modes that may write to any layer.
    pub fn writes(&self) -> bool {
        self.runs_bronze() || self.runs_silver() || self.runs_gold()
    }

    /// Modes that can sensibly repeat under watch.
    pub fn is_watchable(&self) -> bool {
        self.writes()
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| PipelineError::UnknownMode(s.to_string()))
    }
}
