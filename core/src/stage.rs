//! Stage trait.
//!
//! RULE: Every layer implements PipelineStage.
//! The engine calls run() on each registered stage in registration
//! order (bronze, silver, gold). Stages never call each other; they
//! communicate only through the rows they write.

use crate::{cancel::CancelToken, error::PipelineResult, event::PipelineEvent, store::PipelineStore};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Bronze,
    Silver,
    Gold,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one stage did in one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageReport {
    pub processed: u64,
    pub failed: u64,
    pub events: Vec<PipelineEvent>,
}

impl StageReport {
    pub fn new(processed: u64, failed: u64) -> Self {
        Self {
            processed,
            failed,
            events: Vec::new(),
        }
    }

    pub fn push(&mut self, event: PipelineEvent) {
        self.events.push(event);
    }
}

/// The contract every layer stage fulfils.
pub trait PipelineStage {
    fn layer(&self) -> Layer;

    /// Process everything pending for this layer.
    ///
    /// - `store`:  the run's store connection
    /// - `cancel`: checked between units of work; a stage never stops
    ///   halfway through a fold
    fn run(&mut self, store: &PipelineStore, cancel: &CancelToken) -> PipelineResult<StageReport>;
}
