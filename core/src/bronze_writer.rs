//! Bronze writer: buffers generated transfers and lands them in the raw
//! table, deduplicated by id.
//!
//! RULE: a duplicate id is an outcome, not an error.
//! The sink reports `Skipped` and the writer counts it.
//!
//! RULE: rows are never dropped silently.
//! While the store is unreachable the batch stays buffered and is retried
//! on the next flush. Past `retry_capacity` buffered rows the writer
//! refuses more input with `BufferFull`.

use crate::{
    cancel::CancelToken,
    config::GeneratorConfig,
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    generator::TransactionGenerator,
    model::RawTransaction,
    stage::{Layer, PipelineStage, StageReport},
    store::{BronzeSink, PipelineStore},
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub inserted: u64,
    pub skipped: u64,
    /// Rows still buffered after a failed flush.
    pub deferred: u64,
}

impl WriteReport {
    pub fn absorb(&mut self, other: WriteReport) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.deferred = other.deferred;
    }
}

pub struct BronzeWriter<'s, S: BronzeSink + ?Sized> {
    sink: &'s S,
    buffer: Vec<RawTransaction>,
    batch_size: usize,
    retry_capacity: usize,
}

impl<'s, S: BronzeSink + ?Sized> BronzeWriter<'s, S> {
    pub fn new(sink: &'s S, batch_size: usize, retry_capacity: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            retry_capacity: retry_capacity.max(batch_size),
        }
    }

    pub fn from_config(sink: &'s S, config: &GeneratorConfig) -> Self {
        Self::new(sink, config.effective_batch_size(), config.retry_capacity)
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Queue one transfer, flushing when the batch is full.
    ///
    /// A malformed row is rejected on its own; nothing already buffered is
    /// affected.
    pub fn submit(&mut self, trx: RawTransaction) -> PipelineResult<WriteReport> {
        validate(&trx)?;
        if self.buffer.len() >= self.retry_capacity {
            return Err(PipelineError::BufferFull {
                buffered: self.buffer.len(),
                capacity: self.retry_capacity,
            });
        }
        self.buffer.push(trx);
        if self.buffer.len() >= self.batch_size {
            self.flush()
        } else {
            Ok(WriteReport::default())
        }
    }

    /// Write everything buffered in one store transaction.
    pub fn flush(&mut self) -> PipelineResult<WriteReport> {
        if self.buffer.is_empty() {
            return Ok(WriteReport::default());
        }
        match self.sink.insert_raw_batch(&self.buffer) {
            Ok(outcomes) => {
                let inserted = outcomes.iter().filter(|o| o.is_inserted()).count() as u64;
                let report = WriteReport {
                    inserted,
                    skipped: outcomes.len() as u64 - inserted,
                    deferred: 0,
                };
                if report.skipped > 0 {
                    log::debug!("Bronze: {} duplicate ids skipped", report.skipped);
                }
                self.buffer.clear();
                Ok(report)
            }
            Err(e) if e.is_connectivity() => {
                log::warn!(
                    "Bronze: store unavailable, keeping {} rows buffered: {e}",
                    self.buffer.len()
                );
                Ok(WriteReport {
                    deferred: self.buffer.len() as u64,
                    ..WriteReport::default()
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Final flush. Rows that still could not be written are reported as
    /// deferred.
    pub fn close(mut self) -> PipelineResult<WriteReport> {
        let report = self.flush()?;
        if report.deferred > 0 {
            log::error!("Bronze: closing with {} unwritten rows", report.deferred);
        }
        Ok(report)
    }
}

fn validate(trx: &RawTransaction) -> PipelineResult<()> {
    let reason = if trx.id.trim().is_empty() {
        "empty id"
    } else if trx.amount <= 0 {
        "amount must be positive"
    } else if trx.sender_account_number.trim().is_empty() {
        "empty sender account"
    } else if trx.beneficiary_account_number.trim().is_empty() {
        "empty beneficiary account"
    } else {
        return Ok(());
    };
    Err(PipelineError::Malformed {
        id: trx.id.clone(),
        reason: reason.to_string(),
    })
}

// ── Stage ────────────────────────────────────────────────────────────────────

/// Bronze stage: runs the bounded inline generator when enabled, then
/// reports what the raw layer holds.
pub struct BronzeStage {
    generator: GeneratorConfig,
}

impl BronzeStage {
    pub fn new(generator: GeneratorConfig) -> Self {
        Self { generator }
    }
}

impl PipelineStage for BronzeStage {
    fn layer(&self) -> Layer {
        Layer::Bronze
    }

    fn run(&mut self, store: &PipelineStore, cancel: &CancelToken) -> PipelineResult<StageReport> {
        let mut report = StageReport::default();

        if self.generator.enabled {
            let mut generator = TransactionGenerator::from_source(self.generator.clone(), store);
            let mut writer = BronzeWriter::from_config(store, &self.generator);
            let stats = generator.run(&mut writer, cancel)?;
            let closing = writer.close()?;
            report.processed = stats.generated;
            report.failed = stats.rejected + closing.deferred;
            if generator.is_degraded() {
                report.push(PipelineEvent::Degraded {
                    reason: "no OPENED accounts, synthetic senders in use".into(),
                });
            }
            report.push(PipelineEvent::BronzeGenerated {
                generated: stats.generated,
                fraud: stats.fraud,
                inserted: stats.inserted + closing.inserted,
                skipped: stats.skipped + closing.skipped,
            });
        } else {
            log::info!("Bronze: inline generator disabled, reading raw layer only");
        }

        let accounts = store.table_count("account")?;
        let raw_transactions = store.raw_count()?;
        if accounts == 0 {
            log::warn!("Bronze: account table is empty");
        }
        log::info!("Bronze: {raw_transactions} raw transfers, {accounts} accounts");
        if !self.generator.enabled {
            report.processed = raw_transactions.max(0) as u64;
        }
        report.push(PipelineEvent::BronzeSnapshot {
            accounts,
            raw_transactions,
        });
        Ok(report)
    }
}
