//! Transaction generator: synthetic transfer events with injected fraud
//! patterns.
//!
//! RULE: counters are values.
//! `next_event` returns a `GenerationStep`; `run` folds steps and write
//! reports into `GeneratorStats`. Nothing else mutates the counts.
//!
//! Fraud model:
//!   - a fraction `fraud_ratio` of events are fraud participants;
//!   - a participant reuses a beneficiary it has already paid with
//!     probability `repeat_probability`, otherwise it mints one;
//!   - participant amounts come from the high population only.
//!
//! A beneficiary paid more than twice in the last hour is suspicious.

use crate::{
    bronze_writer::{BronzeWriter, WriteReport},
    cancel::CancelToken,
    clock::{ClockMode, TrxClock},
    config::GeneratorConfig,
    error::{PipelineError, PipelineResult},
    model::{Account, DebitCredit, RawTransaction},
    name_generator::NameGenerator,
    rng::{RngBank, StageRng, StreamSlot},
    store::{AccountSource, BronzeSink},
    types::{AccountNumber, Amount, DEFAULT_CURRENCY, HOUSE_BANK},
};
use chrono::{Duration, NaiveDateTime, Timelike};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// Synthetic sender pool used when no OPENED account is available.
pub const FALLBACK_SENDER_COUNT: usize = 200;

/// Window and threshold for the suspicious-beneficiary tracker.
pub const REPEAT_WINDOW_SECS: i64 = 3_600;
pub const REPEAT_ALERT_THRESHOLD: usize = 2;

/// Beneficiaries kept for repeat picks; the oldest is evicted first.
pub const POOL_CAPACITY: usize = 1_000;

/// Fraud alerts only fire above this amount.
pub const ALERT_MIN_AMOUNT: Amount = 200_000;

const NORMAL_LOW: (Amount, Amount) = (10_000, 200_000);
const NORMAL_HIGH: (Amount, Amount) = (201_000, 1_000_000);
const FRAUD_RANGE: (Amount, Amount) = (201_000, 5_000_000);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Beneficiary {
    pub account_number: AccountNumber,
    pub bank: String,
    pub name: String,
}

impl Beneficiary {
    fn in_house(account: &Account) -> Self {
        Self {
            account_number: account.account_number.clone(),
            bank: HOUSE_BANK.to_string(),
            name: account.name.clone(),
        }
    }
}

// ── Beneficiary pool ─────────────────────────────────────────────────────────

/// The most recent `POOL_CAPACITY` beneficiaries the generator has paid,
/// plus transfer times per beneficiary inside the repeat window.
#[derive(Debug, Default)]
pub struct BeneficiaryPool {
    known: VecDeque<Beneficiary>,
    index: HashSet<(String, AccountNumber)>,
    recent: HashMap<AccountNumber, VecDeque<NaiveDateTime>>,
}

impl BeneficiaryPool {
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Add a beneficiary if it is not already pooled, evicting the oldest
    /// one when the pool is full.
    pub fn remember(&mut self, beneficiary: &Beneficiary) {
        let key = (beneficiary.bank.clone(), beneficiary.account_number.clone());
        if !self.index.insert(key) {
            return;
        }
        self.known.push_back(beneficiary.clone());
        if self.known.len() > POOL_CAPACITY {
            if let Some(old) = self.known.pop_front() {
                self.index.remove(&(old.bank, old.account_number));
            }
        }
    }

    pub fn pick(&self, rng: &mut StageRng) -> Option<Beneficiary> {
        if self.known.is_empty() {
            return None;
        }
        let idx = rng.next_u64_below(self.known.len() as u64) as usize;
        self.known.get(idx).cloned()
    }

    /// Drop transfer times older than the window before `now`, and any
    /// beneficiary left with none.
    pub fn prune(&mut self, now: NaiveDateTime) {
        let since = now - Duration::seconds(REPEAT_WINDOW_SECS);
        self.recent.retain(|_, history| {
            while history.front().is_some_and(|t| *t < since) {
                history.pop_front();
            }
            !history.is_empty()
        });
    }

    /// Record a transfer and return how many fall inside the window.
    pub fn record_transfer(&mut self, account_number: &str, at: NaiveDateTime) -> usize {
        self.prune(at);
        let history = self.recent.entry(account_number.to_string()).or_default();
        history.push_back(at);
        history.len()
    }

    /// Based on the last recorded transfer; see `suspicious_count` for a
    /// check against a given time.
    pub fn is_suspicious(&self, account_number: &str) -> bool {
        self.recent
            .get(account_number)
            .is_some_and(|h| h.len() > REPEAT_ALERT_THRESHOLD)
    }

    /// Beneficiaries paid more than the threshold inside the window ending at `now`.
    pub fn suspicious_count(&self, now: NaiveDateTime) -> usize {
        let since = now - Duration::seconds(REPEAT_WINDOW_SECS);
        self.recent
            .values()
            .filter(|h| h.iter().filter(|t| **t >= since).count() > REPEAT_ALERT_THRESHOLD)
            .count()
    }

    /// Beneficiaries with at least one transfer still in the window.
    pub fn tracked(&self) -> usize {
        self.recent.len()
    }
}

// ── Steps and stats ──────────────────────────────────────────────────────────

/// One generated event and what the generator decided for it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationStep {
    pub trx: RawTransaction,
    pub fraud: bool,
    pub repeat: bool,
    /// The beneficiary was paid more than twice within the last hour.
    pub suspicious: bool,
}

impl GenerationStep {
    pub fn is_alert(&self) -> bool {
        self.fraud && self.suspicious && self.trx.amount > ALERT_MIN_AMOUNT
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GeneratorStats {
    pub generated: u64,
    pub fraud: u64,
    pub repeats: u64,
    pub alerts: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub rejected: u64,
}

impl GeneratorStats {
    pub fn fold(mut self, step: &GenerationStep) -> Self {
        self.generated += 1;
        self.fraud += step.fraud as u64;
        self.repeats += step.repeat as u64;
        self.alerts += step.is_alert() as u64;
        self
    }

    pub fn with_write(mut self, report: WriteReport) -> Self {
        self.inserted += report.inserted;
        self.skipped += report.skipped;
        self
    }
}

// ── Generator ────────────────────────────────────────────────────────────────

pub struct TransactionGenerator {
    config: GeneratorConfig,
    routing: StageRng,
    amount: StageRng,
    identity: StageRng,
    clock: TrxClock,
    senders: Vec<AccountNumber>,
    in_house: Vec<Beneficiary>,
    pool: BeneficiaryPool,
    last_event_at: Option<NaiveDateTime>,
    degraded: bool,
}

impl TransactionGenerator {
    /// Build a generator over the given OPENED accounts. An empty list
    /// switches to synthetic senders.
    pub fn new(config: GeneratorConfig, accounts: Vec<Account>) -> Self {
        let seed = config.seed.unwrap_or_else(seed_from_wall_clock);
        let bank = RngBank::new(seed);
        let mut identity = bank.for_stream(StreamSlot::Identity);

        let degraded = accounts.is_empty();
        let senders: Vec<AccountNumber> = if degraded {
            log::warn!(
                "Generator: no OPENED accounts, using {FALLBACK_SENDER_COUNT} synthetic senders"
            );
            (0..FALLBACK_SENDER_COUNT)
                .map(|_| NameGenerator::account_number(&mut identity))
                .collect()
        } else {
            accounts.iter().map(|a| a.account_number.clone()).collect()
        };
        let in_house = accounts.iter().map(Beneficiary::in_house).collect();

        let clock = match config.clock {
            ClockMode::Wall => TrxClock::wall(config.timezone_offset_minutes),
            ClockMode::Simulated => TrxClock::simulated(
                chrono::Local::now().naive_local().with_nanosecond(0).unwrap_or_default(),
                Duration::seconds(config.simulated_step_secs),
            ),
        };
        log::info!("Generator: seed {seed}, {} senders", senders.len());

        Self {
            routing: bank.for_stream(StreamSlot::Routing),
            amount: bank.for_stream(StreamSlot::Amount),
            identity,
            clock,
            senders,
            in_house,
            pool: BeneficiaryPool::default(),
            last_event_at: None,
            degraded,
            config,
        }
    }

    /// Load OPENED accounts from `source`. A failed lookup degrades to
    /// synthetic senders instead of stopping the generator.
    pub fn from_source<A: AccountSource + ?Sized>(config: GeneratorConfig, source: &A) -> Self {
        let accounts = source.opened_accounts().unwrap_or_else(|e| {
            log::warn!("Generator: account lookup failed: {e}");
            Vec::new()
        });
        Self::new(config, accounts)
    }

    /// Replace the clock (tests and backfills pin the start time).
    pub fn with_clock(mut self, clock: TrxClock) -> Self {
        self.clock = clock;
        self
    }

    /// Pre-load a beneficiary into the repeat pool.
    pub fn seed_beneficiary(&mut self, beneficiary: Beneficiary) {
        self.pool.remember(&beneficiary);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn pool(&self) -> &BeneficiaryPool {
        &self.pool
    }

    /// Suspicious beneficiaries as of the last generated event.
    pub fn suspicious_beneficiaries(&self) -> usize {
        self.last_event_at.map_or(0, |at| self.pool.suspicious_count(at))
    }

    pub fn next_event(&mut self) -> GenerationStep {
        let at = self.clock.next_timestamp().with_nanosecond(0).unwrap_or_default();
        let fraud = self.routing.chance(self.config.fraud_ratio);

        let sender = self
            .routing
            .pick(&self.senders)
            .cloned()
            .unwrap_or_else(|| NameGenerator::account_number(&mut self.identity));

        let repeated = if fraud && !self.pool.is_empty() && self.routing.chance(self.config.repeat_probability) {
            self.pool.pick(&mut self.routing)
        } else {
            None
        };
        let repeat = repeated.is_some();
        let beneficiary = match repeated {
            Some(b) => b,
            None => {
                let fresh = self.fresh_beneficiary(&sender);
                self.pool.remember(&fresh);
                fresh
            }
        };

        let amount = self.draw_amount(fraud);
        let id = NameGenerator::transaction_id(&mut self.identity);

        self.pool.record_transfer(&beneficiary.account_number, at);
        self.last_event_at = Some(at);
        let suspicious = self.pool.is_suspicious(&beneficiary.account_number);

        GenerationStep {
            trx: RawTransaction {
                id,
                trx_type: "Transfer".into(),
                sender_account_number: sender,
                beneficiary_account_number: beneficiary.account_number,
                beneficiary_bank: beneficiary.bank,
                beneficiary_name: beneficiary.name,
                amount,
                debit_credit: DebitCredit::Debit,
                trx_date: at.date(),
                trx_time: at.time(),
                currency: DEFAULT_CURRENCY.into(),
                created_at: at,
            },
            fraud,
            repeat,
            suspicious,
        }
    }

    /// Half the time an in-house account (never the sender itself), else a
    /// freshly minted external beneficiary.
    fn fresh_beneficiary(&mut self, sender: &str) -> Beneficiary {
        if !self.in_house.is_empty() && self.routing.chance(0.5) {
            if let Some(b) = self.routing.pick(&self.in_house) {
                if b.account_number != sender {
                    return b.clone();
                }
            }
        }
        Beneficiary {
            bank: NameGenerator::external_bank(&mut self.routing).to_string(),
            account_number: NameGenerator::account_number(&mut self.identity),
            name: NameGenerator::full_name(&mut self.identity),
        }
    }

    fn draw_amount(&mut self, fraud: bool) -> Amount {
        let (lo, hi) = if fraud {
            FRAUD_RANGE
        } else if self.amount.chance(0.5) {
            NORMAL_LOW
        } else {
            NORMAL_HIGH
        };
        round_to_thousands(self.amount.range_inclusive(lo, hi))
    }

    fn pause(&self) -> std::time::Duration {
        let rate = self.config.rate_per_minute.max(1) as f64;
        std::time::Duration::from_secs_f64(60.0 / rate)
    }

    /// Generate until `max_transactions` (0 = unbounded) or cancellation,
    /// submitting each event to `writer`. A simulated clock never sleeps.
    ///
    /// The writer is flushed before returning; rows the store still
    /// refuses remain in it for the caller's `close()`.
    pub fn run<S: BronzeSink + ?Sized>(
        &mut self,
        writer: &mut BronzeWriter<'_, S>,
        cancel: &CancelToken,
    ) -> PipelineResult<GeneratorStats> {
        let max = self.config.max_transactions;
        let progress_every = self.config.progress_every.max(1);
        let pause = self.pause();
        let started = std::time::Instant::now();
        let mut stats = GeneratorStats::default();

        while max == 0 || stats.generated < max {
            if cancel.is_cancelled() {
                log::info!("Generator: cancelled after {} events", stats.generated);
                break;
            }

            let step = self.next_event();
            stats = stats.fold(&step);
            if step.is_alert() {
                log::warn!(
                    "Potential scam: repeated transfers to {} ({}) amount {} {}",
                    step.trx.subheader(),
                    step.trx.beneficiary_account_number,
                    step.trx.amount,
                    step.trx.currency
                );
            }

            match writer.submit(step.trx) {
                Ok(report) => stats = stats.with_write(report),
                Err(PipelineError::Malformed { id, reason }) => {
                    log::warn!("Generator: rejected {id}: {reason}");
                    stats.rejected += 1;
                }
                Err(e) => return Err(e),
            }

            if stats.generated % progress_every == 0 {
                let elapsed_min = started.elapsed().as_secs_f64() / 60.0;
                let rate = if elapsed_min > 0.0 {
                    stats.generated as f64 / elapsed_min
                } else {
                    0.0
                };
                log::info!(
                    "Generated {} transfers ({} fraud, {rate:.1}/min), beneficiaries {}, suspicious {}",
                    stats.generated,
                    stats.fraud,
                    self.pool.len(),
                    self.suspicious_beneficiaries()
                );
            }

            if !self.clock.is_simulated() && !cancel.sleep(pause) {
                log::info!("Generator: cancelled after {} events", stats.generated);
                break;
            }
        }

        stats = stats.with_write(writer.flush()?);
        Ok(stats)
    }
}

pub fn round_to_thousands(amount: Amount) -> Amount {
    if amount <= 0 {
        0
    } else {
        amount - amount % 1_000
    }
}

/// Seed for runs that do not pin one.
pub fn seed_from_wall_clock() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
