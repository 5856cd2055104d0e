//! Anomaly criteria catalog and the rule dispatch used by the silver stage.
//!
//! Criteria are data: each row carries a code, a name, a severity level and
//! a `RuleKind` with its parameters. The catalog evaluates them in code
//! order and the first match wins. Evaluation is a pure function of the
//! transaction, a history snapshot and the catalog.

use crate::{
    model::RawTransaction,
    types::{AccountNumber, Amount, TransactionId},
};
use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Summary bucket label for transactions no criterion matched.
pub const NORMAL_TYPE: &str = "normal";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnomalyLevel {
    Low,
    Medium,
    High,
}

impl AnomalyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// At least `min_senders` distinct senders (this one included) paid the
    /// same beneficiary inside the window.
    RepeatBeneficiary { min_senders: usize, window_secs: i64 },
    /// The sender's previous transfer to the same beneficiary is inside the
    /// window and strictly smaller.
    EscalatingAmount { window_secs: i64 },
    HighValue { min_amount: Amount },
    /// Outside `[start_hour, end_hour)` local time.
    OffHours { start_hour: u32, end_hour: u32 },
    /// At least `max_count` transfers from the sender (this one included)
    /// inside the window.
    Velocity { max_count: usize, window_secs: i64 },
}

impl RuleKind {
    /// History lookback this rule needs, in seconds.
    pub fn window_secs(&self) -> i64 {
        match self {
            Self::RepeatBeneficiary { window_secs, .. }
            | Self::EscalatingAmount { window_secs }
            | Self::Velocity { window_secs, .. } => *window_secs,
            Self::HighValue { .. } | Self::OffHours { .. } => 0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::RepeatBeneficiary { min_senders, window_secs } => {
                if *min_senders == 0 || *window_secs <= 0 {
                    return Err("repeat_beneficiary needs min_senders > 0 and window_secs > 0".into());
                }
            }
            Self::EscalatingAmount { window_secs } if *window_secs <= 0 => {
                return Err("escalating_amount needs window_secs > 0".into());
            }
            Self::HighValue { min_amount } if *min_amount <= 0 => {
                return Err("high_value needs min_amount > 0".into());
            }
            Self::OffHours { start_hour, end_hour } => {
                if *start_hour >= *end_hour || *end_hour > 24 {
                    return Err("off_hours needs start_hour < end_hour <= 24".into());
                }
            }
            Self::Velocity { max_count, window_secs } => {
                if *max_count == 0 || *window_secs <= 0 {
                    return Err("velocity needs max_count > 0 and window_secs > 0".into());
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The single dispatch point for every rule kind.
    pub fn matches(&self, trx: &RawTransaction, history: &HistoryWindow) -> bool {
        let ts = trx.timestamp();
        match *self {
            Self::RepeatBeneficiary { min_senders, window_secs } => {
                let since = ts - Duration::seconds(window_secs);
                let mut senders: HashSet<&str> = history
                    .to_beneficiary
                    .iter()
                    .filter(|h| h.beneficiary_account_number == trx.beneficiary_account_number)
                    .filter(|h| h.timestamp >= since)
                    .map(|h| h.sender_account_number.as_str())
                    .collect();
                senders.insert(trx.sender_account_number.as_str());
                senders.len() >= min_senders
            }
            Self::EscalatingAmount { window_secs } => {
                let since = ts - Duration::seconds(window_secs);
                history
                    .from_sender
                    .iter()
                    .filter(|h| h.sender_account_number == trx.sender_account_number)
                    .filter(|h| h.beneficiary_account_number == trx.beneficiary_account_number)
                    .max_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)))
                    .is_some_and(|prev| prev.timestamp >= since && prev.amount < trx.amount)
            }
            Self::HighValue { min_amount } => trx.amount >= min_amount,
            Self::OffHours { start_hour, end_hour } => {
                let hour = trx.trx_time.hour();
                hour < start_hour || hour >= end_hour
            }
            Self::Velocity { max_count, window_secs } => {
                let since = ts - Duration::seconds(window_secs);
                let prior = history
                    .from_sender
                    .iter()
                    .filter(|h| h.sender_account_number == trx.sender_account_number)
                    .filter(|h| h.timestamp >= since)
                    .count();
                prior + 1 >= max_count
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnomalyCriterion {
    pub code: char,
    pub name: String,
    pub description: String,
    pub level: AnomalyLevel,
    pub rule: RuleKind,
}

// ── History snapshot ─────────────────────────────────────────────────────────

/// One prior bronze transfer, as seen by the rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: TransactionId,
    pub sender_account_number: AccountNumber,
    pub beneficiary_account_number: AccountNumber,
    pub amount: Amount,
    pub timestamp: NaiveDateTime,
}

/// Transfers strictly before the classified one in `(timestamp, id)` order,
/// bounded by the catalog's lookback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryWindow {
    pub to_beneficiary: Vec<HistoryEntry>,
    pub from_sender: Vec<HistoryEntry>,
}

// ── Catalog ──────────────────────────────────────────────────────────────────

/// Ordered, immutable criteria set for one run.
#[derive(Debug, Clone, Default)]
pub struct CriteriaCatalog {
    criteria: Vec<AnomalyCriterion>,
}

impl CriteriaCatalog {
    pub fn new(mut criteria: Vec<AnomalyCriterion>) -> Self {
        criteria.sort_by_key(|c| c.code);
        criteria.dedup_by_key(|c| c.code);
        Self { criteria }
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnomalyCriterion> {
        self.criteria.iter()
    }

    pub fn by_code(&self, code: char) -> Option<&AnomalyCriterion> {
        self.criteria.iter().find(|c| c.code == code)
    }

    /// Summary label for a classification: criterion name, or "normal".
    pub fn anomaly_type(&self, code: Option<char>) -> String {
        match code {
            None => NORMAL_TYPE.to_string(),
            Some(c) => self
                .by_code(c)
                .map(|crit| crit.name.clone())
                .unwrap_or_else(|| c.to_string()),
        }
    }

    /// Widest history window any criterion needs, in seconds.
    pub fn lookback_secs(&self) -> i64 {
        self.criteria
            .iter()
            .map(|c| c.rule.window_secs())
            .max()
            .unwrap_or(0)
    }

    pub fn needs_history(&self) -> bool {
        self.lookback_secs() > 0
    }

    /// First matching criterion in code order, or None.
    pub fn classify(&self, trx: &RawTransaction, history: &HistoryWindow) -> Option<&AnomalyCriterion> {
        self.criteria.iter().find(|c| c.rule.matches(trx, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DebitCredit;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn trx(id: &str, sender: &str, beneficiary: &str, amount: Amount, ts: NaiveDateTime) -> RawTransaction {
        RawTransaction {
            id: id.into(),
            trx_type: "Transfer".into(),
            sender_account_number: sender.into(),
            beneficiary_account_number: beneficiary.into(),
            beneficiary_bank: "BCA".into(),
            beneficiary_name: "JOHN SMITH".into(),
            amount,
            debit_credit: DebitCredit::Debit,
            trx_date: ts.date(),
            trx_time: ts.time(),
            currency: "IDR".into(),
            created_at: ts,
        }
    }

    fn entry(id: &str, sender: &str, beneficiary: &str, amount: Amount, ts: NaiveDateTime) -> HistoryEntry {
        HistoryEntry {
            id: id.into(),
            sender_account_number: sender.into(),
            beneficiary_account_number: beneficiary.into(),
            amount,
            timestamp: ts,
        }
    }

    fn criterion(code: char, name: &str, level: AnomalyLevel, rule: RuleKind) -> AnomalyCriterion {
        AnomalyCriterion {
            code,
            name: name.into(),
            description: name.into(),
            level,
            rule,
        }
    }

    #[test]
    fn first_matching_code_wins_regardless_of_load_order() {
        let catalog = CriteriaCatalog::new(vec![
            criterion('B', "off-hours", AnomalyLevel::Low, RuleKind::OffHours { start_hour: 6, end_hour: 22 }),
            criterion('A', "high-value", AnomalyLevel::High, RuleKind::HighValue { min_amount: 5_000 }),
        ]);
        let t = trx("t1", "S1", "R1", 9_000, at(23, 30));
        let hit = catalog.classify(&t, &HistoryWindow::default()).expect("should match");
        assert_eq!(hit.code, 'A');
    }

    #[test]
    fn no_match_is_none() {
        let catalog = CriteriaCatalog::new(vec![criterion(
            'C',
            "high-value",
            AnomalyLevel::High,
            RuleKind::HighValue { min_amount: 1_000_000 },
        )]);
        let t = trx("t1", "S1", "R1", 10_000, at(10, 0));
        assert!(catalog.classify(&t, &HistoryWindow::default()).is_none());
        assert_eq!(catalog.anomaly_type(None), NORMAL_TYPE);
        assert_eq!(catalog.anomaly_type(Some('C')), "high-value");
    }

    #[test]
    fn repeat_beneficiary_counts_distinct_senders_in_window() {
        let rule = RuleKind::RepeatBeneficiary { min_senders: 3, window_secs: 3_600 };
        let t = trx("t3", "S3", "R1", 10_000, at(12, 0));
        let mut history = HistoryWindow::default();
        history.to_beneficiary.push(entry("t1", "S1", "R1", 10_000, at(11, 30)));
        // same sender twice does not count twice
        history.to_beneficiary.push(entry("t1b", "S1", "R1", 10_000, at(11, 40)));
        assert!(!rule.matches(&t, &history));

        history.to_beneficiary.push(entry("t2", "S2", "R1", 10_000, at(11, 50)));
        assert!(rule.matches(&t, &history));

        // outside the window
        let late = trx("t4", "S3", "R1", 10_000, at(13, 45));
        assert!(!rule.matches(&late, &history));
    }

    #[test]
    fn escalating_amount_uses_latest_prior_transfer() {
        let rule = RuleKind::EscalatingAmount { window_secs: 3_600 };
        let mut history = HistoryWindow::default();
        history.from_sender.push(entry("p1", "S1", "R1", 500_000, at(10, 0)));
        history.from_sender.push(entry("p2", "S1", "R1", 100_000, at(10, 30)));

        assert!(rule.matches(&trx("t", "S1", "R1", 200_000, at(10, 45)), &history));
        assert!(!rule.matches(&trx("t", "S1", "R1", 100_000, at(10, 45)), &history));
        assert!(!rule.matches(&trx("t", "S1", "R2", 900_000, at(10, 45)), &history));
        assert!(!rule.matches(&trx("t", "S1", "R1", 900_000, at(12, 0)), &history));
    }

    #[test]
    fn velocity_includes_current_transfer() {
        let rule = RuleKind::Velocity { max_count: 3, window_secs: 600 };
        let mut history = HistoryWindow::default();
        history.from_sender.push(entry("p1", "S1", "R1", 1, at(10, 0)));
        let t = trx("t", "S1", "R9", 1, at(10, 5));
        assert!(!rule.matches(&t, &history));
        history.from_sender.push(entry("p2", "S1", "R2", 1, at(10, 2)));
        assert!(rule.matches(&t, &history));
    }

    #[test]
    fn off_hours_boundaries() {
        let rule = RuleKind::OffHours { start_hour: 6, end_hour: 22 };
        let h = HistoryWindow::default();
        assert!(rule.matches(&trx("a", "S", "R", 1, at(5, 59)), &h));
        assert!(!rule.matches(&trx("b", "S", "R", 1, at(6, 0)), &h));
        assert!(!rule.matches(&trx("c", "S", "R", 1, at(21, 59)), &h));
        assert!(rule.matches(&trx("d", "S", "R", 1, at(22, 0)), &h));
    }

    #[test]
    fn lookback_is_widest_window() {
        let catalog = CriteriaCatalog::new(vec![
            criterion('A', "a", AnomalyLevel::High, RuleKind::RepeatBeneficiary { min_senders: 3, window_secs: 86_400 }),
            criterion('D', "d", AnomalyLevel::Medium, RuleKind::Velocity { max_count: 5, window_secs: 3_600 }),
            criterion('C', "c", AnomalyLevel::High, RuleKind::HighValue { min_amount: 1 }),
        ]);
        assert_eq!(catalog.lookback_secs(), 86_400);
        assert!(catalog.needs_history());
        assert!(!CriteriaCatalog::default().needs_history());
    }

    #[test]
    fn rule_json_matches_seeded_catalog_format() {
        let rule: RuleKind =
            serde_json::from_str(r#"{"kind":"repeat_beneficiary","min_senders":3,"window_secs":86400}"#)
                .expect("parse rule");
        assert_eq!(rule, RuleKind::RepeatBeneficiary { min_senders: 3, window_secs: 86_400 });
        assert!(RuleKind::OffHours { start_hour: 22, end_hour: 6 }.validate().is_err());
    }

    #[test]
    fn levels_are_ordered() {
        assert!(AnomalyLevel::Low < AnomalyLevel::Medium);
        assert!(AnomalyLevel::Medium < AnomalyLevel::High);
        assert_eq!(AnomalyLevel::parse("HIGH"), Some(AnomalyLevel::High));
    }
}
