//! Row types shared by every layer: accounts, raw (bronze) transfers and
//! classified (silver) transfers.

use crate::{
    criteria::AnomalyLevel,
    types::{AccountNumber, Amount, TransactionId, HOUSE_BANK},
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub const DATE_FMT: &str = "%Y-%m-%d";
pub const TIME_FMT: &str = "%H:%M:%S";
pub const TS_FMT: &str = "%Y-%m-%d %H:%M:%S";

// ── Account ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Opened,
    Blocked,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "OPENED",
            Self::Blocked => "BLOCKED",
            Self::Closed => "CLOSED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPENED" => Some(Self::Opened),
            "BLOCKED" => Some(Self::Blocked),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Blocked accounts still exist on the ledger and settle transfers.
    pub fn can_settle(&self) -> bool {
        matches!(self, Self::Opened | Self::Blocked)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub account_number: AccountNumber,
    pub name: String,
    pub status: AccountStatus,
    pub current_balance: Amount,
}

// ── Raw transaction (bronze) ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DebitCredit {
    #[serde(rename = "D")]
    Debit,
    #[serde(rename = "C")]
    Credit,
}

impl DebitCredit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "D",
            Self::Credit => "C",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "D" | "d" => Some(Self::Debit),
            "C" | "c" => Some(Self::Credit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawTransaction {
    pub id: TransactionId,
    pub trx_type: String,
    pub sender_account_number: AccountNumber,
    pub beneficiary_account_number: AccountNumber,
    pub beneficiary_bank: String,
    pub beneficiary_name: String,
    pub amount: Amount,
    pub debit_credit: DebitCredit,
    pub trx_date: NaiveDate,
    pub trx_time: NaiveTime,
    pub currency: String,
    pub created_at: NaiveDateTime,
}

impl RawTransaction {
    pub fn timestamp(&self) -> NaiveDateTime {
        self.trx_date.and_time(self.trx_time)
    }

    /// Display header, "BANK - NAME".
    pub fn subheader(&self) -> String {
        format!("{} - {}", self.beneficiary_bank, self.beneficiary_name)
    }

    pub fn is_in_house_transfer(&self) -> bool {
        self.beneficiary_bank.eq_ignore_ascii_case(HOUSE_BANK)
    }
}

// ── Classified transaction (silver) ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrxStatus {
    Success,
    Failed,
}

impl TrxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifiedTransaction {
    pub raw: RawTransaction,
    pub status: TrxStatus,
    /// None means no criterion matched.
    pub anomaly_code: Option<char>,
    pub anomaly_level: Option<AnomalyLevel>,
    pub classified_at: NaiveDateTime,
}

impl ClassifiedTransaction {
    pub fn id(&self) -> &str {
        &self.raw.id
    }

    pub fn is_anomaly(&self) -> bool {
        self.anomaly_code.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.status == TrxStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip_through_sql_form() {
        for status in [AccountStatus::Opened, AccountStatus::Blocked, AccountStatus::Closed] {
            assert_eq!(AccountStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AccountStatus::parse("opened"), Some(AccountStatus::Opened));
        assert_eq!(AccountStatus::parse("dormant"), None);
    }

    #[test]
    fn only_closed_accounts_cannot_settle() {
        assert!(AccountStatus::Opened.can_settle());
        assert!(AccountStatus::Blocked.can_settle());
        assert!(!AccountStatus::Closed.can_settle());
    }

    #[test]
    fn in_house_detection_ignores_case() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let trx = RawTransaction {
            id: "t1".into(),
            trx_type: "Transfer".into(),
            sender_account_number: "1000000001".into(),
            beneficiary_account_number: "1000000002".into(),
            beneficiary_bank: "bni".into(),
            beneficiary_name: "MARY SMITH".into(),
            amount: 10_000,
            debit_credit: DebitCredit::Debit,
            trx_date: ts.date(),
            trx_time: ts.time(),
            currency: "IDR".into(),
            created_at: ts,
        };
        assert!(trx.is_in_house_transfer());
        assert_eq!(trx.subheader(), "bni - MARY SMITH");
        assert_eq!(trx.timestamp(), ts);
    }
}
