//! Shared primitive types used across every layer.

/// Bronze / silver primary key. Generated by the transaction generator.
pub type TransactionId = String;

/// Ten-digit bank account number, kept as text.
pub type AccountNumber = String;

/// Identifier of one orchestrated pipeline run.
pub type RunId = String;

/// Amounts are whole units of the smallest currency denomination.
pub type Amount = i64;

/// Currency used when a row carries none.
pub const DEFAULT_CURRENCY: &str = "IDR";

/// The bank whose customers live in the account store.
pub const HOUSE_BANK: &str = "BNI";
