//! Deterministic identities for synthetic transfers: holder names,
//! external banks, account numbers and transaction ids.
//!
//! Every draw goes through a StageRng, so the same seed yields the same
//! identities.

use crate::rng::StageRng;

/// Banks a transfer may be routed to.
pub const BANKS: &[&str] = &["JAGO", "BCA", "MANDIRI", "BNI", "BRI", "PERMATA", "CIMB"];

/// `BANKS` without the house bank; minted external beneficiaries use these.
pub const EXTERNAL_BANKS: &[&str] = &["JAGO", "BCA", "MANDIRI", "BRI", "PERMATA", "CIMB"];

/// Transaction ids use this alphabet.
pub const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-";
pub const ID_LEN: usize = 22;

pub const ACCOUNT_NUMBER_LEN: usize = 10;

pub struct NameGenerator;

impl NameGenerator {
    /// "FIRST LAST", upper-cased the way core banking prints holder names.
    pub fn full_name(rng: &mut StageRng) -> String {
        let first = rng.pick(FIRST_NAMES).copied().unwrap_or("BUDI");
        let last = rng.pick(LAST_NAMES).copied().unwrap_or("SANTOSO");
        format!("{first} {last}")
    }

    /// A bank other than the house bank.
    pub fn external_bank(rng: &mut StageRng) -> &'static str {
        rng.pick(EXTERNAL_BANKS).copied().unwrap_or("BCA")
    }

    /// Ten digits, no leading zero.
    pub fn account_number(rng: &mut StageRng) -> String {
        rng.range_inclusive(1_000_000_000, 9_999_999_999).to_string()
    }

    pub fn transaction_id(rng: &mut StageRng) -> String {
        (0..ID_LEN)
            .map(|_| ID_ALPHABET[rng.next_u64_below(ID_ALPHABET.len() as u64) as usize] as char)
            .collect()
    }
}

const FIRST_NAMES: &[&str] = &[
    "ADI", "AGUS", "AHMAD", "ANDI", "ANISA", "ARIF", "AYU", "BAMBANG", "BAYU", "BUDI",
    "CITRA", "DANI", "DEDI", "DEWI", "DIAN", "DIMAS", "EKA", "EKO", "FAJAR", "FITRI",
    "GILANG", "HADI", "HENDRA", "IKA", "INDAH", "IRFAN", "JOKO", "KARTIKA", "LESTARI", "MAYA",
    "NANDA", "NUR", "PUTRI", "RATNA", "RINA", "RIZKY", "SARI", "SITI", "TAUFIK", "TRI",
    "WAHYU", "WULAN", "YOGA", "YUDI", "YULIA",
];

const LAST_NAMES: &[&str] = &[
    "GUNAWAN", "HALIM", "HARAHAP", "HIDAYAT", "KURNIAWAN", "LUBIS", "NASUTION", "PANGESTU",
    "PRATAMA", "PURNOMO", "RAHARJO", "SALIM", "SANTOSO", "SAPUTRA", "SETIAWAN", "SIMANJUNTAK",
    "SIREGAR", "SUGIHARTO", "SULISTYO", "SUSANTO", "TANJUNG", "WIBOWO", "WIJAYA", "WIRAWAN",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        rng::{RngBank, StreamSlot},
        types::HOUSE_BANK,
    };

    #[test]
    fn identities_are_deterministic() {
        let mut a = RngBank::new(12345).for_stream(StreamSlot::Identity);
        let mut b = RngBank::new(12345).for_stream(StreamSlot::Identity);
        for _ in 0..20 {
            assert_eq!(NameGenerator::full_name(&mut a), NameGenerator::full_name(&mut b));
            assert_eq!(NameGenerator::transaction_id(&mut a), NameGenerator::transaction_id(&mut b));
        }
    }

    #[test]
    fn ids_use_the_alphabet_and_length() {
        let mut rng = RngBank::new(7).for_stream(StreamSlot::Identity);
        for _ in 0..200 {
            let id = NameGenerator::transaction_id(&mut rng);
            assert_eq!(id.len(), ID_LEN);
            assert!(id.bytes().all(|c| ID_ALPHABET.contains(&c)), "bad id {id}");
        }
    }

    #[test]
    fn external_bank_is_never_the_house_bank() {
        let mut rng = RngBank::new(7).for_stream(StreamSlot::Routing);
        for _ in 0..200 {
            assert_ne!(NameGenerator::external_bank(&mut rng), HOUSE_BANK);
        }
    }

    #[test]
    fn external_banks_are_all_banks_but_the_house_bank() {
        let expected: Vec<&str> = BANKS.iter().copied().filter(|b| *b != HOUSE_BANK).collect();
        assert_eq!(EXTERNAL_BANKS, expected.as_slice());
    }

    #[test]
    fn account_numbers_have_ten_digits() {
        let mut rng = RngBank::new(7).for_stream(StreamSlot::Identity);
        for _ in 0..200 {
            let n = NameGenerator::account_number(&mut rng);
            assert_eq!(n.len(), ACCOUNT_NUMBER_LEN, "{n}");
            assert!(n.bytes().all(|c| c.is_ascii_digit()));
        }
    }
}
