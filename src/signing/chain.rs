//! Canonical chain payload, SHA-1 document hash, and printed fragment.

use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use sha1::{Digest, Sha1};

use crate::core::format_amount;

/// Previous hash of the first document in a series.
pub const SEED_HASH: &str = "0";

/// Filler used when the base64 digest is shorter than a fragment position.
pub const FRAGMENT_FILLER: char = 'X';

/// Positions of the base64 digest picked for the printed fragment.
const FRAGMENT_POSITIONS: [usize; 4] = [0, 10, 20, 30];

/// `YYYY-MM-DD;HH:MM:SS;number;total;previous_hash`.
pub fn signature_payload(
    date: NaiveDate,
    time: NaiveTime,
    number: &str,
    gross_total: Decimal,
    previous_hash: &str,
) -> String {
    format!(
        "{};{};{};{};{}",
        date.format("%Y-%m-%d"),
        time.format("%H:%M:%S"),
        number,
        format_amount(gross_total),
        previous_hash
    )
}

/// Uppercase hex SHA-1 of the payload.
pub fn document_hash(payload: &str) -> String {
    let digest = Sha1::digest(payload.as_bytes());
    digest.iter().fold(String::with_capacity(40), |mut s, b| {
        let _ = write!(s, "{b:02X}");
        s
    })
}

/// Four characters of the base64-encoded raw SHA-1 digest.
pub fn hash_fragment(payload: &str) -> String {
    let encoded = STANDARD.encode(Sha1::digest(payload.as_bytes()));
    let bytes = encoded.as_bytes();
    FRAGMENT_POSITIONS
        .iter()
        .map(|&i| bytes.get(i).map(|&b| b as char).unwrap_or(FRAGMENT_FILLER))
        .collect()
}
