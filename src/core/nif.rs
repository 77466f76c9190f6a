//! Portuguese NIF/NIPC validation.

use thiserror::Error;

/// Generic NIF for final consumers (Consumidor Final).
pub const FINAL_CONSUMER_NIF: &str = "999999990";

/// What kind of taxpayer a NIF identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NifKind {
    /// First digit 1, 2 or 3.
    Individual,
    /// First digit 5, 6 or 9.
    Corporate,
    /// Recognized non-standard prefix (45 non-residents, 70-79). Check digit not verified.
    Special,
}

/// Why a NIF was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NifRejection {
    /// Not exactly 9 ASCII digits.
    Format,
    /// First digit(s) not in a recognized range.
    Prefix,
    /// Check digit does not match the mod-11 checksum.
    CheckDigit,
}

impl NifRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Format => "NIF must contain exactly 9 digits",
            Self::Prefix => "first digit is not valid for a standard NIF/NIPC",
            Self::CheckDigit => "check digit does not match",
        }
    }
}

/// Error returned when a NIF fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid NIF '{value}': {}", .rejection.reason())]
pub struct NifError {
    /// The rejected input.
    pub value: String,
    pub rejection: NifRejection,
}

/// Validate a Portuguese tax identifier (NIF/NIPC).
///
/// Pure and total: the caller decides whether a rejection is fatal (the
/// final-consumer code [`FINAL_CONSUMER_NIF`] is usually skipped upstream).
pub fn validate_nif(nif: &str) -> Result<NifKind, NifError> {
    let reject = |rejection| NifError {
        value: nif.to_string(),
        rejection,
    };

    let bytes = nif.as_bytes();
    if bytes.len() != 9 || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(reject(NifRejection::Format));
    }

    let digits: Vec<u32> = bytes.iter().map(|b| u32::from(b - b'0')).collect();

    let kind = match digits[0] {
        1..=3 => NifKind::Individual,
        5 | 6 | 9 => NifKind::Corporate,
        4 if digits[1] == 5 => return Ok(NifKind::Special),
        7 => return Ok(NifKind::Special),
        _ => return Err(reject(NifRejection::Prefix)),
    };

    if check_digit(&digits) != digits[8] {
        return Err(reject(NifRejection::CheckDigit));
    }
    Ok(kind)
}

/// Convenience form returning `(valid, reason)`; reason is empty when valid.
pub fn check_nif(nif: &str) -> (bool, String) {
    match validate_nif(nif) {
        Ok(_) => (true, String::new()),
        Err(e) => (false, e.rejection.reason().to_string()),
    }
}

/// Expected check digit for the first eight digits.
fn check_digit(digits: &[u32]) -> u32 {
    let sum: u32 = digits
        .iter()
        .take(8)
        .enumerate()
        .map(|(i, d)| d * (9 - i as u32))
        .sum();
    let complement = 11 - sum % 11;
    if complement >= 10 { 0 } else { complement }
}
