//! # fatura
//!
//! Portuguese fiscal-document compliance for invoicing software certified
//! by the Autoridade Tributária (AT): NIF validation, series numbering and
//! ATCUD, the chained document signature, the fiscal QR code and the
//! SAF-T(PT) audit file.
//!
//! All monetary values use [`rust_decimal::Decimal`]. Tax amounts are
//! inputs computed by the host; this crate never calculates tax.
//!
//! ## Quick Start
//!
//! ```rust
//! use fatura::core::*;
//! use fatura::series::FiscalSeries;
//!
//! assert!(check_nif("501442600").0);
//! assert_eq!(validate_nif("501442601").unwrap_err().rejection, NifRejection::CheckDigit);
//!
//! let mut series = FiscalSeries::new(SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, "A2024"));
//! series.set_validation_code("AAJFJMVNTN").unwrap();
//! let seq = series.issue_next().unwrap();
//! assert_eq!(series.format_number(seq), "FT A2024/00001");
//! assert_eq!(series.compute_atcud(seq).unwrap(), "AAJFJMVNTN-1");
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `core` (default) | Document types, NIF, validation, series & ATCUD, audit log, settings |
//! | `signing` | Hash chain, RSA signature, certificate store, document ledger |
//! | `qr` | AT QR payload and PNG rendering |
//! | `saft` | SAF-T(PT) 1.04_01 export and structural validation |
//! | `at` | AT series web-service client |
//! | `lifecycle` | Document lifecycle pipeline composing all of the above |
//! | `all` | Everything |

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "core")]
pub mod audit;

#[cfg(feature = "core")]
pub mod series;

#[cfg(feature = "core")]
pub mod settings;

#[cfg(feature = "signing")]
pub mod signing;

#[cfg(feature = "qr")]
pub mod qr;

#[cfg(feature = "saft")]
pub mod saft;

#[cfg(feature = "at")]
pub mod at;

#[cfg(feature = "lifecycle")]
pub mod lifecycle;

#[cfg(any(feature = "saft", feature = "at"))]
mod xml_utils;

// Re-export core types at crate root for convenience
#[cfg(feature = "core")]
pub use crate::core::*;
