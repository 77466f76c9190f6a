//! Core fiscal document types, NIF validation, and the error taxonomy.
//!
//! Everything downstream (series, signing, QR, SAF-T) consumes the
//! [`FiscalDocument`] model defined here. Tax amounts are inputs; this
//! crate never calculates tax.

mod builder;
mod error;
pub mod nif;
mod types;
mod validation;

pub use builder::*;
pub use error::*;
pub use nif::{FINAL_CONSUMER_NIF, NifError, NifKind, NifRejection, check_nif, validate_nif};
pub use types::*;
pub use validation::*;
