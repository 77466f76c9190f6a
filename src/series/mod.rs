//! Sequence & ATCUD authority.
//!
//! Owns per-series counters, document number formatting, and the mapping
//! from (series, sequence) to ATCUD via the AT-issued validation code.

mod authority;
mod fiscal_series;
mod registry;

pub use authority::*;
pub use fiscal_series::*;
pub use registry::*;
