//! AT (Autoridade Tributária) series communication web service.
//!
//! [`AtSeriesClient`] implements [`SeriesAuthority`](crate::series::SeriesAuthority)
//! over SOAP with a WS-Security username token. Use it with
//! [`register_series_with_authority`](crate::series::register_series_with_authority)
//! to obtain the validation code a series needs before any ATCUD can be
//! issued.

mod client;
mod envelope;

pub use client::*;
pub use envelope::{AtResponse, Operation, UsernameToken};
