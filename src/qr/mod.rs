//! QR payload builder and PNG rendering.
//!
//! The standard layout follows the AT field order
//! `A..H, I1..I9, N, O, P, Q, R` joined by `*`; the print-preview layout is
//! the simplified single-document variant. Which one is emitted, the
//! tax-code → bucket map and the status codes come from
//! [`QrSettings`](crate::settings::QrSettings).

mod payload;
mod render;

pub use payload::*;
pub use render::*;

use crate::core::{ChainEntry, FiscalDocument, FiscalError, QrCode};
use crate::settings::ComplianceSettings;

/// Build the payload and render it.
pub fn generate_qr(
    doc: &FiscalDocument,
    chain: &ChainEntry,
    settings: &ComplianceSettings,
) -> Result<QrCode, FiscalError> {
    let payload = build_qr_string(doc, chain, settings)?;
    let png = render_qr_png(&payload)?;
    Ok(QrCode { payload, png })
}

/// Reissue a stored QR code with a new status flag. Only the flag changes;
/// the image is re-rendered from the updated payload.
pub fn restatus_qr(qr: &QrCode, status: &str) -> Result<QrCode, FiscalError> {
    let payload = with_status(&qr.payload, status)?;
    let png = render_qr_png(&payload)?;
    Ok(QrCode { payload, png })
}
