use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::core::{ChainEntry, FiscalDocument, FiscalError, format_amount};
use crate::settings::{ComplianceSettings, QrLayout, VatBucket};

/// Taxable base and tax of one VAT bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketTotals {
    pub base: Decimal,
    pub tax: Decimal,
}

/// Per-bucket totals of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VatBreakdown {
    buckets: BTreeMap<VatBucket, BucketTotals>,
}

impl VatBreakdown {
    pub fn get(&self, bucket: VatBucket) -> BucketTotals {
        self.buckets.get(&bucket).copied().unwrap_or_default()
    }

    pub fn total_tax(&self) -> Decimal {
        self.buckets.values().map(|b| b.tax).sum()
    }
}

/// Sum line bases and taxes into buckets using the configured code map.
pub fn vat_breakdown(doc: &FiscalDocument, settings: &ComplianceSettings) -> VatBreakdown {
    let mut breakdown = VatBreakdown::default();
    for line in &doc.lines {
        let bucket = settings.qr.bucket_for(&line.tax.effective_code());
        let entry = breakdown.buckets.entry(bucket).or_default();
        entry.base += line.net_amount;
        entry.tax += line.tax.amount;
    }
    breakdown
}

/// Build the QR string for a numbered, signed document.
///
/// Pure: the same document, chain entry and settings always give the same
/// string. A document without an ATCUD is rejected.
pub fn build_qr_string(
    doc: &FiscalDocument,
    chain: &ChainEntry,
    settings: &ComplianceSettings,
) -> Result<String, FiscalError> {
    let atcud = doc
        .atcud()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| {
            FiscalError::Validation(format!("document {} has no ATCUD", doc.display_name()))
        })?;

    match settings.qr.layout {
        QrLayout::Standard => Ok(standard_fields(doc, atcud, chain, settings).join("*")),
        QrLayout::PrintPreview => print_preview_fields(doc, atcud, chain, settings).map(|f| f.join("*")),
    }
}

fn standard_fields(
    doc: &FiscalDocument,
    atcud: &str,
    chain: &ChainEntry,
    settings: &ComplianceSettings,
) -> Vec<String> {
    let vat = vat_breakdown(doc, settings);
    let ise = vat.get(VatBucket::Exempt);
    let red = vat.get(VatBucket::Reduced);
    let int = vat.get(VatBucket::Intermediate);
    let nor = vat.get(VatBucket::Normal);
    let out = vat.get(VatBucket::Other);
    let total_tax = vat.total_tax() + doc.stamp_duty;

    vec![
        format!("A:{}", doc.issuer_nif),
        format!("B:{}", doc.customer.nif()),
        format!("C:{}", doc.customer.country),
        format!("D:{}", doc.doc_type().code()),
        format!("E:{}", settings.qr.status_code(doc.status())),
        format!("F:{}", doc.posting_date.format("%Y%m%d")),
        format!("G:{atcud}"),
        format!("H:{}", settings.fiscal_space),
        format!("I1:{}", format_amount(ise.base)),
        format!("I2:{}", format_amount(red.base)),
        format!("I3:{}", format_amount(red.tax)),
        format!("I4:{}", format_amount(int.base)),
        format!("I5:{}", format_amount(int.tax)),
        format!("I6:{}", format_amount(nor.base)),
        format!("I7:{}", format_amount(nor.tax)),
        format!("I8:{}", format_amount(out.base)),
        format!("I9:{}", format_amount(out.tax)),
        format!("N:{}", format_amount(doc.stamp_duty)),
        format!("O:{}", format_amount(total_tax)),
        format!("P:{}", format_amount(doc.totals.gross_total)),
        format!("Q:{}", chain.fragment),
        format!("R:{}", settings.software_certificate_number),
    ]
}

fn print_preview_fields(
    doc: &FiscalDocument,
    atcud: &str,
    chain: &ChainEntry,
    settings: &ComplianceSettings,
) -> Result<Vec<String>, FiscalError> {
    let number = doc
        .number()
        .ok_or_else(|| FiscalError::Validation(format!("document {} has no number", doc.id)))?;
    let buyer = if doc.customer.is_final_consumer() {
        "0"
    } else {
        doc.customer.nif()
    };
    let issuer_country = settings.fiscal_space.split('-').next().unwrap_or("PT");

    Ok(vec![
        format!("A:{atcud}"),
        format!("B:{}", doc.issuer_nif),
        format!("C:{issuer_country}"),
        format!("D:{buyer}"),
        format!("E:{}", doc.customer.country),
        format!("F:{}", doc.doc_type().code()),
        format!("G:{}", settings.qr.status_code(doc.status())),
        format!("H:{}", doc.posting_date.format("%Y%m%d")),
        format!("I1:{number}"),
        format!("I2:{}", format_amount(doc.totals.net_total)),
        format!("I3:{}", format_amount(doc.totals.tax_payable)),
        format!("I4:{}", format_amount(doc.totals.gross_total)),
        format!("I7:{}", chain.fragment),
        format!("I8:{}", settings.software_certificate_number),
        "P:1".to_string(),
    ])
}

/// Replace the status flag of an issued payload, keeping every other field
/// exactly as certified. The flag is `E` in the standard layout and `G` in
/// the print-preview layout, which ends in `P:1`.
pub fn with_status(payload: &str, status: &str) -> Result<String, FiscalError> {
    let tag = if payload.ends_with("*P:1") { "G:" } else { "E:" };
    let mut replaced = false;
    let fields: Vec<String> = payload
        .split('*')
        .map(|field| {
            if !replaced && field.starts_with(tag) {
                replaced = true;
                format!("{tag}{status}")
            } else {
                field.to_string()
            }
        })
        .collect();
    if !replaced {
        return Err(FiscalError::Validation(format!(
            "QR payload has no {tag} status field"
        )));
    }
    Ok(fields.join("*"))
}
