use rust_decimal::Decimal;

use super::error::ValidationError;
use super::nif::validate_nif;
use super::types::*;

/// Validate a document before it enters the fiscal pipeline.
/// Returns all validation errors found (not just the first).
pub fn validate_document(doc: &FiscalDocument) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // PT-01: issuer NIF must be a valid Portuguese NIF
    if let Err(e) = validate_nif(&doc.issuer_nif) {
        errors.push(ValidationError::with_rule(
            "issuer_nif",
            e.to_string(),
            "PT-01",
        ));
    }

    validate_customer(&doc.customer, &mut errors);

    // PT-03: at least one line
    if doc.lines.is_empty() {
        errors.push(ValidationError::with_rule(
            "lines",
            "document must have at least one line",
            "PT-03",
        ));
    }

    for (i, line) in doc.lines.iter().enumerate() {
        validate_line(line, i, &mut errors);
    }

    validate_totals(doc, &mut errors);

    // PT-07: rectifying documents must reference what they rectify
    if doc.doc_type().is_rectifying() && doc.references.is_empty() {
        errors.push(ValidationError::with_rule(
            "references",
            format!(
                "{} must reference the document it rectifies",
                doc.doc_type().code()
            ),
            "PT-07",
        ));
    }

    // PT-08: posting date inside the series' fiscal year
    if chrono::Datelike::year(&doc.posting_date) != doc.series.fiscal_year {
        errors.push(ValidationError::with_rule(
            "posting_date",
            format!(
                "posting date {} is outside fiscal year {} of series {}",
                doc.posting_date, doc.series.fiscal_year, doc.series.code
            ),
            "PT-08",
        ));
    }

    if doc.stamp_duty < Decimal::ZERO {
        errors.push(ValidationError::with_rule(
            "stamp_duty",
            "stamp duty must not be negative",
            "PT-09",
        ));
    }

    // PT-10: a series numbers documents of its own entity only
    if doc.entity != doc.series.entity {
        errors.push(ValidationError::with_rule(
            "entity",
            format!(
                "document entity '{}' does not own series {}",
                doc.entity, doc.series
            ),
            "PT-10",
        ));
    }

    errors
}

fn validate_customer(customer: &Customer, errors: &mut Vec<ValidationError>) {
    if customer.name.trim().is_empty() {
        errors.push(ValidationError::with_rule(
            "customer.name",
            "customer name must not be empty",
            "PT-02",
        ));
    }

    // PT-02: Portuguese customer NIFs are checksummed; final consumer and
    // foreign tax ids are not.
    if !customer.is_final_consumer() && customer.country == "PT" {
        if let Some(Err(e)) = customer.tax_id.as_deref().map(validate_nif) {
            errors.push(ValidationError::with_rule(
                "customer.tax_id",
                e.to_string(),
                "PT-02",
            ));
        }
    }

    if customer.country.len() != 2 {
        errors.push(ValidationError::with_rule(
            "customer.country",
            "country must be an ISO 3166-1 alpha-2 code",
            "PT-02",
        ));
    }
}

fn validate_line(line: &DocumentLine, idx: usize, errors: &mut Vec<ValidationError>) {
    let prefix = format!("lines[{idx}]");

    if line.product_code.trim().is_empty() {
        errors.push(ValidationError::with_rule(
            format!("{prefix}.product_code"),
            "product code must not be empty",
            "PT-04",
        ));
    }
    if line.description.trim().is_empty() {
        errors.push(ValidationError::with_rule(
            format!("{prefix}.description"),
            "description must not be empty",
            "PT-04",
        ));
    }
    if line.quantity <= Decimal::ZERO {
        errors.push(ValidationError::with_rule(
            format!("{prefix}.quantity"),
            "quantity must be positive",
            "PT-04",
        ));
    }
    if line.tax.rate < Decimal::ZERO || line.tax.amount < Decimal::ZERO {
        errors.push(ValidationError::with_rule(
            format!("{prefix}.tax"),
            "tax rate and amount must not be negative",
            "PT-04",
        ));
    }

    // PT-05: exempt lines carry an exemption code and reason
    if line.tax.rate.is_zero() {
        match &line.exemption {
            Some(ex) if !ex.code.trim().is_empty() && !ex.reason.trim().is_empty() => {}
            _ => errors.push(ValidationError::with_rule(
                format!("{prefix}.exemption"),
                "exempt line requires a tax exemption code and reason",
                "PT-05",
            )),
        }
    }
}

fn validate_totals(doc: &FiscalDocument, errors: &mut Vec<ValidationError>) {
    let net: Decimal = doc.lines.iter().map(|l| l.net_amount).sum();
    let tax: Decimal = doc.lines.iter().map(|l| l.tax.amount).sum();
    let t = &doc.totals;

    // PT-06: totals must agree with the lines
    if t.net_total != net {
        errors.push(ValidationError::with_rule(
            "totals.net_total",
            format!("net total {} does not match sum of lines {}", t.net_total, net),
            "PT-06",
        ));
    }
    if t.tax_payable != tax {
        errors.push(ValidationError::with_rule(
            "totals.tax_payable",
            format!("tax payable {} does not match sum of line taxes {}", t.tax_payable, tax),
            "PT-06",
        ));
    }
    let expected_gross = t.net_total + t.tax_payable + doc.stamp_duty;
    if t.gross_total != expected_gross {
        errors.push(ValidationError::with_rule(
            "totals.gross_total",
            format!(
                "gross total {} does not equal net + tax + stamp duty ({})",
                t.gross_total, expected_gross
            ),
            "PT-06",
        ));
    }
}

/// Sum line amounts into document totals. No tax is calculated here.
pub fn calculate_totals(lines: &[DocumentLine], stamp_duty: Decimal) -> DocumentTotals {
    let net_total: Decimal = lines.iter().map(|l| l.net_amount).sum();
    let tax_payable: Decimal = lines.iter().map(|l| l.tax.amount).sum();
    DocumentTotals {
        net_total,
        tax_payable,
        gross_total: net_total + tax_payable + stamp_duty,
    }
}
