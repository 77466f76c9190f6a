use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::{Decimal, RoundingStrategy};

use super::error::{FiscalError, validation_failure};
use super::types::*;
use super::validation;

/// Builder for draft fiscal documents.
///
/// Totals are summed from the lines; tax amounts arrive precomputed.
///
/// ```
/// use fatura::core::*;
/// use rust_decimal_macros::dec;
/// use chrono::NaiveDate;
///
/// let series = SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, "A2024");
/// let doc = DocumentBuilder::new("SINV-0001", series, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
///     .issuer_nif("501442600")
///     .customer(Customer::final_consumer())
///     .add_line(LineBuilder::new("P001", "Consultoria", dec!(1), dec!(100))
///         .tax("NOR", dec!(23), dec!(23))
///         .build())
///     .build()
///     .unwrap();
///
/// assert_eq!(doc.totals.gross_total, dec!(123.00));
/// ```
pub struct DocumentBuilder {
    id: String,
    entity: Option<String>,
    issuer_nif: Option<String>,
    series: SeriesKey,
    posting_date: NaiveDate,
    posting_time: NaiveTime,
    system_entry: Option<NaiveDateTime>,
    customer: Option<Customer>,
    lines: Vec<DocumentLine>,
    stamp_duty: Decimal,
    references: Vec<DocumentReference>,
    self_billed: bool,
    created_by: String,
}

impl DocumentBuilder {
    pub fn new(id: impl Into<String>, series: SeriesKey, posting_date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            entity: None,
            issuer_nif: None,
            series,
            posting_date,
            posting_time: NaiveTime::MIN,
            system_entry: None,
            customer: None,
            lines: Vec::new(),
            stamp_duty: Decimal::ZERO,
            references: Vec::new(),
            self_billed: false,
            created_by: "system".into(),
        }
    }

    /// Owning entity. Defaults to the series' entity.
    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn issuer_nif(mut self, nif: impl Into<String>) -> Self {
        self.issuer_nif = Some(nif.into());
        self
    }

    pub fn posting_time(mut self, time: NaiveTime) -> Self {
        self.posting_time = time;
        self
    }

    /// Defaults to posting date + posting time.
    pub fn system_entry(mut self, at: NaiveDateTime) -> Self {
        self.system_entry = Some(at);
        self
    }

    pub fn customer(mut self, customer: Customer) -> Self {
        self.customer = Some(customer);
        self
    }

    pub fn add_line(mut self, line: DocumentLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn stamp_duty(mut self, amount: Decimal) -> Self {
        self.stamp_duty = amount;
        self
    }

    pub fn reference(mut self, number: impl Into<String>, reason: impl Into<String>) -> Self {
        self.references.push(DocumentReference {
            number: number.into(),
            reason: Some(reason.into()),
        });
        self
    }

    pub fn self_billed(mut self, yes: bool) -> Self {
        self.self_billed = yes;
        self
    }

    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = user.into();
        self
    }

    /// Build the draft, summing totals and running validation.
    /// Returns all validation errors (not just the first).
    pub fn build(self) -> Result<FiscalDocument, FiscalError> {
        let doc = self.build_unchecked()?;
        let errors = validation::validate_document(&doc);
        if !errors.is_empty() {
            return Err(validation_failure(&errors));
        }
        Ok(doc)
    }

    /// Build without validation. Used for importing documents already issued elsewhere.
    pub fn build_unchecked(self) -> Result<FiscalDocument, FiscalError> {
        let issuer_nif = self
            .issuer_nif
            .ok_or_else(|| FiscalError::Validation("issuer NIF is required".into()))?;
        let customer = self
            .customer
            .ok_or_else(|| FiscalError::Validation("customer is required".into()))?;

        if self.lines.len() > 10_000 {
            return Err(FiscalError::Validation(
                "document cannot have more than 10,000 lines".into(),
            ));
        }

        let mut lines = self.lines;
        for (i, line) in lines.iter_mut().enumerate() {
            line.line_number = i as u32 + 1;
        }

        let totals = validation::calculate_totals(&lines, self.stamp_duty);

        Ok(FiscalDocument {
            id: self.id,
            entity: self.entity.unwrap_or_else(|| self.series.entity.clone()),
            issuer_nif,
            system_entry: self
                .system_entry
                .unwrap_or_else(|| self.posting_date.and_time(self.posting_time)),
            series: self.series,
            posting_date: self.posting_date,
            posting_time: self.posting_time,
            customer,
            lines,
            stamp_duty: self.stamp_duty,
            totals,
            references: self.references,
            self_billed: self.self_billed,
            state: DocumentState::Draft,
            created_by: self.created_by,
            numbering: None,
            chain: None,
            qr: None,
            voidance: None,
        })
    }
}

/// Builder for document lines.
pub struct LineBuilder {
    product_code: String,
    description: String,
    quantity: Decimal,
    unit: String,
    unit_price: Decimal,
    net_amount: Option<Decimal>,
    tax: LineTax,
    exemption: Option<TaxExemption>,
    tax_point_date: Option<NaiveDate>,
}

impl LineBuilder {
    pub fn new(
        product_code: impl Into<String>,
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Self {
        Self {
            product_code: product_code.into(),
            description: description.into(),
            quantity,
            unit: "UN".into(),
            unit_price,
            net_amount: None,
            tax: LineTax {
                code: None,
                rate: Decimal::ZERO,
                amount: Decimal::ZERO,
            },
            exemption: None,
            tax_point_date: None,
        }
    }

    /// Applied tax: AT code, rate in percent, and the precomputed amount.
    pub fn tax(mut self, code: impl Into<String>, rate: Decimal, amount: Decimal) -> Self {
        self.tax = LineTax {
            code: Some(code.into()),
            rate,
            amount,
        };
        self
    }

    /// Rate and amount without a code. The code is inferred from the rate downstream.
    pub fn tax_rate(mut self, rate: Decimal, amount: Decimal) -> Self {
        self.tax = LineTax {
            code: None,
            rate,
            amount,
        };
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Override the net amount (defaults to quantity × unit price, rounded to cents).
    pub fn net_amount(mut self, amount: Decimal) -> Self {
        self.net_amount = Some(amount);
        self
    }

    pub fn exemption(mut self, code: impl Into<String>, reason: impl Into<String>) -> Self {
        self.exemption = Some(TaxExemption {
            code: code.into(),
            reason: reason.into(),
        });
        self
    }

    pub fn tax_point_date(mut self, date: NaiveDate) -> Self {
        self.tax_point_date = Some(date);
        self
    }

    pub fn build(self) -> DocumentLine {
        let net_amount = self.net_amount.unwrap_or_else(|| {
            (self.quantity * self.unit_price)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        });
        DocumentLine {
            line_number: 0,
            product_code: self.product_code,
            description: self.description,
            quantity: self.quantity,
            unit: self.unit,
            unit_price: self.unit_price,
            net_amount,
            tax: self.tax,
            exemption: self.exemption,
            tax_point_date: self.tax_point_date,
        }
    }
}
