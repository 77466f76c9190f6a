use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::nif::FINAL_CONSUMER_NIF;

/// A fiscal document as seen by the compliance core: header, lines,
/// precomputed totals, and the certified fields written at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalDocument {
    /// Host identifier of the record (draft name). Stable across the lifecycle.
    pub id: String,
    /// Owning legal entity (company).
    pub entity: String,
    /// NIF of the issuing company.
    pub issuer_nif: String,
    /// Series the document is numbered in. Also fixes the AT document type.
    pub series: SeriesKey,
    pub posting_date: NaiveDate,
    pub posting_time: NaiveTime,
    /// Moment the record was saved in the system (SAF-T `SystemEntryDate`).
    pub system_entry: NaiveDateTime,
    pub customer: Customer,
    pub lines: Vec<DocumentLine>,
    /// Stamp duty (Imposto do Selo) charged on the document.
    pub stamp_duty: Decimal,
    pub totals: DocumentTotals,
    /// Documents this one rectifies (credit/debit notes, returns).
    pub references: Vec<DocumentReference>,
    /// Document issued by the customer on behalf of the issuer (autofaturação).
    pub self_billed: bool,
    pub state: DocumentState,
    /// User who created or submitted the document (SAF-T `SourceID`).
    pub created_by: String,
    /// Sequence data issued at submission.
    pub numbering: Option<SequenceAssignment>,
    /// Hash-chain outputs written by the signer.
    pub chain: Option<ChainEntry>,
    /// QR payload and rendered image.
    pub qr: Option<QrCode>,
    /// Set when a rectifying document voids this one.
    pub voidance: Option<Voidance>,
}

impl FiscalDocument {
    pub fn doc_type(&self) -> DocumentType {
        self.series.doc_type
    }

    /// Final document number, once issued.
    pub fn number(&self) -> Option<&str> {
        self.numbering.as_ref().map(|n| n.number.as_str())
    }

    pub fn atcud(&self) -> Option<&str> {
        self.numbering.as_ref().map(|n| n.atcud.as_str())
    }

    pub fn sequence(&self) -> Option<u64> {
        self.numbering.as_ref().map(|n| n.sequence)
    }

    pub fn is_signed(&self) -> bool {
        self.chain.is_some()
    }

    /// Number if issued, otherwise the host id. Used in messages and audit entries.
    pub fn display_name(&self) -> &str {
        self.number().unwrap_or(&self.id)
    }

    /// Status flag shared by the QR payload (field E) and SAF-T `InvoiceStatus`.
    pub fn status(&self) -> DocumentStatus {
        if self.state == DocumentState::Voided {
            DocumentStatus::Voided
        } else if self.self_billed {
            DocumentStatus::SelfBilled
        } else {
            DocumentStatus::Normal
        }
    }
}

/// Identifies a stream of documents: one AT document type, one fiscal
/// year, one legal entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub entity: String,
    pub doc_type: DocumentType,
    pub fiscal_year: i32,
    /// Series code as registered with AT (e.g. "A2024").
    pub code: String,
}

impl SeriesKey {
    pub fn new(
        entity: impl Into<String>,
        doc_type: DocumentType,
        fiscal_year: i32,
        code: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            doc_type,
            fiscal_year,
            code: code.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} ({})",
            self.doc_type.code(),
            self.code,
            self.fiscal_year,
            self.entity
        )
    }
}

/// AT document type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentType {
    /// FT: Fatura.
    Invoice,
    /// FS: Fatura simplificada.
    SimplifiedInvoice,
    /// FR: Fatura-recibo.
    InvoiceReceipt,
    /// NC: Nota de crédito.
    CreditNote,
    /// ND: Nota de débito.
    DebitNote,
    /// GR: Guia de remessa.
    DeliveryNote,
    /// GT: Guia de transporte.
    TransportGuide,
    /// GD: Guia ou nota de devolução.
    ReturnNote,
    /// OR: Orçamento.
    Quotation,
    /// PF: Fatura pró-forma.
    ProForma,
    /// RG: Recibo.
    Receipt,
}

/// SAF-T section a document type is exported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentClass {
    SalesInvoices,
    MovementOfGoods,
    WorkingDocuments,
    Payments,
}

impl DocumentClass {
    /// Class code used by the AT series web service (`classeDoc`).
    pub fn code(&self) -> &'static str {
        match self {
            Self::SalesInvoices => "SI",
            Self::MovementOfGoods => "MG",
            Self::WorkingDocuments => "WD",
            Self::Payments => "PY",
        }
    }
}

impl DocumentType {
    pub const ALL: [DocumentType; 11] = [
        Self::Invoice,
        Self::SimplifiedInvoice,
        Self::InvoiceReceipt,
        Self::CreditNote,
        Self::DebitNote,
        Self::DeliveryNote,
        Self::TransportGuide,
        Self::ReturnNote,
        Self::Quotation,
        Self::ProForma,
        Self::Receipt,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Invoice => "FT",
            Self::SimplifiedInvoice => "FS",
            Self::InvoiceReceipt => "FR",
            Self::CreditNote => "NC",
            Self::DebitNote => "ND",
            Self::DeliveryNote => "GR",
            Self::TransportGuide => "GT",
            Self::ReturnNote => "GD",
            Self::Quotation => "OR",
            Self::ProForma => "PF",
            Self::Receipt => "RG",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn class(&self) -> DocumentClass {
        match self {
            Self::Invoice
            | Self::SimplifiedInvoice
            | Self::InvoiceReceipt
            | Self::CreditNote
            | Self::DebitNote => DocumentClass::SalesInvoices,
            Self::DeliveryNote | Self::TransportGuide | Self::ReturnNote => {
                DocumentClass::MovementOfGoods
            }
            Self::Quotation | Self::ProForma => DocumentClass::WorkingDocuments,
            Self::Receipt => DocumentClass::Payments,
        }
    }

    /// Credit documents post their lines as `DebitAmount` in SAF-T.
    pub fn is_credit(&self) -> bool {
        matches!(self, Self::CreditNote)
    }

    /// Types whose submission voids the documents they reference.
    pub fn is_rectifying(&self) -> bool {
        matches!(self, Self::CreditNote | Self::ReturnNote)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Lifecycle state of the host record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentState {
    Draft,
    Submitted,
    Voided,
}

/// Document status flag (QR field E, SAF-T `InvoiceStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentStatus {
    Normal,
    Voided,
    SelfBilled,
    Summarized,
    Invoiced,
}

impl DocumentStatus {
    /// Default single-letter code. Overridable through `QrSettings::status_codes`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Normal => "N",
            Self::Voided => "A",
            Self::SelfBilled => "S",
            Self::Summarized => "R",
            Self::Invoiced => "F",
        }
    }
}

/// Buyer of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Host customer id (SAF-T `CustomerID`).
    pub id: String,
    pub name: String,
    /// Tax id. `None` means final consumer.
    pub tax_id: Option<String>,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
    pub address: Option<Address>,
}

impl Customer {
    /// Id used for the implicit final-consumer customer.
    pub const FINAL_CONSUMER_ID: &'static str = "CONSUMIDOR-FINAL";

    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        tax_id: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tax_id: Some(tax_id.into()),
            country: country.into(),
            address: None,
        }
    }

    pub fn final_consumer() -> Self {
        Self {
            id: Self::FINAL_CONSUMER_ID.into(),
            name: "Consumidor final".into(),
            tax_id: None,
            country: "PT".into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn is_final_consumer(&self) -> bool {
        match self.tax_id.as_deref() {
            None => true,
            Some(nif) => nif.trim().is_empty() || nif == FINAL_CONSUMER_NIF,
        }
    }

    /// Tax id as printed on fiscal outputs, defaulting to the final-consumer NIF.
    pub fn nif(&self) -> &str {
        if self.is_final_consumer() {
            FINAL_CONSUMER_NIF
        } else {
            self.tax_id.as_deref().unwrap_or(FINAL_CONSUMER_NIF)
        }
    }
}

/// Postal address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub region: Option<String>,
    pub country: String,
}

impl Address {
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        postal_code: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            city: city.into(),
            postal_code: postal_code.into(),
            region: None,
            country: country.into(),
        }
    }

    /// Placeholder address SAF-T uses when none is known.
    pub fn unknown() -> Self {
        Self::new("Desconhecido", "Desconhecido", "0000-000", "PT")
    }
}

/// A document line. Tax values arrive already computed by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub line_number: u32,
    pub product_code: String,
    pub description: String,
    pub quantity: Decimal,
    /// Unit of measure (e.g. "UN", "KG", "H").
    pub unit: String,
    pub unit_price: Decimal,
    /// Net line amount, excluding tax.
    pub net_amount: Decimal,
    pub tax: LineTax,
    /// Required for exempt lines.
    pub exemption: Option<TaxExemption>,
    /// Date goods or services were supplied. Defaults to the posting date.
    pub tax_point_date: Option<NaiveDate>,
}

/// Tax applied to a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineTax {
    /// AT tax code (ISE, RED, INT, NOR, OUT). Inferred from the rate when absent.
    pub code: Option<String>,
    /// Percentage (e.g. 23 for 23%).
    pub rate: Decimal,
    pub amount: Decimal,
}

impl LineTax {
    /// Explicit code, or the AT code implied by the rate (mainland, Azores
    /// and Madeira tables). Unknown rates map to "OUT".
    pub fn effective_code(&self) -> String {
        if let Some(code) = self.code.as_deref().filter(|c| !c.trim().is_empty()) {
            return code.to_string();
        }
        let code = match self.rate.normalize().to_string().as_str() {
            "0" => "ISE",
            "4" | "5" | "6" => "RED",
            "9" | "12" | "13" => "INT",
            "16" | "22" | "23" => "NOR",
            _ => "OUT",
        };
        code.to_string()
    }
}

/// VAT exemption reason and its AT code (e.g. "M07").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxExemption {
    pub code: String,
    pub reason: String,
}

/// Document-level totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub net_total: Decimal,
    pub tax_payable: Decimal,
    pub gross_total: Decimal,
}

/// Reference to a rectified document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    /// Final number of the referenced document (e.g. "FT A2024/00001").
    pub number: String,
    pub reason: Option<String>,
}

/// Number and ATCUD issued by the sequence authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceAssignment {
    pub sequence: u64,
    pub number: String,
    pub atcud: String,
}

/// Hash-chain outputs for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Hash of the predecessor in the series, or the seed "0".
    pub previous_hash: String,
    /// Uppercase hex SHA-1 of the signature payload.
    pub current_hash: String,
    /// Base64 RSA-PKCS1v15/SHA-256 signature.
    pub signature: String,
    /// Four-character fragment printed on the document.
    pub fragment: String,
}

/// QR payload and its PNG rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCode {
    pub payload: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub png: Vec<u8>,
}

/// How and when a document was voided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voidance {
    /// Number of the rectifying document.
    pub by: String,
    pub date: NaiveDate,
    pub reason: String,
}

/// Format an amount with exactly two decimals and a dot separator.
pub fn format_amount(d: Decimal) -> String {
    let mut rounded = d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// AT series validation code: one or more ASCII letters and digits.
pub fn is_validation_code(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// `{validation code}-{sequence}`, the sequence positive and unpadded.
pub fn is_atcud(text: &str) -> bool {
    match text.rsplit_once('-') {
        Some((code, seq)) => {
            is_validation_code(code)
                && !seq.is_empty()
                && !seq.starts_with('0')
                && seq.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
