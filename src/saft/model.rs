use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{Address, Customer, FiscalError};

/// SAF-T(PT) namespace.
pub const SAFT_NAMESPACE: &str = "urn:OECD:StandardAuditFile-Tax:PT_1.04_01";
/// Value of `xsi:schemaLocation` on the root element.
pub const SAFT_SCHEMA_LOCATION: &str =
    "urn:OECD:StandardAuditFile-Tax:PT_1.04_01 saftpt1.04_01.xsd";
pub const AUDIT_FILE_VERSION: &str = "1.04_01";
pub(crate) const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// The exporting company (Header).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyInfo {
    /// Entity name as used on documents and series.
    pub entity: String,
    /// Commercial registry id, or the NIF when none.
    pub company_id: String,
    pub nif: String,
    pub name: String,
    pub business_name: Option<String>,
    pub address: Address,
    pub telephone: Option<String>,
    pub email: Option<String>,
}

impl CompanyInfo {
    pub fn new(
        entity: impl Into<String>,
        nif: impl Into<String>,
        name: impl Into<String>,
        address: Address,
    ) -> Self {
        let nif = nif.into();
        Self {
            entity: entity.into(),
            company_id: nif.clone(),
            nif,
            name: name.into(),
            business_name: None,
            address,
            telephone: None,
            email: None,
        }
    }
}

/// Period covered by an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalPeriod {
    pub fiscal_year: i32,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FiscalPeriod {
    /// Calendar fiscal year, 1 January to 31 December.
    pub fn year(fiscal_year: i32) -> Result<Self, FiscalError> {
        let start = NaiveDate::from_ymd_opt(fiscal_year, 1, 1)
            .ok_or_else(|| FiscalError::Validation(format!("invalid fiscal year {fiscal_year}")))?;
        let end = NaiveDate::from_ymd_opt(fiscal_year, 12, 31)
            .ok_or_else(|| FiscalError::Validation(format!("invalid fiscal year {fiscal_year}")))?;
        Ok(Self {
            fiscal_year,
            start,
            end,
        })
    }

    /// Sub-range of a fiscal year (monthly exports).
    pub fn range(fiscal_year: i32, start: NaiveDate, end: NaiveDate) -> Result<Self, FiscalError> {
        if start > end {
            return Err(FiscalError::Validation(format!(
                "period start {start} is after end {end}"
            )));
        }
        Ok(Self {
            fiscal_year,
            start,
            end,
        })
    }

    /// Single month of a calendar fiscal year.
    pub fn month(fiscal_year: i32, month: u32) -> Result<Self, FiscalError> {
        let invalid = || FiscalError::Validation(format!("invalid month {fiscal_year}-{month}"));
        let start = NaiveDate::from_ymd_opt(fiscal_year, month, 1).ok_or_else(invalid)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(fiscal_year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(fiscal_year, month + 1, 1)
        }
        .ok_or_else(invalid)?;
        let end = next.pred_opt().ok_or_else(invalid)?;
        Ok(Self {
            fiscal_year,
            start,
            end,
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Accounting period number (1-12) of a date.
    pub fn period_of(&self, date: NaiveDate) -> u32 {
        date.month()
    }
}

/// Product master record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub code: String,
    pub description: String,
    /// P = product, S = service, O = other, E = excise, I = tax/levy.
    pub product_type: String,
    pub group: Option<String>,
    pub number_code: Option<String>,
}

impl Product {
    pub fn new(code: impl Into<String>, description: impl Into<String>, product_type: &str) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            product_type: product_type.into(),
            group: None,
            number_code: None,
        }
    }
}

/// Tax table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxTableEntry {
    pub tax_type: String,
    /// PT, PT-AC or PT-MA.
    pub region: String,
    pub code: String,
    pub description: String,
    pub percentage: Decimal,
}

impl TaxTableEntry {
    pub fn vat(code: &str, description: &str, percentage: Decimal) -> Self {
        Self {
            tax_type: "IVA".into(),
            region: "PT".into(),
            code: code.into(),
            description: description.into(),
            percentage,
        }
    }
}

/// General-ledger account with opening and closing balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlAccount {
    pub id: String,
    pub description: String,
    pub opening_debit: Decimal,
    pub opening_credit: Decimal,
    pub closing_debit: Decimal,
    pub closing_credit: Decimal,
    /// GR, GA, GM, AR, AA or AM.
    pub grouping_category: String,
    pub grouping_code: Option<String>,
    /// SNC taxonomy code; required for GM accounts.
    pub taxonomy_code: Option<u32>,
}

/// General-ledger journal with its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub id: String,
    pub description: String,
    pub transactions: Vec<GlTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlTransaction {
    pub id: String,
    pub date: NaiveDate,
    pub source_id: String,
    pub description: String,
    pub doc_archival_number: String,
    pub system_entry: NaiveDateTime,
    pub customer_id: Option<String>,
    pub lines: Vec<GlLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlLine {
    pub record_id: String,
    pub account_id: String,
    pub source_document_id: Option<String>,
    pub description: String,
    pub amount: Decimal,
    pub side: EntrySide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntrySide {
    Debit,
    Credit,
}

/// Master data projected into MasterFiles and GeneralLedgerEntries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterData {
    pub gl_accounts: Vec<GlAccount>,
    /// SAF-T `TaxonomyReference`: S (SNC base), M (micro), N (ESNL), O (other).
    pub taxonomy_reference: Option<String>,
    pub customers: Vec<Customer>,
    pub suppliers: Vec<Customer>,
    pub products: Vec<Product>,
    pub tax_table: Vec<TaxTableEntry>,
    pub journals: Vec<Journal>,
}

/// Counts and totals of an export, recomputed from what was written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaftSummary {
    pub fiscal_year: i32,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub customers: usize,
    pub products: usize,
    pub invoices: usize,
    pub voided_invoices: usize,
    pub invoices_total_debit: Decimal,
    pub invoices_total_credit: Decimal,
    pub gl_entries: usize,
    pub gl_total_debit: Decimal,
    pub gl_total_credit: Decimal,
}

/// A generated audit file.
#[derive(Debug, Clone)]
pub struct SaftFile {
    pub xml: String,
    pub summary: SaftSummary,
}

impl SaftFile {
    /// Conventional file name, e.g. `SAFT_PT_501442600_2024.xml`.
    pub fn file_name(&self, nif: &str) -> String {
        format!("SAFT_PT_{nif}_{}.xml", self.summary.fiscal_year)
    }
}
