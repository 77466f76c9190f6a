use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;

use crate::core::{
    Address, Customer, DocumentClass, DocumentState, FiscalDocument, FiscalError, ValidationError,
    validate_nif, validation_failure,
};
use crate::settings::{ComplianceSettings, SaftHashSource};
use crate::xml_utils::XmlWriter;

use super::model::*;

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const UNKNOWN: &str = "Desconhecido";

/// Builds a SAF-T(PT) audit file from submitted documents and master data.
///
/// Read-only: documents are consumed as already certified. Section counts
/// and totals are recomputed from what is written.
#[derive(Debug)]
pub struct SaftExporter<'a> {
    settings: &'a ComplianceSettings,
    company: &'a CompanyInfo,
    master: &'a MasterData,
    created_on: NaiveDate,
}

impl<'a> SaftExporter<'a> {
    pub fn new(
        settings: &'a ComplianceSettings,
        company: &'a CompanyInfo,
        master: &'a MasterData,
    ) -> Self {
        Self {
            settings,
            company,
            master,
            created_on: Utc::now().date_naive(),
        }
    }

    /// Override `DateCreated` (defaults to today, UTC).
    pub fn created_on(mut self, date: NaiveDate) -> Self {
        self.created_on = date;
        self
    }

    /// Settings and company identity required before exporting.
    pub fn precheck(&self) -> Result<(), FiscalError> {
        let mut errors: Vec<ValidationError> = self
            .settings
            .validate()
            .into_iter()
            .filter(|e| {
                matches!(
                    e.field.as_str(),
                    "software_certificate_number"
                        | "software_provider_nif"
                        | "product_id"
                        | "product_version"
                        | "tax_accounting_basis"
                        | "currency"
                )
            })
            .collect();
        if let Err(e) = validate_nif(&self.company.nif) {
            errors.push(ValidationError::new("company.nif", e.to_string()));
        }
        if self.company.name.trim().is_empty() {
            errors.push(ValidationError::new("company.name", "company name is required"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(validation_failure(&errors))
        }
    }

    /// Generate the audit file for `period`.
    ///
    /// Only submitted or voided sales invoices of the company's entity
    /// posted inside the period are exported; anything else in `documents`
    /// is ignored.
    pub fn generate(
        &self,
        documents: &[FiscalDocument],
        period: &FiscalPeriod,
    ) -> Result<SaftFile, FiscalError> {
        self.precheck()?;

        let mut invoices: Vec<&FiscalDocument> = documents
            .iter()
            .filter(|d| d.entity == self.company.entity)
            .filter(|d| d.doc_type().class() == DocumentClass::SalesInvoices)
            .filter(|d| d.state != DocumentState::Draft)
            .filter(|d| period.contains(d.posting_date))
            .collect();
        invoices.sort_by(|a, b| {
            (a.doc_type(), &a.series.code, a.posting_date, a.sequence())
                .cmp(&(b.doc_type(), &b.series.code, b.posting_date, b.sequence()))
        });

        if let Some(doc) = invoices.iter().find(|d| d.numbering.is_none() || d.chain.is_none()) {
            return Err(FiscalError::Validation(format!(
                "document {} is submitted but has no ATCUD or signature",
                doc.display_name()
            )));
        }

        let mut summary = SaftSummary {
            fiscal_year: period.fiscal_year,
            start: Some(period.start),
            end: Some(period.end),
            ..Default::default()
        };

        let mut w = XmlWriter::new()?;
        w.start_element_with_attrs(
            "AuditFile",
            &[
                ("xmlns", SAFT_NAMESPACE),
                ("xmlns:xsi", XSI_NAMESPACE),
                ("xsi:schemaLocation", SAFT_SCHEMA_LOCATION),
            ],
        )?;

        self.write_header(&mut w, period)?;
        self.write_master_files(&mut w, &invoices, &mut summary)?;
        self.write_general_ledger_entries(&mut w, period, &mut summary)?;
        self.write_source_documents(&mut w, period, &invoices, &mut summary)?;

        w.end_element("AuditFile")?;
        let xml = w.into_string()?;

        tracing::info!(
            company = %self.company.nif,
            fiscal_year = period.fiscal_year,
            invoices = summary.invoices,
            "SAF-T generated"
        );
        Ok(SaftFile { xml, summary })
    }

    fn write_header(&self, w: &mut XmlWriter, period: &FiscalPeriod) -> Result<(), FiscalError> {
        let s = self.settings;
        let c = self.company;

        w.start_element("Header")?;
        w.text_element("AuditFileVersion", AUDIT_FILE_VERSION)?;
        w.text_element("CompanyID", &c.company_id)?;
        w.text_element("TaxRegistrationNumber", &c.nif)?;
        w.text_element("TaxAccountingBasis", &s.tax_accounting_basis)?;
        w.text_element("CompanyName", &c.name)?;
        w.optional_element("BusinessName", c.business_name.as_deref())?;
        w.start_element("CompanyAddress")?;
        write_address_fields(w, &c.address)?;
        w.end_element("CompanyAddress")?;
        w.text_element("FiscalYear", &period.fiscal_year.to_string())?;
        w.text_element("StartDate", &period.start.to_string())?;
        w.text_element("EndDate", &period.end.to_string())?;
        w.text_element("CurrencyCode", &s.currency)?;
        w.text_element("DateCreated", &self.created_on.to_string())?;
        w.text_element("TaxEntity", &s.tax_entity)?;
        w.text_element("ProductCompanyTaxID", &s.software_provider_nif)?;
        w.text_element("SoftwareCertificateNumber", &s.software_certificate_number)?;
        w.text_element("ProductID", &s.product_id)?;
        w.text_element("ProductVersion", &s.product_version)?;
        w.optional_element("Telephone", c.telephone.as_deref())?;
        w.optional_element("Email", c.email.as_deref())?;
        w.end_element("Header")?;
        Ok(())
    }

    fn write_master_files(
        &self,
        w: &mut XmlWriter,
        invoices: &[&FiscalDocument],
        summary: &mut SaftSummary,
    ) -> Result<(), FiscalError> {
        w.start_element("MasterFiles")?;

        if !self.master.gl_accounts.is_empty() || self.master.taxonomy_reference.is_some() {
            w.start_element("GeneralLedgerAccounts")?;
            w.text_element(
                "TaxonomyReference",
                self.master.taxonomy_reference.as_deref().unwrap_or("S"),
            )?;
            for account in &self.master.gl_accounts {
                write_account(w, account)?;
            }
            w.end_element("GeneralLedgerAccounts")?;
        }

        let customers = collect_customers(&self.master.customers, invoices);
        for customer in &customers {
            write_party(w, "Customer", "CustomerID", "CustomerTaxID", customer)?;
        }
        summary.customers = customers.len();

        for supplier in &self.master.suppliers {
            write_party(w, "Supplier", "SupplierID", "SupplierTaxID", supplier)?;
        }

        let products = collect_products(&self.master.products, invoices);
        for product in &products {
            w.start_element("Product")?;
            w.text_element("ProductType", &product.product_type)?;
            w.text_element("ProductCode", &product.code)?;
            w.optional_element("ProductGroup", product.group.as_deref())?;
            w.text_element("ProductDescription", &product.description)?;
            w.text_element(
                "ProductNumberCode",
                product.number_code.as_deref().unwrap_or(&product.code),
            )?;
            w.end_element("Product")?;
        }
        summary.products = products.len();

        let taxes = collect_tax_table(&self.master.tax_table, invoices, &self.settings.fiscal_space);
        if !taxes.is_empty() {
            w.start_element("TaxTable")?;
            for entry in &taxes {
                w.start_element("TaxTableEntry")?;
                w.text_element("TaxType", &entry.tax_type)?;
                w.text_element("TaxCountryRegion", &entry.region)?;
                w.text_element("TaxCode", &entry.code)?;
                w.text_element("Description", &entry.description)?;
                w.amount_element("TaxPercentage", entry.percentage)?;
                w.end_element("TaxTableEntry")?;
            }
            w.end_element("TaxTable")?;
        }

        w.end_element("MasterFiles")?;
        Ok(())
    }

    fn write_general_ledger_entries(
        &self,
        w: &mut XmlWriter,
        period: &FiscalPeriod,
        summary: &mut SaftSummary,
    ) -> Result<(), FiscalError> {
        let transactions = self
            .master
            .journals
            .iter()
            .flat_map(|j| &j.transactions)
            .filter(|t| period.contains(t.date));
        let mut count = 0usize;
        let mut debit = Decimal::ZERO;
        let mut credit = Decimal::ZERO;
        for t in transactions {
            count += 1;
            for line in &t.lines {
                match line.side {
                    EntrySide::Debit => debit += line.amount,
                    EntrySide::Credit => credit += line.amount,
                }
            }
        }

        w.start_element("GeneralLedgerEntries")?;
        w.text_element("NumberOfEntries", &count.to_string())?;
        w.amount_element("TotalDebit", debit)?;
        w.amount_element("TotalCredit", credit)?;

        for journal in &self.master.journals {
            let in_period: Vec<_> = journal
                .transactions
                .iter()
                .filter(|t| period.contains(t.date))
                .collect();
            if in_period.is_empty() {
                continue;
            }
            w.start_element("Journal")?;
            w.text_element("JournalID", &journal.id)?;
            w.text_element("Description", &journal.description)?;
            for t in in_period {
                write_transaction(w, t, period)?;
            }
            w.end_element("Journal")?;
        }
        w.end_element("GeneralLedgerEntries")?;

        summary.gl_entries = count;
        summary.gl_total_debit = debit;
        summary.gl_total_credit = credit;
        Ok(())
    }

    fn write_source_documents(
        &self,
        w: &mut XmlWriter,
        period: &FiscalPeriod,
        invoices: &[&FiscalDocument],
        summary: &mut SaftSummary,
    ) -> Result<(), FiscalError> {
        let (debit, credit) = sales_totals(invoices);

        w.start_element("SourceDocuments")?;
        w.start_element("SalesInvoices")?;
        w.text_element("NumberOfEntries", &invoices.len().to_string())?;
        w.amount_element("TotalDebit", debit)?;
        w.amount_element("TotalCredit", credit)?;
        for doc in invoices {
            self.write_invoice(w, period, doc)?;
        }
        w.end_element("SalesInvoices")?;
        w.end_element("SourceDocuments")?;

        summary.invoices = invoices.len();
        summary.voided_invoices = invoices
            .iter()
            .filter(|d| d.state == DocumentState::Voided)
            .count();
        summary.invoices_total_debit = debit;
        summary.invoices_total_credit = credit;
        Ok(())
    }

    fn write_invoice(
        &self,
        w: &mut XmlWriter,
        period: &FiscalPeriod,
        doc: &FiscalDocument,
    ) -> Result<(), FiscalError> {
        let (Some(numbering), Some(chain)) = (&doc.numbering, &doc.chain) else {
            return Err(FiscalError::Validation(format!(
                "document {} is not certified",
                doc.display_name()
            )));
        };
        let status = doc.status();
        let status_date = match &doc.voidance {
            Some(v) if doc.state == DocumentState::Voided => v.date.and_time(chrono::NaiveTime::MIN),
            _ => doc.system_entry,
        };

        w.start_element("Invoice")?;
        w.text_element("InvoiceNo", &numbering.number)?;
        w.text_element("ATCUD", &numbering.atcud)?;

        w.start_element("DocumentStatus")?;
        w.text_element("InvoiceStatus", status.code())?;
        w.text_element("InvoiceStatusDate", &format_datetime(status_date))?;
        w.optional_element("Reason", doc.voidance.as_ref().map(|v| v.reason.as_str()))?;
        w.text_element("SourceID", &doc.created_by)?;
        w.text_element("SourceBilling", "P")?;
        w.end_element("DocumentStatus")?;

        let hash = match self.settings.saft_hash {
            SaftHashSource::ChainHash => &chain.current_hash,
            SaftHashSource::Signature => &chain.signature,
        };
        w.text_element("Hash", hash)?;
        w.text_element("HashControl", "1")?;
        w.text_element("Period", &period.period_of(doc.posting_date).to_string())?;
        w.text_element("InvoiceDate", &doc.posting_date.to_string())?;
        w.text_element("InvoiceType", doc.doc_type().code())?;

        w.start_element("SpecialRegimes")?;
        w.text_element("SelfBillingIndicator", if doc.self_billed { "1" } else { "0" })?;
        w.text_element("CashVATSchemeIndicator", "0")?;
        w.text_element("ThirdPartiesBillingIndicator", "0")?;
        w.end_element("SpecialRegimes")?;

        w.text_element("SourceID", &doc.created_by)?;
        w.text_element("SystemEntryDate", &format_datetime(doc.system_entry))?;
        w.text_element("CustomerID", &doc.customer.id)?;

        let amount_tag = if doc.doc_type().is_credit() {
            "DebitAmount"
        } else {
            "CreditAmount"
        };
        for line in &doc.lines {
            w.start_element("Line")?;
            w.text_element("LineNumber", &line.line_number.to_string())?;
            w.text_element("ProductCode", &line.product_code)?;
            w.text_element("ProductDescription", &line.description)?;
            w.decimal_element("Quantity", line.quantity)?;
            w.text_element("UnitOfMeasure", &line.unit)?;
            w.decimal_element("UnitPrice", line.unit_price)?;
            w.text_element(
                "TaxPointDate",
                &line.tax_point_date.unwrap_or(doc.posting_date).to_string(),
            )?;
            for r in &doc.references {
                w.start_element("References")?;
                w.text_element("Reference", &r.number)?;
                w.optional_element("Reason", r.reason.as_deref())?;
                w.end_element("References")?;
            }
            w.text_element("Description", &line.description)?;
            w.amount_element(amount_tag, line.net_amount)?;
            w.start_element("Tax")?;
            w.text_element("TaxType", "IVA")?;
            w.text_element("TaxCountryRegion", &self.settings.fiscal_space)?;
            w.text_element("TaxCode", &line.tax.effective_code())?;
            w.amount_element("TaxPercentage", line.tax.rate)?;
            w.end_element("Tax")?;
            if let Some(ex) = &line.exemption {
                w.text_element("TaxExemptionReason", &ex.reason)?;
                w.text_element("TaxExemptionCode", &ex.code)?;
            }
            w.end_element("Line")?;
        }

        w.start_element("DocumentTotals")?;
        w.amount_element("TaxPayable", doc.totals.tax_payable)?;
        w.amount_element("NetTotal", doc.totals.net_total)?;
        w.amount_element("GrossTotal", doc.totals.gross_total)?;
        w.end_element("DocumentTotals")?;

        w.end_element("Invoice")?;
        Ok(())
    }
}

/// (TotalDebit, TotalCredit) of SalesInvoices: net totals of credit notes
/// and of every other type, voided documents excluded.
pub fn sales_totals(invoices: &[&FiscalDocument]) -> (Decimal, Decimal) {
    invoices
        .iter()
        .filter(|d| d.state != DocumentState::Voided)
        .fold((Decimal::ZERO, Decimal::ZERO), |(debit, credit), d| {
            if d.doc_type().is_credit() {
                (debit + d.totals.net_total, credit)
            } else {
                (debit, credit + d.totals.net_total)
            }
        })
}

fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

fn write_address_fields(w: &mut XmlWriter, address: &Address) -> Result<(), FiscalError> {
    w.text_element("AddressDetail", non_empty(&address.street))?;
    w.text_element("City", non_empty(&address.city))?;
    w.text_element("PostalCode", non_empty(&address.postal_code))?;
    w.optional_element("Region", address.region.as_deref())?;
    w.text_element("Country", non_empty(&address.country))?;
    Ok(())
}

fn non_empty(s: &str) -> &str {
    if s.trim().is_empty() { UNKNOWN } else { s }
}

fn write_party(
    w: &mut XmlWriter,
    element: &str,
    id_tag: &str,
    tax_tag: &str,
    party: &Customer,
) -> Result<(), FiscalError> {
    let address = party.address.clone().unwrap_or_else(|| Address {
        country: if party.is_final_consumer() {
            UNKNOWN.into()
        } else {
            party.country.clone()
        },
        ..Address::unknown()
    });

    w.start_element(element)?;
    w.text_element(id_tag, &party.id)?;
    w.text_element("AccountID", UNKNOWN)?;
    w.text_element(tax_tag, party.nif())?;
    w.text_element("CompanyName", &party.name)?;
    w.start_element("BillingAddress")?;
    write_address_fields(w, &address)?;
    w.end_element("BillingAddress")?;
    w.text_element("SelfBillingIndicator", "0")?;
    w.end_element(element)?;
    Ok(())
}

fn write_account(w: &mut XmlWriter, a: &GlAccount) -> Result<(), FiscalError> {
    w.start_element("Account")?;
    w.text_element("AccountID", &a.id)?;
    w.text_element("AccountDescription", &a.description)?;
    w.amount_element("OpeningDebitBalance", a.opening_debit)?;
    w.amount_element("OpeningCreditBalance", a.opening_credit)?;
    w.amount_element("ClosingDebitBalance", a.closing_debit)?;
    w.amount_element("ClosingCreditBalance", a.closing_credit)?;
    w.text_element("GroupingCategory", &a.grouping_category)?;
    w.optional_element("GroupingCode", a.grouping_code.as_deref())?;
    if let Some(code) = a.taxonomy_code {
        w.text_element("TaxonomyCode", &code.to_string())?;
    }
    w.end_element("Account")?;
    Ok(())
}

fn write_transaction(
    w: &mut XmlWriter,
    t: &GlTransaction,
    period: &FiscalPeriod,
) -> Result<(), FiscalError> {
    w.start_element("Transaction")?;
    w.text_element("TransactionID", &t.id)?;
    w.text_element("Period", &period.period_of(t.date).to_string())?;
    w.text_element("TransactionDate", &t.date.to_string())?;
    w.text_element("SourceID", &t.source_id)?;
    w.text_element("Description", &t.description)?;
    w.text_element("DocArchivalNumber", &t.doc_archival_number)?;
    w.text_element("TransactionType", "N")?;
    w.text_element("GLPostingDate", &t.date.to_string())?;
    w.optional_element("CustomerID", t.customer_id.as_deref())?;
    w.start_element("Lines")?;
    for side in [EntrySide::Debit, EntrySide::Credit] {
        let (tag, amount_tag) = match side {
            EntrySide::Debit => ("DebitLine", "DebitAmount"),
            EntrySide::Credit => ("CreditLine", "CreditAmount"),
        };
        for line in t.lines.iter().filter(|l| l.side == side) {
            w.start_element(tag)?;
            w.text_element("RecordID", &line.record_id)?;
            w.text_element("AccountID", &line.account_id)?;
            w.optional_element("SourceDocumentID", line.source_document_id.as_deref())?;
            w.text_element("SystemEntryDate", &format_datetime(t.system_entry))?;
            w.text_element("Description", &line.description)?;
            w.amount_element(amount_tag, line.amount)?;
            w.end_element(tag)?;
        }
    }
    w.end_element("Lines")?;
    w.end_element("Transaction")?;
    Ok(())
}

/// Master customers plus every customer referenced by an exported invoice.
fn collect_customers(master: &[Customer], invoices: &[&FiscalDocument]) -> Vec<Customer> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for c in master.iter().chain(invoices.iter().map(|d| &d.customer)) {
        if seen.insert(c.id.clone()) {
            out.push(c.clone());
        }
    }
    out
}

fn collect_products(master: &[Product], invoices: &[&FiscalDocument]) -> Vec<Product> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for p in master {
        if seen.insert(p.code.clone()) {
            out.push(p.clone());
        }
    }
    for line in invoices.iter().flat_map(|d| &d.lines) {
        if seen.insert(line.product_code.clone()) {
            out.push(Product::new(&line.product_code, &line.description, "P"));
        }
    }
    out
}

fn collect_tax_table(
    master: &[TaxTableEntry],
    invoices: &[&FiscalDocument],
    region: &str,
) -> Vec<TaxTableEntry> {
    let mut out: Vec<TaxTableEntry> = master.to_vec();
    for line in invoices.iter().flat_map(|d| &d.lines) {
        let code = line.tax.effective_code();
        let rate = line.tax.rate.normalize();
        let known = out
            .iter()
            .any(|e| e.code == code && e.percentage.normalize() == rate);
        if !known {
            out.push(TaxTableEntry {
                tax_type: "IVA".into(),
                region: region.into(),
                description: tax_description(&code).into(),
                code,
                percentage: line.tax.rate,
            });
        }
    }
    out
}

fn tax_description(code: &str) -> &'static str {
    match code {
        "ISE" => "Isenta",
        "RED" => "Taxa reduzida",
        "INT" => "Taxa intermédia",
        "NOR" => "Taxa normal",
        _ => "Outra taxa",
    }
}
