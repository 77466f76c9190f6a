//! Structural validation of SAF-T(PT) 1.04_01 audit files.
//!
//! Covers what the exporter must guarantee: namespace, section order,
//! required elements, two-decimal amounts, ATCUD and Hash on every
//! invoice, referential integrity of customer and product ids and the
//! `NumberOfEntries` / `TotalDebit` / `TotalCredit` control totals.

use std::collections::HashSet;

use chrono::NaiveDate;
use quick_xml::Reader;
use quick_xml::events::Event;
use rust_decimal::Decimal;

use crate::core::{FiscalError, SchemaViolation, is_atcud, validate_nif};
use crate::xml_utils::local_name;

use super::model::{AUDIT_FILE_VERSION, SAFT_NAMESPACE};

const ROOT_SECTIONS: [&str; 4] = [
    "Header",
    "MasterFiles",
    "GeneralLedgerEntries",
    "SourceDocuments",
];

const HEADER_REQUIRED: [&str; 16] = [
    "AuditFileVersion",
    "CompanyID",
    "TaxRegistrationNumber",
    "TaxAccountingBasis",
    "CompanyName",
    "CompanyAddress",
    "FiscalYear",
    "StartDate",
    "EndDate",
    "CurrencyCode",
    "DateCreated",
    "TaxEntity",
    "ProductCompanyTaxID",
    "SoftwareCertificateNumber",
    "ProductID",
    "ProductVersion",
];

const ADDRESS_REQUIRED: [&str; 4] = ["AddressDetail", "City", "PostalCode", "Country"];

const CUSTOMER_REQUIRED: [&str; 6] = [
    "CustomerID",
    "AccountID",
    "CustomerTaxID",
    "CompanyName",
    "BillingAddress",
    "SelfBillingIndicator",
];

const PRODUCT_REQUIRED: [&str; 4] = [
    "ProductType",
    "ProductCode",
    "ProductDescription",
    "ProductNumberCode",
];

const TAX_ENTRY_REQUIRED: [&str; 4] = ["TaxType", "TaxCountryRegion", "TaxCode", "Description"];

const INVOICE_REQUIRED: [&str; 14] = [
    "InvoiceNo",
    "ATCUD",
    "DocumentStatus",
    "Hash",
    "HashControl",
    "Period",
    "InvoiceDate",
    "InvoiceType",
    "SpecialRegimes",
    "SourceID",
    "SystemEntryDate",
    "CustomerID",
    "Line",
    "DocumentTotals",
];

const LINE_REQUIRED: [&str; 9] = [
    "LineNumber",
    "ProductCode",
    "ProductDescription",
    "Quantity",
    "UnitOfMeasure",
    "UnitPrice",
    "TaxPointDate",
    "Description",
    "Tax",
];

/// Elements whose content must be a monetary amount with two decimals.
const AMOUNT_ELEMENTS: [&str; 11] = [
    "TotalDebit",
    "TotalCredit",
    "DebitAmount",
    "CreditAmount",
    "TaxPayable",
    "NetTotal",
    "GrossTotal",
    "OpeningDebitBalance",
    "OpeningCreditBalance",
    "ClosingDebitBalance",
    "ClosingCreditBalance",
];

const ACCOUNTING_BASES: [&str; 8] = ["C", "E", "F", "I", "P", "R", "S", "T"];

/// In-memory element tree; namespace prefixes are dropped.
#[derive(Debug, Default)]
struct Node {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_tree(xml: &str) -> Result<Node, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = vec![Node::default()];
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                stack.push(open_node(e)?);
            }
            Ok(Event::Empty(ref e)) => {
                let node = open_node(e)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or("unbalanced end tag")?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Err("unbalanced end tag".into()),
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "malformed XML at position {}: {e}",
                    reader.error_position()
                ));
            }
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err("unexpected end of document".into());
    }
    let mut document = stack.pop().ok_or("empty document")?;
    match document.children.len() {
        0 => Err("document has no root element".into()),
        1 => Ok(document.children.remove(0)),
        _ => Err("document has more than one root element".into()),
    }
}

fn open_node(e: &quick_xml::events::BytesStart<'_>) -> Result<Node, String> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| e.to_string())?
            .to_string();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.to_string();
        attrs.push((key, value));
    }
    Ok(Node {
        name: local_name(e.name().as_ref()),
        attrs,
        ..Default::default()
    })
}

/// Validate an audit file and return every violation found.
pub fn validate_saft(xml: &str) -> Vec<SchemaViolation> {
    let root = match parse_tree(xml) {
        Ok(root) => root,
        Err(msg) => return vec![SchemaViolation::new("/", msg)],
    };
    let mut v = Validator::default();
    v.audit_file(&root);
    v.violations
}

/// [`validate_saft`] as a `Result`, for use before handing a file out.
pub fn ensure_valid(xml: &str) -> Result<(), FiscalError> {
    let violations = validate_saft(xml);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(FiscalError::SchemaValidation(violations))
    }
}

#[derive(Default)]
struct Validator {
    violations: Vec<SchemaViolation>,
    customer_ids: HashSet<String>,
    product_codes: HashSet<String>,
}

impl Validator {
    fn push(&mut self, path: &str, message: impl Into<String>) {
        self.violations.push(SchemaViolation::new(path, message));
    }

    fn require(&mut self, node: &Node, path: &str, names: &[&str]) {
        for name in names {
            match node.child(name) {
                None => self.push(path, format!("missing required element {name}")),
                Some(c) if c.children.is_empty() && c.text.trim().is_empty() => {
                    self.push(&format!("{path}/{name}"), "element must not be empty")
                }
                _ => {}
            }
        }
    }

    fn audit_file(&mut self, root: &Node) {
        let path = "/AuditFile";
        if root.name != "AuditFile" {
            self.push("/", format!("root element must be AuditFile, found {}", root.name));
            return;
        }
        if root.attr("xmlns") != Some(SAFT_NAMESPACE) {
            self.push(path, format!("default namespace must be {SAFT_NAMESPACE}"));
        }

        self.section_order(root, path);

        match root.child("Header") {
            Some(h) => self.header(h, &format!("{path}/Header")),
            None => self.push(path, "missing required element Header"),
        }
        match root.child("MasterFiles") {
            Some(m) => self.master_files(m, &format!("{path}/MasterFiles")),
            None => self.push(path, "missing required element MasterFiles"),
        }
        if let Some(gl) = root.child("GeneralLedgerEntries") {
            self.general_ledger(gl, &format!("{path}/GeneralLedgerEntries"));
        }
        if let Some(sd) = root.child("SourceDocuments") {
            let sd_path = format!("{path}/SourceDocuments");
            if let Some(si) = sd.child("SalesInvoices") {
                self.sales_invoices(si, &format!("{sd_path}/SalesInvoices"));
            }
        }

        self.amounts(root, path);
    }

    fn section_order(&mut self, root: &Node, path: &str) {
        let mut last = 0usize;
        for child in &root.children {
            match ROOT_SECTIONS.iter().position(|s| *s == child.name) {
                None => self.push(path, format!("unexpected element {}", child.name)),
                Some(idx) if idx < last => self.push(
                    path,
                    format!("{} must come before {}", child.name, ROOT_SECTIONS[last]),
                ),
                Some(idx) => last = idx,
            }
        }
    }

    fn header(&mut self, h: &Node, path: &str) {
        self.require(h, path, &HEADER_REQUIRED);

        if let Some(version) = h.child_text("AuditFileVersion") {
            if version != AUDIT_FILE_VERSION {
                self.push(
                    &format!("{path}/AuditFileVersion"),
                    format!("expected {AUDIT_FILE_VERSION}, found {version}"),
                );
            }
        }
        for tag in ["TaxRegistrationNumber", "ProductCompanyTaxID"] {
            if let Some(nif) = h.child_text(tag) {
                if let Err(e) = validate_nif(nif) {
                    self.push(&format!("{path}/{tag}"), e.to_string());
                }
            }
        }
        if let Some(basis) = h.child_text("TaxAccountingBasis") {
            if !ACCOUNTING_BASES.contains(&basis) {
                self.push(
                    &format!("{path}/TaxAccountingBasis"),
                    format!("unknown accounting basis {basis}"),
                );
            }
        }
        if let Some(year) = h.child_text("FiscalYear") {
            if year.len() != 4 || year.parse::<i32>().is_err() {
                self.push(&format!("{path}/FiscalYear"), "must be a four-digit year");
            }
        }
        let start = self.date(h, "StartDate", path);
        let end = self.date(h, "EndDate", path);
        self.date(h, "DateCreated", path);
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                self.push(path, "StartDate is after EndDate");
            }
        }
        if let Some(addr) = h.child("CompanyAddress") {
            self.require(addr, &format!("{path}/CompanyAddress"), &ADDRESS_REQUIRED);
        }
    }

    fn date(&mut self, node: &Node, tag: &str, path: &str) -> Option<NaiveDate> {
        let text = node.child_text(tag)?;
        match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            Ok(d) => Some(d),
            Err(_) => {
                self.push(&format!("{path}/{tag}"), format!("invalid date '{text}'"));
                None
            }
        }
    }

    fn master_files(&mut self, m: &Node, path: &str) {
        for (i, c) in m.children_named("Customer").enumerate() {
            let p = format!("{path}/Customer[{}]", i + 1);
            self.require(c, &p, &CUSTOMER_REQUIRED);
            if let Some(addr) = c.child("BillingAddress") {
                self.require(addr, &format!("{p}/BillingAddress"), &ADDRESS_REQUIRED);
            }
            if let Some(id) = c.child_text("CustomerID") {
                if !self.customer_ids.insert(id.to_string()) {
                    self.push(&p, format!("duplicate CustomerID {id}"));
                }
            }
        }
        for (i, s) in m.children_named("Supplier").enumerate() {
            let p = format!("{path}/Supplier[{}]", i + 1);
            self.require(s, &p, &["SupplierID", "AccountID", "SupplierTaxID", "CompanyName"]);
        }
        for (i, prod) in m.children_named("Product").enumerate() {
            let p = format!("{path}/Product[{}]", i + 1);
            self.require(prod, &p, &PRODUCT_REQUIRED);
            if let Some(code) = prod.child_text("ProductCode") {
                if !self.product_codes.insert(code.to_string()) {
                    self.push(&p, format!("duplicate ProductCode {code}"));
                }
            }
        }
        if let Some(table) = m.child("TaxTable") {
            for (i, entry) in table.children_named("TaxTableEntry").enumerate() {
                let p = format!("{path}/TaxTable/TaxTableEntry[{}]", i + 1);
                self.require(entry, &p, &TAX_ENTRY_REQUIRED);
                if entry.child("TaxPercentage").is_none() && entry.child("TaxAmount").is_none() {
                    self.push(&p, "missing TaxPercentage or TaxAmount");
                }
            }
        }
    }

    fn general_ledger(&mut self, gl: &Node, path: &str) {
        self.require(gl, path, &["NumberOfEntries", "TotalDebit", "TotalCredit"]);

        let mut entries = 0usize;
        let mut debit = Decimal::ZERO;
        let mut credit = Decimal::ZERO;
        for journal in gl.children_named("Journal") {
            for t in journal.children_named("Transaction") {
                entries += 1;
                let Some(lines) = t.child("Lines") else {
                    self.push(path, "Transaction without Lines");
                    continue;
                };
                debit += lines
                    .children_named("DebitLine")
                    .filter_map(|l| decimal(l.child_text("DebitAmount")))
                    .sum::<Decimal>();
                credit += lines
                    .children_named("CreditLine")
                    .filter_map(|l| decimal(l.child_text("CreditAmount")))
                    .sum::<Decimal>();
            }
        }
        self.control_totals(gl, path, entries, debit, credit);
    }

    fn sales_invoices(&mut self, si: &Node, path: &str) {
        self.require(si, path, &["NumberOfEntries", "TotalDebit", "TotalCredit"]);

        let mut debit = Decimal::ZERO;
        let mut credit = Decimal::ZERO;
        let mut seen = HashSet::new();
        let invoices: Vec<&Node> = si.children_named("Invoice").collect();

        for (i, inv) in invoices.iter().enumerate() {
            let p = format!("{path}/Invoice[{}]", i + 1);
            self.require(inv, &p, &INVOICE_REQUIRED);

            if let Some(no) = inv.child_text("InvoiceNo") {
                if !seen.insert(no.to_string()) {
                    self.push(&p, format!("duplicate InvoiceNo {no}"));
                }
            }
            if let Some(atcud) = inv.child_text("ATCUD") {
                if !atcud.is_empty() && !is_atcud(atcud) {
                    self.push(&format!("{p}/ATCUD"), format!("malformed ATCUD '{atcud}'"));
                }
            }
            if let Some(control) = inv.child_text("HashControl") {
                if control.is_empty() || control.len() > 70 {
                    self.push(&format!("{p}/HashControl"), "invalid HashControl");
                }
            }
            if let Some(id) = inv.child_text("CustomerID") {
                if !id.is_empty() && !self.customer_ids.contains(id) {
                    self.push(
                        &format!("{p}/CustomerID"),
                        format!("CustomerID {id} is not declared in MasterFiles"),
                    );
                }
            }
            self.date(inv, "InvoiceDate", &p);

            let status = inv
                .child("DocumentStatus")
                .and_then(|s| s.child_text("InvoiceStatus"))
                .unwrap_or_default();
            if inv.child("DocumentStatus").is_some() && status.is_empty() {
                self.push(&format!("{p}/DocumentStatus"), "missing InvoiceStatus");
            }

            for (j, line) in inv.children_named("Line").enumerate() {
                self.invoice_line(line, &format!("{p}/Line[{}]", j + 1));
            }

            let net = inv
                .child("DocumentTotals")
                .and_then(|t| decimal(t.child_text("NetTotal")));
            if let Some(t) = inv.child("DocumentTotals") {
                self.require(t, &format!("{p}/DocumentTotals"), &["TaxPayable", "NetTotal", "GrossTotal"]);
            }
            if status != "A" {
                let net = net.unwrap_or_default();
                if inv.child_text("InvoiceType") == Some("NC") {
                    debit += net;
                } else {
                    credit += net;
                }
            }
        }

        self.control_totals(si, path, invoices.len(), debit, credit);
    }

    fn invoice_line(&mut self, line: &Node, path: &str) {
        self.require(line, path, &LINE_REQUIRED);
        let has_debit = line.child("DebitAmount").is_some();
        let has_credit = line.child("CreditAmount").is_some();
        if has_debit == has_credit {
            self.push(path, "line must carry exactly one of DebitAmount or CreditAmount");
        }
        if let Some(code) = line.child_text("ProductCode") {
            if !code.is_empty() && !self.product_codes.contains(code) {
                self.push(
                    &format!("{path}/ProductCode"),
                    format!("ProductCode {code} is not declared in MasterFiles"),
                );
            }
        }
        if let Some(tax) = line.child("Tax") {
            self.require(tax, &format!("{path}/Tax"), &["TaxType", "TaxCountryRegion", "TaxCode"]);
            let zero_rate = decimal(tax.child_text("TaxPercentage")).is_some_and(|r| r.is_zero());
            if zero_rate && line.child("TaxExemptionCode").is_none() {
                self.push(path, "zero-rated line requires TaxExemptionCode");
            }
        }
    }

    fn control_totals(
        &mut self,
        node: &Node,
        path: &str,
        entries: usize,
        debit: Decimal,
        credit: Decimal,
    ) {
        if let Some(n) = node.child_text("NumberOfEntries") {
            if n.parse::<usize>().ok() != Some(entries) {
                self.push(
                    &format!("{path}/NumberOfEntries"),
                    format!("declared {n}, found {entries}"),
                );
            }
        }
        for (tag, expected) in [("TotalDebit", debit), ("TotalCredit", credit)] {
            if let Some(declared) = decimal(node.child_text(tag)) {
                if declared != expected.round_dp(2) {
                    self.push(
                        &format!("{path}/{tag}"),
                        format!("declared {declared}, computed {:.2}", expected),
                    );
                }
            }
        }
    }

    fn amounts(&mut self, node: &Node, path: &str) {
        for (i, child) in node.children.iter().enumerate() {
            let p = format!("{path}/{}", child.name);
            if AMOUNT_ELEMENTS.contains(&child.name.as_str()) && !is_amount(&child.text) {
                self.push(&p, format!("'{}' is not an amount with two decimals", child.text));
            }
            if !child.children.is_empty() {
                let same = node.children_named(&child.name).count();
                let p = if same > 1 {
                    let nth = node.children[..=i]
                        .iter()
                        .filter(|c| c.name == child.name)
                        .count();
                    format!("{p}[{nth}]")
                } else {
                    p
                };
                self.amounts(child, &p);
            }
        }
    }
}

fn decimal(text: Option<&str>) -> Option<Decimal> {
    text.and_then(|t| t.parse().ok())
}

fn is_amount(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    match digits.split_once('.') {
        Some((int, frac)) => {
            !int.is_empty()
                && int.bytes().all(|b| b.is_ascii_digit())
                && frac.len() == 2
                && frac.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
