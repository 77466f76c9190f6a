use std::collections::BTreeMap;

use chrono::NaiveDate;
use parking_lot::RwLock;

use crate::core::{
    DocumentState, FiscalDocument, FiscalError, QrCode, SeriesKey, Voidance,
};

use super::chain::SEED_HASH;

/// Persistence seam for fiscal documents.
///
/// Certified fields are enforced here, at the write boundary: once a
/// document is submitted, writes that would change them are rejected.
pub trait DocumentLedger: Send + Sync {
    fn get(&self, id: &str) -> Option<FiscalDocument>;

    fn find_by_number(&self, number: &str) -> Option<FiscalDocument>;

    /// Insert or replace a draft. Fails for submitted documents.
    fn save_draft(&self, doc: FiscalDocument) -> Result<(), FiscalError>;

    /// Persist a freshly finalized document. Certified fields are written once.
    fn commit_submission(&self, doc: FiscalDocument) -> Result<(), FiscalError>;

    /// Write back a document. Changes to certified fields are rejected.
    fn update(&self, doc: FiscalDocument) -> Result<(), FiscalError>;

    /// Mark a submitted document voided, replacing only its QR code.
    fn mark_voided(&self, id: &str, voidance: Voidance, qr: QrCode)
    -> Result<FiscalDocument, FiscalError>;

    /// Latest submitted document of the series by (posting date, sequence).
    fn last_submitted(&self, series: &SeriesKey) -> Option<FiscalDocument>;

    /// Stored hash of the latest submitted document strictly before
    /// `(posting_date, sequence)`, or the seed "0".
    fn previous_hash(&self, series: &SeriesKey, posting_date: NaiveDate, sequence: u64) -> String;

    /// Submitted or voided documents of a series, in chain order.
    fn series_documents(&self, series: &SeriesKey) -> Vec<FiscalDocument>;

    /// Submitted or voided documents of an entity posted within `[start, end]`.
    fn submitted_in_period(
        &self,
        entity: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<FiscalDocument>;
}

/// In-memory ledger.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    docs: RwLock<BTreeMap<String, FiscalDocument>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

fn is_certified(doc: &FiscalDocument) -> bool {
    doc.state != DocumentState::Draft
}

fn chain_key(doc: &FiscalDocument) -> (NaiveDate, u64) {
    (doc.posting_date, doc.sequence().unwrap_or(0))
}

/// First certified field that differs between the stored and incoming copy.
pub fn certified_change(stored: &FiscalDocument, incoming: &FiscalDocument) -> Option<&'static str> {
    let sn = stored.numbering.as_ref();
    let inn = incoming.numbering.as_ref();
    let sc = stored.chain.as_ref();
    let ic = incoming.chain.as_ref();
    let sq = stored.qr.as_ref();
    let iq = incoming.qr.as_ref();

    if sn.map(|n| n.sequence) != inn.map(|n| n.sequence) {
        return Some("sequence");
    }
    if sn.map(|n| &n.number) != inn.map(|n| &n.number) {
        return Some("number");
    }
    if sn.map(|n| &n.atcud) != inn.map(|n| &n.atcud) {
        return Some("atcud");
    }
    if sc.map(|c| &c.previous_hash) != ic.map(|c| &c.previous_hash) {
        return Some("previous_hash");
    }
    if sc.map(|c| &c.current_hash) != ic.map(|c| &c.current_hash) {
        return Some("hash");
    }
    if sc.map(|c| &c.signature) != ic.map(|c| &c.signature) {
        return Some("signature");
    }
    if sc.map(|c| &c.fragment) != ic.map(|c| &c.fragment) {
        return Some("fragment");
    }
    if sq.map(|q| &q.payload) != iq.map(|q| &q.payload) {
        return Some("qr_payload");
    }
    if sq.map(|q| &q.png) != iq.map(|q| &q.png) {
        return Some("qr_image");
    }
    if stored.state != incoming.state {
        return Some("state");
    }
    if stored.voidance != incoming.voidance {
        return Some("voidance");
    }
    // hash inputs
    if stored.posting_date != incoming.posting_date {
        return Some("posting_date");
    }
    if stored.posting_time != incoming.posting_time {
        return Some("posting_time");
    }
    if stored.totals != incoming.totals {
        return Some("totals");
    }
    if stored.lines != incoming.lines {
        return Some("lines");
    }
    if stored.customer != incoming.customer {
        return Some("customer");
    }
    None
}

impl DocumentLedger for MemoryLedger {
    fn get(&self, id: &str) -> Option<FiscalDocument> {
        self.docs.read().get(id).cloned()
    }

    fn find_by_number(&self, number: &str) -> Option<FiscalDocument> {
        self.docs
            .read()
            .values()
            .find(|d| d.number() == Some(number))
            .cloned()
    }

    fn save_draft(&self, doc: FiscalDocument) -> Result<(), FiscalError> {
        if doc.state != DocumentState::Draft {
            return Err(FiscalError::InvalidState(format!(
                "document {} is not a draft",
                doc.id
            )));
        }
        let mut docs = self.docs.write();
        if let Some(stored) = docs.get(&doc.id) {
            if is_certified(stored) {
                return Err(FiscalError::ImmutableField {
                    document: stored.display_name().to_string(),
                    field: "state".into(),
                });
            }
        }
        docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    fn commit_submission(&self, doc: FiscalDocument) -> Result<(), FiscalError> {
        if doc.state != DocumentState::Submitted || doc.numbering.is_none() || doc.chain.is_none() {
            return Err(FiscalError::InvalidState(format!(
                "document {} is not a finalized submission",
                doc.id
            )));
        }
        let mut docs = self.docs.write();
        if let Some(stored) = docs.get(&doc.id) {
            if is_certified(stored) {
                return Err(FiscalError::ImmutableField {
                    document: stored.display_name().to_string(),
                    field: "atcud".into(),
                });
            }
        }
        if docs
            .values()
            .any(|d| d.id != doc.id && d.number().is_some() && d.number() == doc.number())
        {
            return Err(FiscalError::InvalidState(format!(
                "document number {} already exists",
                doc.display_name()
            )));
        }
        docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    fn update(&self, doc: FiscalDocument) -> Result<(), FiscalError> {
        let mut docs = self.docs.write();
        let stored = docs
            .get(&doc.id)
            .ok_or_else(|| FiscalError::NotFound(format!("document {}", doc.id)))?;
        if is_certified(stored) {
            if let Some(field) = certified_change(stored, &doc) {
                return Err(FiscalError::ImmutableField {
                    document: stored.display_name().to_string(),
                    field: field.into(),
                });
            }
        } else if is_certified(&doc) {
            return Err(FiscalError::InvalidState(format!(
                "document {} must be submitted through the fiscal pipeline",
                doc.id
            )));
        }
        docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    fn mark_voided(
        &self,
        id: &str,
        voidance: Voidance,
        qr: QrCode,
    ) -> Result<FiscalDocument, FiscalError> {
        let mut docs = self.docs.write();
        let stored = docs
            .get_mut(id)
            .ok_or_else(|| FiscalError::NotFound(format!("document {id}")))?;
        match stored.state {
            DocumentState::Submitted => {}
            DocumentState::Voided => {
                return Err(FiscalError::InvalidState(format!(
                    "document {} is already voided by {}",
                    stored.display_name(),
                    stored.voidance.as_ref().map(|v| v.by.as_str()).unwrap_or("?")
                )));
            }
            DocumentState::Draft => {
                return Err(FiscalError::InvalidState(format!(
                    "draft {} cannot be voided",
                    stored.id
                )));
            }
        }
        stored.state = DocumentState::Voided;
        stored.voidance = Some(voidance);
        stored.qr = Some(qr);
        Ok(stored.clone())
    }

    fn last_submitted(&self, series: &SeriesKey) -> Option<FiscalDocument> {
        self.docs
            .read()
            .values()
            .filter(|d| &d.series == series && is_certified(d))
            .max_by_key(|d| chain_key(d))
            .cloned()
    }

    fn previous_hash(&self, series: &SeriesKey, posting_date: NaiveDate, sequence: u64) -> String {
        self.docs
            .read()
            .values()
            .filter(|d| &d.series == series && is_certified(d))
            .filter(|d| chain_key(d) < (posting_date, sequence))
            .max_by_key(|d| chain_key(d))
            .and_then(|d| d.chain.as_ref().map(|c| c.current_hash.clone()))
            .unwrap_or_else(|| SEED_HASH.to_string())
    }

    fn series_documents(&self, series: &SeriesKey) -> Vec<FiscalDocument> {
        let mut out: Vec<_> = self
            .docs
            .read()
            .values()
            .filter(|d| &d.series == series && is_certified(d))
            .cloned()
            .collect();
        out.sort_by_key(chain_key);
        out
    }

    fn submitted_in_period(
        &self,
        entity: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<FiscalDocument> {
        let mut out: Vec<_> = self
            .docs
            .read()
            .values()
            .filter(|d| d.entity == entity && is_certified(d))
            .filter(|d| d.posting_date >= start && d.posting_date <= end)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (a.series.doc_type, &a.series.code, chain_key(a))
                .cmp(&(b.series.doc_type, &b.series.code, chain_key(b)))
        });
        out
    }
}
