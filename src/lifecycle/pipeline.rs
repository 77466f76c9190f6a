use std::sync::Arc;

use crate::audit::{AuditEvent, AuditEventType, AuditTrail, MemoryAuditLog};
use crate::core::{
    DocumentState, DocumentStatus, FiscalDocument, FiscalError, SequenceAssignment, SequenceError,
    SeriesKey, SigningError, Voidance, validate_document, validation_failure,
};
use crate::qr::{generate_qr, restatus_qr};
use crate::saft::{CompanyInfo, FiscalPeriod, MasterData, SaftFile, generate_saft};
use crate::series::SeriesRegistry;
use crate::settings::ComplianceSettings;
use crate::signing::{
    CertificateStore, DocumentLedger, HashChainSigner, MemoryLedger, certified_change, verify_chain,
};

const DOCUMENT: &str = "FiscalDocument";

/// Document lifecycle hooks wired to numbering, signing, QR, audit and
/// SAF-T export.
///
/// Submission of one series is serialized on that series' lock; different
/// series submit in parallel.
#[derive(Clone)]
pub struct FiscalPipeline {
    settings: Arc<ComplianceSettings>,
    registry: Arc<SeriesRegistry>,
    ledger: Arc<dyn DocumentLedger>,
    certificates: Arc<CertificateStore>,
    signer: HashChainSigner,
    audit: AuditTrail,
}

impl FiscalPipeline {
    pub fn new(
        settings: ComplianceSettings,
        registry: Arc<SeriesRegistry>,
        ledger: Arc<dyn DocumentLedger>,
        certificates: Arc<CertificateStore>,
        audit: AuditTrail,
    ) -> Self {
        let signer = HashChainSigner::new(certificates.clone(), ledger.clone());
        Self {
            settings: Arc::new(settings),
            registry,
            ledger,
            certificates,
            signer,
            audit,
        }
    }

    /// Pipeline over in-memory registry, ledger, certificate store and
    /// audit log. Returns the audit log for inspection.
    pub fn in_memory(settings: ComplianceSettings) -> (Self, Arc<MemoryAuditLog>) {
        let (audit, log) = AuditTrail::in_memory();
        let pipeline = Self::new(
            settings,
            Arc::new(SeriesRegistry::new()),
            Arc::new(MemoryLedger::new()),
            Arc::new(CertificateStore::new()),
            audit,
        );
        (pipeline, log)
    }

    pub fn settings(&self) -> &ComplianceSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<SeriesRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<dyn DocumentLedger> {
        &self.ledger
    }

    pub fn certificates(&self) -> &Arc<CertificateStore> {
        &self.certificates
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Validate and store a draft.
    pub fn on_draft_save(&self, doc: FiscalDocument, actor: &str) -> Result<(), FiscalError> {
        if doc.state != DocumentState::Draft || doc.numbering.is_some() || doc.chain.is_some() {
            return Err(FiscalError::InvalidState(format!(
                "document {} is not a draft",
                doc.display_name()
            )));
        }
        let errors = validate_document(&doc);
        if !errors.is_empty() {
            return Err(validation_failure(&errors));
        }

        let id = doc.id.clone();
        self.ledger.save_draft(doc)?;
        self.audit.record(
            AuditEvent::new(AuditEventType::DraftCreated, DOCUMENT, &id)
                .actor(actor)
                .details("draft saved"),
        );
        Ok(())
    }

    /// Finalize a stored draft: number, ATCUD, chain signature, QR, commit.
    ///
    /// Runs under the series lock. The counter only advances once the
    /// document is committed, so a failure at any step leaves no gap and
    /// nothing persisted.
    pub fn on_submit(&self, id: &str, actor: &str) -> Result<FiscalDocument, FiscalError> {
        let mut doc = self
            .ledger
            .get(id)
            .ok_or_else(|| FiscalError::NotFound(format!("document {id}")))?;
        if doc.state != DocumentState::Draft || doc.is_signed() {
            return Err(SigningError::AlreadySigned(doc.display_name().to_string()).into());
        }
        let errors = validate_document(&doc);
        if !errors.is_empty() {
            return Err(validation_failure(&errors));
        }

        let handle = self.registry.handle(&doc.series)?;
        let mut series = handle.lock();

        let seq = series.peek_next()?;
        if let Some(last) = self.ledger.last_submitted(&doc.series) {
            if doc.posting_date < last.posting_date {
                return Err(SequenceError::OutOfOrder {
                    series: doc.series.to_string(),
                    date: doc.posting_date,
                    last: last.posting_date,
                }
                .into());
            }
        }
        let atcud = series.compute_atcud(seq)?;
        doc.numbering = Some(SequenceAssignment {
            sequence: seq,
            number: series.format_number(seq),
            atcud,
        });

        let chain = self.signer.sign(&mut doc)?;
        doc.qr = Some(generate_qr(&doc, &chain, &self.settings)?);
        doc.state = DocumentState::Submitted;
        if doc.created_by.is_empty() {
            doc.created_by = actor.to_string();
        }

        self.ledger.commit_submission(doc.clone())?;
        let issued = series.issue_next()?;
        drop(series);
        debug_assert_eq!(issued, seq);

        tracing::info!(
            document = %doc.display_name(),
            atcud = doc.atcud().unwrap_or_default(),
            "document submitted"
        );
        self.audit.record(
            AuditEvent::new(AuditEventType::Submitted, DOCUMENT, &doc.id)
                .actor(actor)
                .details(format!(
                    "number {} ATCUD {} hash {}",
                    doc.display_name(),
                    doc.atcud().unwrap_or_default(),
                    chain.current_hash
                )),
        );
        Ok(doc)
    }

    /// Check an edit of a stored document before it is written.
    ///
    /// Changing any certified field of a submitted document is rejected and
    /// audited.
    pub fn on_post_submit_validate(
        &self,
        doc: &FiscalDocument,
        actor: &str,
    ) -> Result<(), FiscalError> {
        let stored = self
            .ledger
            .get(&doc.id)
            .ok_or_else(|| FiscalError::NotFound(format!("document {}", doc.id)))?;
        if stored.state == DocumentState::Draft {
            return Ok(());
        }
        if let Some(field) = certified_change(&stored, doc) {
            return Err(self.reject_edit(&stored, field, actor));
        }
        Ok(())
    }

    /// Write back an edited document.
    pub fn update_document(&self, doc: FiscalDocument, actor: &str) -> Result<(), FiscalError> {
        self.on_post_submit_validate(&doc, actor)?;
        let stored = self.ledger.get(&doc.id);
        match self.ledger.update(doc) {
            Err(FiscalError::ImmutableField { document, field }) => {
                if let Some(stored) = stored {
                    return Err(self.reject_edit(&stored, &field, actor));
                }
                Err(FiscalError::ImmutableField { document, field })
            }
            other => other,
        }
    }

    fn reject_edit(&self, stored: &FiscalDocument, field: &str, actor: &str) -> FiscalError {
        tracing::warn!(
            document = %stored.display_name(),
            field,
            actor,
            "rejected edit of certified field"
        );
        self.audit.record(
            AuditEvent::new(
                AuditEventType::CertifiedFieldModificationAttempt,
                DOCUMENT,
                &stored.id,
            )
            .actor(actor)
            .details(format!("attempt to change {field}")),
        );
        FiscalError::ImmutableField {
            document: stored.display_name().to_string(),
            field: field.to_string(),
        }
    }

    /// Direct cancellation is never allowed for certified documents; they
    /// are voided by a rectifying document instead.
    pub fn on_cancel_attempt(&self, id: &str, actor: &str) -> Result<(), FiscalError> {
        let doc = self
            .ledger
            .get(id)
            .ok_or_else(|| FiscalError::NotFound(format!("document {id}")))?;
        if doc.state == DocumentState::Draft {
            return Err(FiscalError::InvalidState(format!(
                "draft {id} was never submitted; delete it instead"
            )));
        }

        tracing::warn!(document = %doc.display_name(), actor, "rejected cancellation of certified document");
        self.audit.record(
            AuditEvent::new(AuditEventType::CancellationAttempt, DOCUMENT, &doc.id)
                .actor(actor)
                .details("cancellation rejected; issue a rectifying document"),
        );
        Err(FiscalError::InvalidState(format!(
            "certified document {} cannot be cancelled; issue a rectifying document",
            doc.display_name()
        )))
    }

    /// Void every document referenced by a submitted rectifying document.
    ///
    /// All references are checked before any is voided. Each original keeps
    /// its chain fields; only its state, voidance record and QR status flag
    /// change.
    pub fn void_with_rectifying(
        &self,
        rectifying_id: &str,
        reason: &str,
        actor: &str,
    ) -> Result<Vec<FiscalDocument>, FiscalError> {
        let rectifying = self
            .ledger
            .get(rectifying_id)
            .ok_or_else(|| FiscalError::NotFound(format!("document {rectifying_id}")))?;
        let by = rectifying
            .number()
            .filter(|_| rectifying.state == DocumentState::Submitted)
            .ok_or_else(|| {
                FiscalError::InvalidState(format!(
                    "rectifying document {rectifying_id} must be submitted first"
                ))
            })?
            .to_string();
        if !rectifying.doc_type().is_rectifying() {
            return Err(FiscalError::InvalidState(format!(
                "{} documents cannot void other documents",
                rectifying.doc_type().code()
            )));
        }
        if rectifying.references.is_empty() {
            return Err(FiscalError::Validation(format!(
                "rectifying document {by} references no document"
            )));
        }

        let mut originals = Vec::with_capacity(rectifying.references.len());
        for r in &rectifying.references {
            let original = self
                .ledger
                .find_by_number(&r.number)
                .ok_or_else(|| FiscalError::NotFound(format!("referenced document {}", r.number)))?;
            if original.entity != rectifying.entity {
                return Err(FiscalError::InvalidState(format!(
                    "{} belongs to another entity",
                    r.number
                )));
            }
            match (&original.state, &original.voidance) {
                (DocumentState::Submitted, _) => {}
                (DocumentState::Voided, Some(v)) => {
                    return Err(FiscalError::InvalidState(format!(
                        "{} is already voided by {}",
                        r.number, v.by
                    )));
                }
                _ => {
                    return Err(FiscalError::InvalidState(format!(
                        "{} is not a submitted document",
                        r.number
                    )));
                }
            }
            originals.push(original);
        }

        let mut voided = Vec::with_capacity(originals.len());
        for original in originals {
            let voidance = Voidance {
                by: by.clone(),
                date: rectifying.posting_date,
                reason: reason.to_string(),
            };
            let issued = original.qr.as_ref().ok_or_else(|| {
                FiscalError::InvalidState(format!(
                    "submitted document {} has no QR code",
                    original.display_name()
                ))
            })?;
            let qr = restatus_qr(issued, self.settings.qr.status_code(DocumentStatus::Voided))?;

            let doc = self.ledger.mark_voided(&original.id, voidance, qr)?;
            tracing::info!(document = %doc.display_name(), by = %by, "document voided");
            self.audit.record(
                AuditEvent::new(AuditEventType::DocumentVoided, DOCUMENT, &doc.id)
                    .actor(actor)
                    .details(format!("voided by {by}: {reason}")),
            );
            voided.push(doc);
        }
        Ok(voided)
    }

    /// Verify the stored chain of a series against the entity's active
    /// certificate.
    pub fn verify_series(&self, key: &SeriesKey) -> Result<(), FiscalError> {
        let cert = self.certificates.active_certificate(&key.entity)?;
        verify_chain(&self.ledger.series_documents(key), &cert.public_key())?;
        Ok(())
    }

    /// Export the SAF-T(PT) file for the company over `period`.
    pub fn export_saft(
        &self,
        company: &CompanyInfo,
        period: &FiscalPeriod,
        master: &MasterData,
        actor: &str,
    ) -> Result<SaftFile, FiscalError> {
        let documents = self
            .ledger
            .submitted_in_period(&company.entity, period.start, period.end);
        let file = generate_saft(&documents, period, company, master, &self.settings)?;

        self.audit.record(
            AuditEvent::new(AuditEventType::SaftGenerated, "SAF-T", file.file_name(&company.nif))
                .actor(actor)
                .details(format!(
                    "{} to {}: {} invoices",
                    period.start, period.end, file.summary.invoices
                )),
        );
        Ok(file)
    }

    /// SAF-T export for a calendar fiscal year.
    pub fn export_saft_year(
        &self,
        company: &CompanyInfo,
        fiscal_year: i32,
        master: &MasterData,
        actor: &str,
    ) -> Result<SaftFile, FiscalError> {
        self.export_saft(company, &FiscalPeriod::year(fiscal_year)?, master, actor)
    }
}

impl std::fmt::Debug for FiscalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiscalPipeline")
            .field("registry", &self.registry)
            .field("certificates", &self.certificates)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}
