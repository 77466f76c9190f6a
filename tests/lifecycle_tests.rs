//! End-to-end tests of the document lifecycle: numbering, ATCUD, signing,
//! QR, immutability, voidance and the audit trail.
//!
//! Run with: `cargo test --features lifecycle --test lifecycle_tests`

#![cfg(feature = "lifecycle")]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use fatura::audit::{AuditEventType, MemoryAuditLog};
use fatura::core::*;
use fatura::lifecycle::FiscalPipeline;
use fatura::series::FiscalSeries;
use fatura::settings::ComplianceSettings;
use fatura::signing::{SigningCertificate, verify_chain};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const KEY: &str = include_str!("data/signing_key.pem");
const ENTITY: &str = "Exemplo Lda";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn settings() -> ComplianceSettings {
    ComplianceSettings::from_json(
        r#"{
            "software_certificate_number": "9999",
            "software_provider_nif": "501442600",
            "product_id": "Fatura/Exemplo Lda"
        }"#,
    )
    .unwrap()
}

fn invoice_key() -> SeriesKey {
    SeriesKey::new(ENTITY, DocumentType::Invoice, 2024, "A2024")
}

fn credit_key() -> SeriesKey {
    SeriesKey::new(ENTITY, DocumentType::CreditNote, 2024, "NC2024")
}

fn customer() -> Customer {
    Customer::new("CLI-001", "Cliente Exemplo SA", "503504564", "PT")
        .with_address(Address::new("Avenida da Liberdade 10", "Lisboa", "1250-096", "PT"))
}

fn draft(id: &str, series: SeriesKey, posting_date: NaiveDate, net: Decimal) -> DocumentBuilder {
    DocumentBuilder::new(id, series, posting_date)
        .issuer_nif("501442600")
        .posting_time(NaiveTime::from_hms_opt(10, 30, 0).unwrap())
        .customer(customer())
        .add_line(
            LineBuilder::new("P001", "Consultoria", dec!(1), net)
                .tax("NOR", dec!(23), (net * dec!(0.23)).round_dp(2))
                .build(),
        )
}

fn bare_pipeline() -> (FiscalPipeline, Arc<MemoryAuditLog>) {
    let (pipeline, log) = FiscalPipeline::in_memory(settings());
    let cert = SigningCertificate::from_pkcs8_pem("cert-2024", ENTITY, KEY).unwrap();
    pipeline.certificates().add(cert, true).unwrap();
    (pipeline, log)
}

fn pipeline() -> (FiscalPipeline, Arc<MemoryAuditLog>) {
    let (pipeline, log) = bare_pipeline();
    for (key, code) in [(invoice_key(), "AAJFJMVNTN"), (credit_key(), "AAJFJMVNTX")] {
        pipeline.registry().register(FiscalSeries::new(key.clone())).unwrap();
        pipeline.registry().set_validation_code(&key, code).unwrap();
    }
    (pipeline, log)
}

fn submit(pipeline: &FiscalPipeline, doc: FiscalDocument) -> FiscalDocument {
    let id = doc.id.clone();
    pipeline.on_draft_save(doc, "ana").unwrap();
    pipeline.on_submit(&id, "ana").unwrap()
}

// --- Submission ---

#[test]
fn submission_numbers_signs_and_renders_qr() {
    let (pipeline, log) = pipeline();
    let doc = submit(
        &pipeline,
        draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100)).build().unwrap(),
    );

    assert_eq!(doc.state, DocumentState::Submitted);
    assert_eq!(doc.number(), Some("FT A2024/00001"));
    assert_eq!(doc.atcud(), Some("AAJFJMVNTN-1"));
    assert_eq!(doc.totals.gross_total, dec!(123.00));

    let chain = doc.chain.as_ref().unwrap();
    assert_eq!(chain.previous_hash, "0");
    assert_eq!(chain.current_hash, "D29137B468925E825A7EBF9C766A97EF216BC0B5");
    assert_eq!(chain.fragment, "0J7X");

    let qr = doc.qr.as_ref().unwrap();
    assert!(qr.payload.starts_with("A:501442600*B:503504564*C:PT*D:FT*E:N*F:20240315*G:AAJFJMVNTN-1*H:PT*"));
    assert!(qr.payload.contains("*I7:23.00*"));
    assert!(qr.payload.ends_with("*P:123.00*Q:0J7X*R:9999"));
    assert_eq!(&qr.png[..4], &[0x89, b'P', b'N', b'G']);

    assert_eq!(pipeline.ledger().get("SINV-0001"), Some(doc));
    assert_eq!(log.count(AuditEventType::DraftCreated), 1);
    assert_eq!(log.count(AuditEventType::Submitted), 1);
    log.verify().unwrap();
}

#[test]
fn chain_links_each_document_to_its_predecessor() {
    let (pipeline, _log) = pipeline();
    let docs: Vec<_> = (1..=4)
        .map(|i| {
            let d = draft(&format!("SINV-{i:04}"), invoice_key(), date(2024, 3, 14 + i), dec!(50) * Decimal::from(i))
                .build()
                .unwrap();
            submit(&pipeline, d)
        })
        .collect();

    for pair in docs.windows(2) {
        let prev = pair[0].chain.as_ref().unwrap();
        let next = pair[1].chain.as_ref().unwrap();
        assert_eq!(next.previous_hash, prev.current_hash);
    }
    assert_eq!(docs[3].number(), Some("FT A2024/00004"));
    pipeline.verify_series(&invoice_key()).unwrap();

    let public_key = pipeline
        .certificates()
        .active_certificate(ENTITY)
        .unwrap()
        .public_key();
    let mut tampered = pipeline.ledger().series_documents(&invoice_key());
    tampered[1].totals.gross_total += dec!(1);
    assert!(matches!(
        verify_chain(&tampered, &public_key),
        Err(SigningError::ChainBroken { .. })
    ));

    let mut gap = pipeline.ledger().series_documents(&invoice_key());
    gap.remove(1);
    assert!(matches!(
        verify_chain(&gap, &public_key),
        Err(SigningError::ChainBroken { .. })
    ));
}

#[test]
fn concurrent_submissions_get_unique_sequences() {
    let (pipeline, _log) = pipeline();
    const N: usize = 6;

    std::thread::scope(|s| {
        for i in 1..=N {
            let pipeline = pipeline.clone();
            s.spawn(move || {
                let d = draft(&format!("SINV-{i:04}"), invoice_key(), date(2024, 3, 15), dec!(10))
                    .build()
                    .unwrap();
                submit(&pipeline, d);
            });
        }
    });

    let docs = pipeline.ledger().series_documents(&invoice_key());
    let mut seqs: Vec<u64> = docs.iter().filter_map(|d| d.sequence()).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=N as u64).collect::<Vec<_>>());
    assert_eq!(pipeline.registry().snapshot(&invoice_key()).unwrap().counter(), N as u64);
    pipeline.verify_series(&invoice_key()).unwrap();
}

#[test]
fn resubmission_is_rejected() {
    let (pipeline, _log) = pipeline();
    submit(
        &pipeline,
        draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100)).build().unwrap(),
    );
    let err = pipeline.on_submit("SINV-0001", "ana").unwrap_err();
    assert!(matches!(
        err,
        FiscalError::Signing(SigningError::AlreadySigned(ref n)) if n == "FT A2024/00001"
    ));
    assert_eq!(pipeline.registry().snapshot(&invoice_key()).unwrap().counter(), 1);
}

#[test]
fn backdated_submission_is_rejected_without_gap() {
    let (pipeline, _log) = pipeline();
    submit(
        &pipeline,
        draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100)).build().unwrap(),
    );
    pipeline
        .on_draft_save(
            draft("SINV-0002", invoice_key(), date(2024, 3, 10), dec!(100)).build().unwrap(),
            "ana",
        )
        .unwrap();

    let err = pipeline.on_submit("SINV-0002", "ana").unwrap_err();
    assert!(matches!(
        err,
        FiscalError::Sequence(SequenceError::OutOfOrder { .. })
    ));
    assert_eq!(pipeline.registry().snapshot(&invoice_key()).unwrap().counter(), 1);
    assert_eq!(
        pipeline.ledger().get("SINV-0002").unwrap().state,
        DocumentState::Draft
    );
}

#[test]
fn missing_validation_code_leaves_no_gap() {
    let (pipeline, _log) = bare_pipeline();
    let key = invoice_key();
    pipeline.registry().register(FiscalSeries::new(key.clone())).unwrap();
    pipeline
        .on_draft_save(draft("SINV-0001", key.clone(), date(2024, 3, 15), dec!(100)).build().unwrap(), "ana")
        .unwrap();

    let err = pipeline.on_submit("SINV-0001", "ana").unwrap_err();
    assert!(matches!(
        err,
        FiscalError::Sequence(SequenceError::MissingValidationCode(_))
    ));
    let stored = pipeline.ledger().get("SINV-0001").unwrap();
    assert!(stored.numbering.is_none() && stored.chain.is_none() && stored.qr.is_none());

    pipeline.registry().set_validation_code(&key, "AAJFJMVNTN").unwrap();
    let doc = pipeline.on_submit("SINV-0001", "ana").unwrap();
    assert_eq!(doc.sequence(), Some(1));
    assert_eq!(doc.atcud(), Some("AAJFJMVNTN-1"));
}

#[test]
fn missing_certificate_leaves_draft_untouched() {
    let (pipeline, _log) = FiscalPipeline::in_memory(settings());
    let key = invoice_key();
    pipeline.registry().register(FiscalSeries::new(key.clone())).unwrap();
    pipeline.registry().set_validation_code(&key, "AAJFJMVNTN").unwrap();
    pipeline
        .on_draft_save(draft("SINV-0001", key.clone(), date(2024, 3, 15), dec!(100)).build().unwrap(), "ana")
        .unwrap();

    let err = pipeline.on_submit("SINV-0001", "ana").unwrap_err();
    assert!(matches!(
        err,
        FiscalError::Signing(SigningError::NoActiveCertificate(_))
    ));
    assert_eq!(pipeline.registry().snapshot(&key).unwrap().counter(), 0);
    assert_eq!(
        pipeline.ledger().get("SINV-0001").unwrap().state,
        DocumentState::Draft
    );
}

#[test]
fn invalid_draft_is_not_stored() {
    let (pipeline, log) = pipeline();
    let doc = draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100))
        .issuer_nif("501442601")
        .build_unchecked()
        .unwrap();
    let err = pipeline.on_draft_save(doc, "ana").unwrap_err();
    assert!(err.to_string().contains("PT-01"), "{err}");
    assert!(pipeline.ledger().get("SINV-0001").is_none());
    assert!(log.is_empty());
}

// --- Immutability ---

#[test]
fn cancellation_is_rejected_and_audited() {
    let (pipeline, log) = pipeline();
    submit(
        &pipeline,
        draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100)).build().unwrap(),
    );

    let err = pipeline.on_cancel_attempt("SINV-0001", "rui").unwrap_err();
    assert!(matches!(err, FiscalError::InvalidState(ref m) if m.contains("rectifying")));
    assert_eq!(log.count(AuditEventType::CancellationAttempt), 1);
    let entry = log
        .entries()
        .into_iter()
        .find(|e| e.event_type == AuditEventType::CancellationAttempt)
        .unwrap();
    assert_eq!(entry.actor, "rui");
    assert_eq!(entry.reference_id, "SINV-0001");
    assert_eq!(
        pipeline.ledger().get("SINV-0001").unwrap().state,
        DocumentState::Submitted
    );
}

#[test]
fn foreign_entity_cannot_use_the_series() {
    let (pipeline, log) = pipeline();
    let other = SigningCertificate::from_pkcs8_pem("cert-outra", "Outra SA", KEY).unwrap();
    pipeline.certificates().add(other, true).unwrap();

    let doc = draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100))
        .entity("Outra SA")
        .build_unchecked()
        .unwrap();
    let err = pipeline.on_draft_save(doc.clone(), "ana").unwrap_err();
    assert!(err.to_string().contains("PT-10"), "{err}");

    // A draft that reached the ledger some other way is still refused.
    pipeline.ledger().save_draft(doc).unwrap();
    let err = pipeline.on_submit("SINV-0001", "ana").unwrap_err();
    assert!(err.to_string().contains("PT-10"), "{err}");

    assert_eq!(pipeline.registry().snapshot(&invoice_key()).unwrap().counter(), 0);
    assert_eq!(pipeline.ledger().get("SINV-0001").unwrap().state, DocumentState::Draft);
    assert_eq!(log.count(AuditEventType::Submitted), 0);
}

#[test]
fn certified_edits_are_rejected_and_audited() {
    let (pipeline, log) = pipeline();
    let doc = submit(
        &pipeline,
        draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100)).build().unwrap(),
    );

    let mut edited = doc.clone();
    edited.totals.gross_total = dec!(1.00);
    let err = pipeline.update_document(edited, "rui").unwrap_err();
    assert!(matches!(err, FiscalError::ImmutableField { ref field, .. } if field == "totals"));

    let mut edited = doc.clone();
    edited.numbering.as_mut().unwrap().atcud = "AAJFJMVNTN-9".into();
    let err = pipeline.update_document(edited, "rui").unwrap_err();
    assert!(matches!(err, FiscalError::ImmutableField { ref field, .. } if field == "atcud"));

    let mut edited = doc.clone();
    edited.numbering.as_mut().unwrap().sequence = 7;
    let err = pipeline.update_document(edited, "rui").unwrap_err();
    assert!(matches!(err, FiscalError::ImmutableField { ref field, .. } if field == "sequence"));

    assert_eq!(log.count(AuditEventType::CertifiedFieldModificationAttempt), 3);
    assert_eq!(pipeline.ledger().get("SINV-0001"), Some(doc.clone()));

    // Fields outside the certified set may still change.
    let mut edited = doc;
    edited.created_by = "rui".into();
    pipeline.update_document(edited, "rui").unwrap();
    log.verify().unwrap();
}

#[test]
fn drafts_stay_editable() {
    let (pipeline, log) = pipeline();
    let doc = draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100)).build().unwrap();
    pipeline.on_draft_save(doc.clone(), "ana").unwrap();

    let mut edited = doc;
    edited.posting_date = date(2024, 3, 16);
    pipeline.update_document(edited, "ana").unwrap();
    assert_eq!(pipeline.ledger().get("SINV-0001").unwrap().posting_date, date(2024, 3, 16));
    assert_eq!(log.count(AuditEventType::CertifiedFieldModificationAttempt), 0);

    assert!(matches!(
        pipeline.on_cancel_attempt("SINV-0001", "ana"),
        Err(FiscalError::InvalidState(_))
    ));
    assert_eq!(log.count(AuditEventType::CancellationAttempt), 0);
}

// --- Voidance ---

fn credit_note(id: &str, posting_date: NaiveDate, reference: &str) -> FiscalDocument {
    draft(id, credit_key(), posting_date, dec!(100))
        .reference(reference, "Devolução")
        .build()
        .unwrap()
}

#[test]
fn credit_note_voids_referenced_invoice() {
    let (pipeline, log) = pipeline();
    let original = submit(
        &pipeline,
        draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100)).build().unwrap(),
    );
    let nc = submit(&pipeline, credit_note("RET-0001", date(2024, 3, 20), "FT A2024/00001"));
    assert_eq!(nc.number(), Some("NC NC2024/00001"));
    assert_eq!(nc.atcud(), Some("AAJFJMVNTX-1"));

    let voided = pipeline
        .void_with_rectifying("RET-0001", "Devolução total", "ana")
        .unwrap();
    assert_eq!(voided.len(), 1);
    let doc = &voided[0];
    assert_eq!(doc.state, DocumentState::Voided);
    assert_eq!(doc.status(), DocumentStatus::Voided);
    let voidance = doc.voidance.as_ref().unwrap();
    assert_eq!(voidance.by, "NC NC2024/00001");
    assert_eq!(voidance.date, date(2024, 3, 20));
    assert!(doc.qr.as_ref().unwrap().payload.contains("*E:A*"));

    // Chain fields survive voidance.
    assert_eq!(doc.numbering, original.numbering);
    assert_eq!(doc.chain, original.chain);
    pipeline.verify_series(&invoice_key()).unwrap();

    assert_eq!(log.count(AuditEventType::DocumentVoided), 1);
    log.verify().unwrap();
}

#[test]
fn voidance_only_changes_the_status_flag() {
    let (pipeline, _log) = pipeline();
    let original = submit(
        &pipeline,
        draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100)).build().unwrap(),
    );
    submit(&pipeline, credit_note("RET-0001", date(2024, 3, 20), "FT A2024/00001"));

    // Settings changed after the invoice was certified.
    let mut later = settings();
    later.software_certificate_number = "8888".into();
    later.qr.tax_buckets.clear();
    let relaunched = FiscalPipeline::new(
        later,
        pipeline.registry().clone(),
        pipeline.ledger().clone(),
        pipeline.certificates().clone(),
        pipeline.audit().clone(),
    );
    let voided = relaunched
        .void_with_rectifying("RET-0001", "Devolução", "ana")
        .unwrap();

    let before = &original.qr.as_ref().unwrap().payload;
    let after = &voided[0].qr.as_ref().unwrap().payload;
    assert_eq!(*after, before.replacen("*E:N*", "*E:A*", 1));
    assert!(after.ends_with("*R:9999"));
    assert!(after.contains("*I7:23.00*"));
}

#[test]
fn voided_document_cannot_be_voided_again_or_restored() {
    let (pipeline, _log) = pipeline();
    submit(
        &pipeline,
        draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100)).build().unwrap(),
    );
    submit(&pipeline, credit_note("RET-0001", date(2024, 3, 20), "FT A2024/00001"));
    pipeline.void_with_rectifying("RET-0001", "Devolução", "ana").unwrap();

    submit(&pipeline, credit_note("RET-0002", date(2024, 3, 21), "FT A2024/00001"));
    let err = pipeline
        .void_with_rectifying("RET-0002", "Devolução", "ana")
        .unwrap_err();
    assert!(
        matches!(err, FiscalError::InvalidState(ref m) if m.contains("already voided by NC NC2024/00001")),
        "{err}"
    );

    let mut restored = pipeline.ledger().get("SINV-0001").unwrap();
    restored.state = DocumentState::Submitted;
    restored.voidance = None;
    let err = pipeline.update_document(restored, "rui").unwrap_err();
    assert!(matches!(err, FiscalError::ImmutableField { ref field, .. } if field == "state"));
}

#[test]
fn only_submitted_rectifying_documents_void() {
    let (pipeline, _log) = pipeline();
    submit(
        &pipeline,
        draft("SINV-0001", invoice_key(), date(2024, 3, 15), dec!(100)).build().unwrap(),
    );
    submit(
        &pipeline,
        draft("SINV-0002", invoice_key(), date(2024, 3, 16), dec!(100)).build().unwrap(),
    );
    assert!(matches!(
        pipeline.void_with_rectifying("SINV-0002", "x", "ana"),
        Err(FiscalError::InvalidState(_))
    ));

    pipeline
        .on_draft_save(credit_note("RET-0001", date(2024, 3, 20), "FT A2024/00001"), "ana")
        .unwrap();
    assert!(matches!(
        pipeline.void_with_rectifying("RET-0001", "x", "ana"),
        Err(FiscalError::InvalidState(_))
    ));

    submit(&pipeline, credit_note("RET-0002", date(2024, 3, 20), "FT A2024/09999"));
    assert!(matches!(
        pipeline.void_with_rectifying("RET-0002", "x", "ana"),
        Err(FiscalError::NotFound(_))
    ));
    assert_eq!(
        pipeline.ledger().get("SINV-0001").unwrap().state,
        DocumentState::Submitted
    );
}
