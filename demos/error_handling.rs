use chrono::NaiveDate;
use fatura::core::*;
use fatura::lifecycle::FiscalPipeline;
use fatura::series::FiscalSeries;
use fatura::settings::ComplianceSettings;
use fatura::signing::SigningCertificate;
use rust_decimal_macros::dec;

const KEY: &str = include_str!("../tests/data/signing_key.pem");

fn draft(id: &str, key: &SeriesKey, day: u32) -> FiscalDocument {
    DocumentBuilder::new(id, key.clone(), NaiveDate::from_ymd_opt(2024, 3, day).unwrap())
        .issuer_nif("501442600")
        .customer(Customer::final_consumer())
        .add_line(
            LineBuilder::new("P001", "Consultoria", dec!(1), dec!(100))
                .tax("NOR", dec!(23), dec!(23))
                .build(),
        )
        .build()
        .expect("valid draft")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = ComplianceSettings::from_json(
        r#"{
            "software_certificate_number": "9999",
            "software_provider_nif": "501442600",
            "product_id": "Fatura/Exemplo Lda"
        }"#,
    )?;
    let (pipeline, audit) = FiscalPipeline::in_memory(settings);
    let key = SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, "A2024");
    pipeline.registry().register(FiscalSeries::new(key.clone()))?;
    pipeline
        .certificates()
        .add(SigningCertificate::from_pkcs8_pem("cert-2024", "Exemplo Lda", KEY)?, true)?;

    // ── 1. No validation code yet: nothing is numbered ────────────────
    println!("=== Series not communicated ===");
    pipeline.on_draft_save(draft("SINV-0001", &key, 15), "ana")?;
    match pipeline.on_submit("SINV-0001", "ana") {
        Err(FiscalError::Sequence(e)) => println!("  {e}"),
        other => println!("  unexpected: {other:?}"),
    }
    pipeline.registry().set_validation_code(&key, "AAJFJMVNTN")?;
    let doc = pipeline.on_submit("SINV-0001", "ana")?;
    println!("  after communication: {}", doc.atcud().unwrap_or_default());

    // ── 2. Backdated document ─────────────────────────────────────────
    println!("\n=== Out of order ===");
    pipeline.on_draft_save(draft("SINV-0002", &key, 10), "ana")?;
    if let Err(e) = pipeline.on_submit("SINV-0002", "ana") {
        println!("  {e}");
    }

    // ── 3. Certified documents are immutable ──────────────────────────
    println!("\n=== Immutability ===");
    let mut edited = doc.clone();
    edited.totals.gross_total = dec!(1.00);
    if let Err(e) = pipeline.update_document(edited, "rui") {
        println!("  {e}");
    }
    if let Err(e) = pipeline.on_cancel_attempt("SINV-0001", "rui") {
        println!("  {e}");
    }

    println!("\n=== Audit trail ===");
    for entry in audit.entries() {
        println!("  #{} {} {} by {}", entry.seq, entry.event_type.as_str(), entry.reference_id, entry.actor);
    }
    audit.verify()?;
    Ok(())
}
