use chrono::{NaiveDate, NaiveTime};
use fatura::core::*;
use fatura::lifecycle::FiscalPipeline;
use fatura::series::FiscalSeries;
use fatura::settings::ComplianceSettings;
use fatura::signing::SigningCertificate;
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

const KEY: &str = include_str!("../tests/data/signing_key.pem");

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = ComplianceSettings::from_json(
        r#"{
            "software_certificate_number": "9999",
            "software_provider_nif": "501442600",
            "product_id": "Fatura/Exemplo Lda"
        }"#,
    )?;
    let (pipeline, audit) = FiscalPipeline::in_memory(settings);

    // ── 1. Series with its AT validation code ─────────────────────────
    let key = SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, "A2024");
    pipeline.registry().register(FiscalSeries::new(key.clone()))?;
    pipeline.registry().set_validation_code(&key, "AAJFJMVNTN")?;

    // ── 2. Signing key ────────────────────────────────────────────────
    let cert = SigningCertificate::from_pkcs8_pem("cert-2024", "Exemplo Lda", KEY)?;
    pipeline.certificates().add(cert, true)?;

    // ── 3. Draft ──────────────────────────────────────────────────────
    let draft = DocumentBuilder::new("SINV-0001", key.clone(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        .issuer_nif("501442600")
        .posting_time(NaiveTime::from_hms_opt(10, 30, 0).unwrap())
        .customer(
            Customer::new("CLI-001", "Cliente Exemplo SA", "503504564", "PT")
                .with_address(Address::new("Avenida da Liberdade 10", "Lisboa", "1250-096", "PT")),
        )
        .add_line(
            LineBuilder::new("CONS-01", "Consultoria", dec!(1), dec!(100))
                .tax("NOR", dec!(23), dec!(23))
                .build(),
        )
        .build()?;
    pipeline.on_draft_save(draft, "ana")?;

    // ── 4. Submit: number, ATCUD, hash chain, QR ──────────────────────
    let doc = pipeline.on_submit("SINV-0001", "ana")?;
    let chain = doc.chain.as_ref().ok_or("document was not signed")?;
    println!("Number:    {}", doc.display_name());
    println!("ATCUD:     {}", doc.atcud().unwrap_or_default());
    println!("Hash:      {}", chain.current_hash);
    println!("Fragment:  {}", chain.fragment);
    if let Some(qr) = &doc.qr {
        println!("QR:        {}", qr.payload);
        std::fs::write("FT_A2024_00001_qr.png", &qr.png)?;
        println!("QR image written to FT_A2024_00001_qr.png ({} bytes)", qr.png.len());
    }

    pipeline.verify_series(&key)?;
    println!("\nChain verified; {} audit entries", audit.len());
    Ok(())
}
