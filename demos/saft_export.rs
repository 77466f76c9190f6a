use chrono::NaiveDate;
use fatura::core::*;
use fatura::lifecycle::FiscalPipeline;
use fatura::saft::{CompanyInfo, MasterData, validate_saft};
use fatura::series::FiscalSeries;
use fatura::settings::ComplianceSettings;
use fatura::signing::SigningCertificate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

const KEY: &str = include_str!("../tests/data/signing_key.pem");
const ENTITY: &str = "Exemplo Lda";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let settings = ComplianceSettings::from_json(
        r#"{
            "software_certificate_number": "9999",
            "software_provider_nif": "501442600",
            "product_id": "Fatura/Exemplo Lda"
        }"#,
    )?;
    let (pipeline, _audit) = FiscalPipeline::in_memory(settings);

    let invoices = SeriesKey::new(ENTITY, DocumentType::Invoice, 2024, "A2024");
    let credits = SeriesKey::new(ENTITY, DocumentType::CreditNote, 2024, "NC2024");
    for (key, code) in [(&invoices, "AAJFJMVNTN"), (&credits, "AAJFJMVNTX")] {
        pipeline.registry().register(FiscalSeries::new(key.clone()))?;
        pipeline.registry().set_validation_code(key, code)?;
    }
    pipeline
        .certificates()
        .add(SigningCertificate::from_pkcs8_pem("cert-2024", ENTITY, KEY)?, true)?;

    // ── 1. A month of sales ───────────────────────────────────────────
    for day in 1..=5u32 {
        let net = Decimal::from(day * 40);
        let doc = DocumentBuilder::new(
            format!("SINV-{day:04}"),
            invoices.clone(),
            NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
        )
        .issuer_nif("501442600")
        .customer(Customer::final_consumer())
        .add_line(
            LineBuilder::new("LIV-01", "Livro técnico", dec!(1), net)
                .tax("RED", dec!(6), (net * dec!(0.06)).round_dp(2))
                .build(),
        )
        .build()?;
        let id = doc.id.clone();
        pipeline.on_draft_save(doc, "loja")?;
        pipeline.on_submit(&id, "loja")?;
    }

    // ── 2. A return voids the first sale ──────────────────────────────
    let nc = DocumentBuilder::new("RET-0001", credits, NaiveDate::from_ymd_opt(2024, 3, 8).unwrap())
        .issuer_nif("501442600")
        .customer(Customer::final_consumer())
        .add_line(
            LineBuilder::new("LIV-01", "Livro técnico", dec!(1), dec!(40))
                .tax("RED", dec!(6), dec!(2.40))
                .build(),
        )
        .reference("FT A2024/00001", "Devolução")
        .build()?;
    pipeline.on_draft_save(nc, "loja")?;
    pipeline.on_submit("RET-0001", "loja")?;
    pipeline.void_with_rectifying("RET-0001", "Devolução do artigo", "loja")?;

    // ── 3. Export ─────────────────────────────────────────────────────
    let company = CompanyInfo::new(
        ENTITY,
        "501442600",
        "Exemplo Lda",
        Address::new("Rua Augusta 1", "Lisboa", "1100-048", "PT"),
    );
    let file = pipeline.export_saft_year(&company, 2024, &MasterData::default(), "contabilista")?;

    let s = &file.summary;
    println!("Invoices:     {} ({} voided)", s.invoices, s.voided_invoices);
    println!("TotalDebit:   {}", format_amount(s.invoices_total_debit));
    println!("TotalCredit:  {}", format_amount(s.invoices_total_credit));
    println!("Violations:   {}", validate_saft(&file.xml).len());

    let name = file.file_name(&company.nif);
    std::fs::write(&name, &file.xml)?;
    println!("Written to {name}");
    Ok(())
}
