use chrono::NaiveDate;
use fatura::core::*;
use fatura::series::*;
use fatura::settings::*;
use rust_decimal_macros::dec;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn invoice_series() -> SeriesKey {
    SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, "A2024")
}

fn customer() -> Customer {
    Customer::new("CLI-001", "Cliente Exemplo SA", "503504564", "PT")
        .with_address(Address::new("Avenida da Liberdade 10", "Lisboa", "1250-096", "PT"))
}

fn line(code: &str, qty: rust_decimal::Decimal, price: rust_decimal::Decimal) -> DocumentLine {
    let net = qty * price;
    LineBuilder::new(code, "Serviço de consultoria", qty, price)
        .tax("NOR", dec!(23), (net * dec!(0.23)).round_dp(2))
        .build()
}

// --- NIF ---

#[test]
fn nif_valid_individual_and_corporate() {
    assert_eq!(validate_nif("123456789"), Ok(NifKind::Individual));
    assert_eq!(validate_nif("501442600"), Ok(NifKind::Corporate));
    assert_eq!(validate_nif("503504564"), Ok(NifKind::Corporate));
}

#[test]
fn nif_rejections_carry_reason() {
    let (ok, reason) = check_nif("501442601");
    assert!(!ok);
    assert_eq!(reason, NifRejection::CheckDigit.reason());

    assert_eq!(validate_nif("12345678").unwrap_err().rejection, NifRejection::Format);
    assert_eq!(validate_nif("12345678a").unwrap_err().rejection, NifRejection::Format);
    assert_eq!(validate_nif("401234567").unwrap_err().rejection, NifRejection::Prefix);
}

#[test]
fn nif_special_ranges_skip_checksum() {
    assert_eq!(validate_nif("450000001"), Ok(NifKind::Special));
    assert_eq!(validate_nif("710000009"), Ok(NifKind::Special));
}

// --- Document builder & validation ---

#[test]
fn invoice_totals_are_summed() {
    let doc = DocumentBuilder::new("SINV-0001", invoice_series(), date(2024, 3, 15))
        .issuer_nif("501442600")
        .customer(customer())
        .add_line(line("P001", dec!(2), dec!(50)))
        .add_line(line("P002", dec!(1), dec!(70)))
        .stamp_duty(dec!(0.50))
        .build()
        .unwrap();

    assert_eq!(doc.totals.net_total, dec!(170));
    assert_eq!(doc.totals.tax_payable, dec!(39.10));
    assert_eq!(doc.totals.gross_total, dec!(209.60));
    assert_eq!(doc.lines[1].line_number, 2);
    assert_eq!(doc.state, DocumentState::Draft);
    assert_eq!(doc.entity, "Exemplo Lda");
    assert!(doc.numbering.is_none());
}

#[test]
fn validation_collects_all_errors() {
    let doc = DocumentBuilder::new("SINV-0002", invoice_series(), date(2025, 1, 2))
        .issuer_nif("501442601")
        .customer(Customer::new("CLI-002", "", "123", "PT"))
        .build_unchecked()
        .unwrap();

    let rules: Vec<_> = validate_document(&doc)
        .into_iter()
        .filter_map(|e| e.rule)
        .collect();
    for rule in ["PT-01", "PT-02", "PT-03", "PT-08"] {
        assert!(rules.iter().any(|r| r == rule), "missing {rule} in {rules:?}");
    }
}

#[test]
fn final_consumer_needs_no_nif() {
    let doc = DocumentBuilder::new("SINV-0003", invoice_series(), date(2024, 3, 15))
        .issuer_nif("501442600")
        .customer(Customer::final_consumer())
        .add_line(line("P001", dec!(1), dec!(10)))
        .build()
        .unwrap();
    assert!(doc.customer.is_final_consumer());
    assert_eq!(doc.customer.nif(), FINAL_CONSUMER_NIF);
}

#[test]
fn foreign_customer_nif_is_not_checked() {
    let doc = DocumentBuilder::new("SINV-0004", invoice_series(), date(2024, 3, 15))
        .issuer_nif("501442600")
        .customer(Customer::new("CLI-ES", "Cliente Madrid SL", "B12345678", "ES"))
        .add_line(line("P001", dec!(1), dec!(10)))
        .build();
    assert!(doc.is_ok());
}

#[test]
fn exempt_line_requires_exemption_reason() {
    let err = DocumentBuilder::new("SINV-0005", invoice_series(), date(2024, 3, 15))
        .issuer_nif("501442600")
        .customer(customer())
        .add_line(
            LineBuilder::new("P009", "Formação profissional", dec!(1), dec!(100))
                .tax("ISE", dec!(0), dec!(0))
                .build(),
        )
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("PT-05"), "{err}");

    let ok = DocumentBuilder::new("SINV-0005", invoice_series(), date(2024, 3, 15))
        .issuer_nif("501442600")
        .customer(customer())
        .add_line(
            LineBuilder::new("P009", "Formação profissional", dec!(1), dec!(100))
                .tax("ISE", dec!(0), dec!(0))
                .exemption("M07", "Isento artigo 9.º do CIVA")
                .build(),
        )
        .build();
    assert!(ok.is_ok());
}

#[test]
fn document_entity_must_own_the_series() {
    let err = DocumentBuilder::new("SINV-0001", invoice_series(), date(2024, 4, 1))
        .entity("Outra SA")
        .issuer_nif("501442600")
        .customer(customer())
        .add_line(line("P001", dec!(1), dec!(10)))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("PT-10"), "{err}");

    let doc = DocumentBuilder::new("SINV-0001", invoice_series(), date(2024, 4, 1))
        .entity("Exemplo Lda")
        .issuer_nif("501442600")
        .customer(customer())
        .add_line(line("P001", dec!(1), dec!(10)))
        .build()
        .unwrap();
    assert_eq!(doc.entity, doc.series.entity);
}

#[test]
fn credit_note_requires_reference() {
    let series = SeriesKey::new("Exemplo Lda", DocumentType::CreditNote, 2024, "NC2024");
    let err = DocumentBuilder::new("RET-0001", series.clone(), date(2024, 4, 1))
        .issuer_nif("501442600")
        .customer(customer())
        .add_line(line("P001", dec!(1), dec!(10)))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("PT-07"), "{err}");

    let doc = DocumentBuilder::new("RET-0001", series, date(2024, 4, 1))
        .issuer_nif("501442600")
        .customer(customer())
        .add_line(line("P001", dec!(1), dec!(10)))
        .reference("FT A2024/00001", "Devolução")
        .build()
        .unwrap();
    assert!(doc.doc_type().is_credit());
    assert_eq!(doc.references[0].number, "FT A2024/00001");
}

#[test]
fn effective_tax_codes_from_rates() {
    let mk = |rate| LineTax {
        code: None,
        rate,
        amount: dec!(0),
    };
    assert_eq!(mk(dec!(0)).effective_code(), "ISE");
    assert_eq!(mk(dec!(6)).effective_code(), "RED");
    assert_eq!(mk(dec!(13)).effective_code(), "INT");
    assert_eq!(mk(dec!(23)).effective_code(), "NOR");
    assert_eq!(mk(dec!(7)).effective_code(), "OUT");
}

#[test]
fn document_type_catalogue() {
    assert_eq!(DocumentType::from_code("FR"), Some(DocumentType::InvoiceReceipt));
    assert_eq!(DocumentType::from_code("XX"), None);
    assert_eq!(DocumentType::Invoice.class().code(), "SI");
    assert_eq!(DocumentType::DeliveryNote.class().code(), "MG");
    assert_eq!(DocumentType::Quotation.class().code(), "WD");
    assert_eq!(DocumentType::Receipt.class().code(), "PY");
    for t in DocumentType::ALL {
        assert_eq!(DocumentType::from_code(t.code()), Some(t));
    }
}

// --- Series & ATCUD ---

#[test]
fn registry_numbering_and_atcud() {
    let registry = SeriesRegistry::new();
    let key = invoice_series();
    registry.register(FiscalSeries::new(key.clone())).unwrap();

    assert_eq!(
        registry.compute_atcud(&key, 1),
        Err(SequenceError::MissingValidationCode(key.to_string()))
    );

    registry.set_validation_code(&key, "AAJFJMVNTN").unwrap();
    let a = registry.next_number(&key).unwrap();
    let b = registry.next_number(&key).unwrap();
    assert_eq!((a, b), (1, 2));
    assert_eq!(registry.format_number(&key, b).unwrap(), "FT A2024/00002");
    assert_eq!(registry.compute_atcud(&key, b).unwrap(), "AAJFJMVNTN-2");
    assert_eq!(
        registry.compute_atcud(&key, 0),
        Err(SequenceError::InvalidSequence(0))
    );
    assert_eq!(
        registry.snapshot(&key).unwrap().status(),
        CommunicationStatus::Communicated
    );
}

#[test]
fn deactivated_series_refuses_numbers() {
    let registry = SeriesRegistry::new();
    let key = invoice_series();
    registry.register(FiscalSeries::new(key.clone())).unwrap();
    registry.deactivate(&key).unwrap();
    assert_eq!(
        registry.next_number(&key),
        Err(SequenceError::SeriesInactive(key.to_string()))
    );
}

#[test]
fn same_code_in_other_year_is_a_different_series() {
    let registry = SeriesRegistry::new();
    registry.register(FiscalSeries::new(invoice_series())).unwrap();
    let next_year = SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2025, "A2024");
    assert!(registry.register(FiscalSeries::new(next_year)).is_ok());
    assert!(matches!(
        registry.register(FiscalSeries::new(invoice_series())),
        Err(SequenceError::DuplicateSeries(_))
    ));
}

// --- Settings ---

#[test]
fn settings_from_json_with_qr_overrides() {
    let settings = ComplianceSettings::from_json(
        r#"{
            "software_certificate_number": "9999",
            "software_provider_nif": "501442600",
            "product_id": "Fatura/Exemplo Lda",
            "fiscal_space": "PT-MA",
            "qr": { "layout": "PrintPreview", "tax_buckets": { "NOR": "Normal", "IS1": "Exempt" } },
            "at": { "endpoint": "https://example.invalid/SeriesWSService", "username": "501442600/1", "password": "x" }
        }"#,
    )
    .unwrap();

    assert!(settings.validate().is_empty());
    assert_eq!(settings.qr.layout, QrLayout::PrintPreview);
    assert_eq!(settings.qr.bucket_for("IS1"), VatBucket::Exempt);
    assert_eq!(settings.qr.bucket_for("RED"), VatBucket::Other);
    assert_eq!(settings.at.as_ref().unwrap().timeout_secs, 30);
    assert!(!format!("{:?}", settings.at).contains("\"x\""));
}

#[test]
fn malformed_settings_are_config_errors() {
    assert!(matches!(
        ComplianceSettings::from_json("{ not json"),
        Err(FiscalError::Config(_))
    ));
}
