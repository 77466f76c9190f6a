use chrono::NaiveDate;
use fatura::core::*;
use rust_decimal_macros::dec;

fn main() {
    // ── 1. NIF checks ─────────────────────────────────────────────────
    println!("=== NIF ===");
    for nif in ["501442600", "501442601", "123456789", "12345", "450000001"] {
        match validate_nif(nif) {
            Ok(kind) => println!("  {nif}: {kind:?}"),
            Err(e) => println!("  {nif}: {e}"),
        }
    }

    // ── 2. Every problem of a draft at once ───────────────────────────
    println!("\n=== Draft validation ===");
    let series = SeriesKey::new("Exemplo Lda", DocumentType::CreditNote, 2024, "NC2024");
    let draft = DocumentBuilder::new("RET-0001", series, NaiveDate::from_ymd_opt(2025, 1, 3).unwrap())
        .issuer_nif("501442601")
        .customer(Customer::new("CLI-9", "", "123", "PT"))
        .add_line(
            LineBuilder::new("FORM-01", "Formação", dec!(1), dec!(250))
                .tax("ISE", dec!(0), dec!(0))
                .build(),
        )
        .build_unchecked()
        .expect("issuer and customer are set");

    let errors = validate_document(&draft);
    println!("  Found {} errors:", errors.len());
    for e in &errors {
        println!("  - {e}");
    }

    // ── 3. build() refuses the same draft ─────────────────────────────
    println!("\n=== build() ===");
    let series = SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, "A2024");
    let result = DocumentBuilder::new("SINV-0001", series, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        .issuer_nif("501442600")
        .customer(Customer::final_consumer())
        .build();
    match result {
        Ok(_) => println!("  unexpected success"),
        Err(e) => println!("  {e}"),
    }
}
