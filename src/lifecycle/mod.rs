//! Document lifecycle pipeline.
//!
//! [`FiscalPipeline`] is what the host's document events call into:
//!
//! | Host event | Method |
//! |------------|--------|
//! | draft saved | [`FiscalPipeline::on_draft_save`] |
//! | submitted | [`FiscalPipeline::on_submit`] |
//! | edit of a stored document | [`FiscalPipeline::update_document`] |
//! | cancel | [`FiscalPipeline::on_cancel_attempt`] (always rejected once certified) |
//! | rectifying document submitted | [`FiscalPipeline::void_with_rectifying`] |
//! | SAF-T requested | [`FiscalPipeline::export_saft`] |
//!
//! ```no_run
//! use fatura::core::*;
//! use fatura::lifecycle::FiscalPipeline;
//! use fatura::series::FiscalSeries;
//! use fatura::settings::ComplianceSettings;
//! use fatura::signing::SigningCertificate;
//! use chrono::NaiveDate;
//! use rust_decimal_macros::dec;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ComplianceSettings::from_json(&std::fs::read_to_string("fiscal.json")?)?;
//! let (pipeline, _audit) = FiscalPipeline::in_memory(settings);
//!
//! let key = SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, "A2024");
//! pipeline.registry().register(FiscalSeries::new(key.clone()))?;
//! pipeline.registry().set_validation_code(&key, "AAJFJMVNTN")?;
//!
//! let pem = std::fs::read_to_string("signing_key.pem")?;
//! let cert = SigningCertificate::from_pkcs8_pem("cert-2024", "Exemplo Lda", &pem)?;
//! pipeline.certificates().add(cert, true)?;
//!
//! let draft = DocumentBuilder::new("SINV-0001", key, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
//!     .issuer_nif("501442600")
//!     .customer(Customer::final_consumer())
//!     .add_line(LineBuilder::new("P001", "Consultoria", dec!(1), dec!(100))
//!         .tax("NOR", dec!(23), dec!(23))
//!         .build())
//!     .build()?;
//! pipeline.on_draft_save(draft, "ana")?;
//!
//! let submitted = pipeline.on_submit("SINV-0001", "ana")?;
//! assert_eq!(submitted.atcud(), Some("AAJFJMVNTN-1"));
//! # Ok(())
//! # }
//! ```

mod pipeline;

pub use pipeline::*;
