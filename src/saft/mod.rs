//! SAF-T(PT) 1.04_01 audit file export and structural validation.
//!
//! The exporter is read-only over certified documents: it embeds the
//! persisted ATCUD, signature and totals and recomputes every section's
//! `NumberOfEntries`, `TotalDebit` and `TotalCredit` from what it writes.
//!
//! ```no_run
//! use fatura::core::Address;
//! use fatura::saft::*;
//! use fatura::settings::ComplianceSettings;
//!
//! # fn run(docs: &[fatura::core::FiscalDocument]) -> Result<(), fatura::core::FiscalError> {
//! let settings = ComplianceSettings::from_json(r#"{
//!     "software_certificate_number": "9999",
//!     "software_provider_nif": "501442600",
//!     "product_id": "Fatura/Exemplo Lda"
//! }"#)?;
//! let company = CompanyInfo::new(
//!     "Exemplo Lda",
//!     "501442600",
//!     "Exemplo Lda",
//!     Address::new("Rua Augusta 1", "Lisboa", "1100-048", "PT"),
//! );
//! let file = generate_saft(docs, &FiscalPeriod::year(2024)?, &company, &MasterData::default(), &settings)?;
//! std::fs::write(file.file_name(&company.nif), file.xml).ok();
//! # Ok(())
//! # }
//! ```

mod export;
mod model;
mod validate;

pub use export::*;
pub use model::*;
pub use validate::*;

use crate::core::{FiscalDocument, FiscalError};
use crate::settings::ComplianceSettings;

/// Generate and structurally validate an audit file.
///
/// Fails with [`FiscalError::SchemaValidation`] carrying every violation if
/// the generated file does not pass [`validate_saft`].
pub fn generate_saft(
    documents: &[FiscalDocument],
    period: &FiscalPeriod,
    company: &CompanyInfo,
    master: &MasterData,
    settings: &ComplianceSettings,
) -> Result<SaftFile, FiscalError> {
    let file = SaftExporter::new(settings, company, master).generate(documents, period)?;
    ensure_valid(&file.xml)?;
    Ok(file)
}
