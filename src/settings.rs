//! Compliance configuration: software identity, QR and AT service settings.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{DocumentStatus, FiscalError, ValidationError, validate_nif};

/// Top-level settings for one installation.
///
/// ```
/// use fatura::settings::ComplianceSettings;
///
/// let settings = ComplianceSettings::from_json(r#"{
///     "software_certificate_number": "9999",
///     "software_provider_nif": "501442600",
///     "product_id": "Fatura/Exemplo Lda"
/// }"#).unwrap();
/// assert_eq!(settings.fiscal_space, "PT");
/// assert!(settings.validate().is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceSettings {
    /// AT software certificate number (QR field R, SAF-T `SoftwareCertificateNumber`).
    pub software_certificate_number: String,
    /// NIF of the software producer (SAF-T `ProductCompanyTaxID`).
    pub software_provider_nif: String,
    /// `ProductName/ProducerName` as certified.
    pub product_id: String,
    pub product_version: String,
    /// SAF-T `TaxEntity` ("Global", "Sede", or an establishment id).
    pub tax_entity: String,
    /// SAF-T `TaxAccountingBasis` (F = invoicing, C = accounting, ...).
    pub tax_accounting_basis: String,
    /// Fiscal space (QR field H): PT, PT-AC or PT-MA.
    pub fiscal_space: String,
    pub currency: String,
    /// What the SAF-T `Hash` element of each invoice carries.
    pub saft_hash: SaftHashSource,
    pub qr: QrSettings,
    pub at: Option<AtConfig>,
}

impl Default for ComplianceSettings {
    fn default() -> Self {
        Self {
            software_certificate_number: String::new(),
            software_provider_nif: String::new(),
            product_id: String::new(),
            product_version: env!("CARGO_PKG_VERSION").into(),
            tax_entity: "Global".into(),
            tax_accounting_basis: "F".into(),
            fiscal_space: "PT".into(),
            currency: "EUR".into(),
            saft_hash: SaftHashSource::default(),
            qr: QrSettings::default(),
            at: None,
        }
    }
}

const ACCOUNTING_BASES: &[&str] = &["C", "E", "F", "I", "P", "R", "S", "T"];
const FISCAL_SPACES: &[&str] = &["PT", "PT-AC", "PT-MA"];

impl ComplianceSettings {
    pub fn from_json(json: &str) -> Result<Self, FiscalError> {
        serde_json::from_str(json).map_err(|e| FiscalError::Config(format!("invalid settings: {e}")))
    }

    pub fn to_json(&self) -> Result<String, FiscalError> {
        serde_json::to_string_pretty(self).map_err(|e| FiscalError::Config(e.to_string()))
    }

    /// Check the settings. Returns all problems found.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.software_certificate_number.trim().is_empty() {
            errors.push(ValidationError::new(
                "software_certificate_number",
                "software certificate number is required",
            ));
        }
        if let Err(e) = validate_nif(&self.software_provider_nif) {
            errors.push(ValidationError::new("software_provider_nif", e.to_string()));
        }
        if !self.product_id.contains('/') {
            errors.push(ValidationError::new(
                "product_id",
                "product id must have the form ProductName/ProducerName",
            ));
        }
        if self.product_version.trim().is_empty() {
            errors.push(ValidationError::new("product_version", "product version is required"));
        }
        if !ACCOUNTING_BASES.contains(&self.tax_accounting_basis.as_str()) {
            errors.push(ValidationError::new(
                "tax_accounting_basis",
                format!("unknown tax accounting basis '{}'", self.tax_accounting_basis),
            ));
        }
        if !FISCAL_SPACES.contains(&self.fiscal_space.as_str()) {
            errors.push(ValidationError::new(
                "fiscal_space",
                format!("fiscal space must be one of {}", FISCAL_SPACES.join(", ")),
            ));
        }
        if self.currency.len() != 3 {
            errors.push(ValidationError::new("currency", "currency must be an ISO 4217 code"));
        }

        if let Some(at) = &self.at {
            if at.endpoint.trim().is_empty() {
                errors.push(ValidationError::new("at.endpoint", "endpoint is required"));
            }
            if at.username.trim().is_empty() {
                errors.push(ValidationError::new("at.username", "username is required"));
            }
            if at.timeout_secs == 0 {
                errors.push(ValidationError::new("at.timeout_secs", "timeout must be positive"));
            }
        }

        errors
    }
}

/// Chain value exported as the SAF-T `Hash` of each invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SaftHashSource {
    /// The stored SHA-1 chain hash.
    #[default]
    ChainHash,
    /// The base64 RSA signature over the same payload.
    Signature,
}

/// Which QR field scheme to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QrLayout {
    /// Full field list (A..H, I1..I9, N, O, P, Q, R).
    #[default]
    Standard,
    /// Simplified single-document code used for print preview.
    PrintPreview,
}

/// VAT rate bucket of the QR payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VatBucket {
    Exempt,
    Reduced,
    Intermediate,
    Normal,
    Other,
}

/// QR payload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QrSettings {
    pub layout: QrLayout,
    /// Tax code → bucket. Codes not listed fall into [`VatBucket::Other`].
    pub tax_buckets: BTreeMap<String, VatBucket>,
    /// Status flag overrides. Statuses not listed use [`DocumentStatus::code`].
    pub status_codes: BTreeMap<DocumentStatus, String>,
}

impl Default for QrSettings {
    fn default() -> Self {
        let tax_buckets = [
            ("ISE", VatBucket::Exempt),
            ("RED", VatBucket::Reduced),
            ("INT", VatBucket::Intermediate),
            ("NOR", VatBucket::Normal),
        ]
        .into_iter()
        .map(|(code, bucket)| (code.to_string(), bucket))
        .collect();

        Self {
            layout: QrLayout::Standard,
            tax_buckets,
            status_codes: BTreeMap::new(),
        }
    }
}

impl QrSettings {
    pub fn bucket_for(&self, tax_code: &str) -> VatBucket {
        self.tax_buckets
            .get(tax_code)
            .copied()
            .unwrap_or(VatBucket::Other)
    }

    pub fn status_code(&self, status: DocumentStatus) -> &str {
        self.status_codes
            .get(&status)
            .map(String::as_str)
            .unwrap_or_else(|| status.code())
    }
}

/// AT series web-service settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct AtConfig {
    pub endpoint: String,
    /// AT subuser, e.g. "501442600/1".
    pub username: String,
    pub password: String,
    /// AT public key (PEM) used to encrypt the WS-Security password.
    pub public_key_pem: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl AtConfig {
    /// AT test endpoint for series communication.
    pub const TEST_ENDPOINT: &'static str =
        "https://servicos.portaldasfinancas.gov.pt:722/SeriesWSService";

    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            public_key_pem: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl fmt::Debug for AtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"***")
            .field("public_key_pem", &self.public_key_pem.is_some())
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_need_identity() {
        let errors = ComplianceSettings::default().validate();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"software_certificate_number"));
        assert!(fields.contains(&"software_provider_nif"));
        assert!(fields.contains(&"product_id"));
    }

    #[test]
    fn bucket_map_defaults_and_fallback() {
        let qr = QrSettings::default();
        assert_eq!(qr.bucket_for("NOR"), VatBucket::Normal);
        assert_eq!(qr.bucket_for("ISE"), VatBucket::Exempt);
        assert_eq!(qr.bucket_for("XYZ"), VatBucket::Other);
    }

    #[test]
    fn status_overrides() {
        let mut qr = QrSettings::default();
        assert_eq!(qr.status_code(DocumentStatus::Voided), "A");
        qr.status_codes.insert(DocumentStatus::Voided, "X".into());
        assert_eq!(qr.status_code(DocumentStatus::Voided), "X");
    }

    #[test]
    fn at_config_from_json_with_default_timeout() {
        let s = ComplianceSettings::from_json(
            r#"{"at": {"endpoint": "https://example.test/ws", "username": "501442600/1", "password": "pw"}}"#,
        )
        .unwrap();
        let at = s.at.unwrap();
        assert_eq!(at.timeout_secs, 30);
        assert!(!format!("{at:?}").contains("pw\""));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = ComplianceSettings::from_json("{not json").unwrap_err();
        assert!(matches!(err, FiscalError::Config(_)));
    }
}
