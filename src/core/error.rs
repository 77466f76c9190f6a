use thiserror::Error;

/// Errors that can occur while finalizing, signing, or exporting fiscal documents.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FiscalError {
    /// Malformed input (NIF, missing required field). Nothing was persisted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Numbering or ATCUD failure. Raised before any hash/signature work.
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// Signing failure. No partial signature is persisted.
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// AT web-service fault, business-rule rejection, or timeout.
    #[error("AT service error: {0}")]
    ExternalService(String),

    /// SAF-T structural validation failed. Carries every violation found.
    #[error("SAF-T schema validation failed with {} violation(s)", .0.len())]
    SchemaValidation(Vec<SchemaViolation>),

    /// Attempt to change a certified field after it was set.
    #[error("certified field '{field}' of document {document} cannot be changed")]
    ImmutableField { document: String, field: String },

    /// Referenced document, series, or certificate does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is not allowed in the document's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// XML generation or parsing error.
    #[error("XML error: {0}")]
    Xml(String),

    /// Settings are missing or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Sequence & ATCUD authority errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SequenceError {
    #[error("unknown series {0}")]
    UnknownSeries(String),

    #[error("series {0} is already registered for this entity, document type and fiscal year")]
    DuplicateSeries(String),

    #[error("series {0} is not active")]
    SeriesInactive(String),

    #[error("series {0} has no AT validation code; ATCUD cannot be generated")]
    MissingValidationCode(String),

    #[error("series {series}: '{code}' is not a valid AT validation code")]
    InvalidValidationCode { series: String, code: String },

    #[error("invalid sequential number {0}; must be greater than zero")]
    InvalidSequence(u64),

    #[error("series {series}: posting date {date} precedes the last submitted document ({last})")]
    OutOfOrder {
        series: String,
        date: chrono::NaiveDate,
        last: chrono::NaiveDate,
    },

    #[error("series {0} already has a validation code")]
    AlreadyCommunicated(String),
}

/// Hash-chain signer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SigningError {
    #[error("no active signing certificate for entity {0}")]
    NoActiveCertificate(String),

    #[error("document {0} is already signed")]
    AlreadySigned(String),

    #[error("document {0} has no final number or ATCUD")]
    MissingSequenceData(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("cryptographic failure: {0}")]
    Crypto(String),

    #[error("hash chain broken at {document}: {reason}")]
    ChainBroken { document: String, reason: String },
}

/// A single validation error with field path and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dot-separated path to the invalid field (e.g. "customer.tax_id").
    pub field: String,
    /// Human-readable error description.
    pub message: String,
    /// Rule identifier if applicable (e.g. "PT-03").
    pub rule: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(rule) = &self.rule {
            write!(f, "[{}] {}: {}", rule, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

impl ValidationError {
    /// Create a validation error without a rule ID.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            rule: None,
        }
    }

    /// Create a validation error with a rule ID.
    pub fn with_rule(
        field: impl Into<String>,
        message: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            rule: Some(rule.into()),
        }
    }
}

/// Join collected validation errors into a single `FiscalError::Validation`.
pub(crate) fn validation_failure(errors: &[ValidationError]) -> FiscalError {
    let msg = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    FiscalError::Validation(msg)
}

/// One SAF-T structural violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Slash-separated element path (e.g. "AuditFile/Header/CompanyID").
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
