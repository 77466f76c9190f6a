use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditEventType, AuditTrail};
use crate::core::{DocumentType, FiscalError, SequenceError, SeriesKey};

use super::fiscal_series::FiscalSeries;
use super::registry::SeriesRegistry;

/// Series type as declared to AT (`tipoSerie`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SeriesType {
    /// N: normal series.
    #[default]
    Normal,
    /// F: training series.
    Training,
    /// R: recovery of documents issued during an outage.
    Recovery,
}

impl SeriesType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Normal => "N",
            Self::Training => "F",
            Self::Recovery => "R",
        }
    }
}

/// Payload of a series registration (`registarSerie`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRegistration {
    pub series_code: String,
    pub series_type: SeriesType,
    pub doc_type: DocumentType,
    pub first_number: u64,
    pub expected_start: NaiveDate,
    pub software_certificate: String,
    /// `meioProcessamento`: "PI" for certified invoicing software.
    pub processing_means: String,
}

impl SeriesRegistration {
    pub fn for_series(series: &FiscalSeries, software_certificate: &str) -> Self {
        Self {
            series_code: series.key.code.clone(),
            series_type: SeriesType::Normal,
            doc_type: series.key.doc_type,
            first_number: series.first_number(),
            expected_start: series.expected_start_date().unwrap_or_else(|| {
                NaiveDate::from_ymd_opt(series.key.fiscal_year, 1, 1).unwrap_or_default()
            }),
            software_certificate: software_certificate.to_string(),
            processing_means: "PI".into(),
        }
    }
}

/// What AT reports about a registered series (`consultarSerie`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub series_code: String,
    pub doc_type: String,
    pub validation_code: Option<String>,
    /// AT state, e.g. "A" (active) or "N" (voided).
    pub state: Option<String>,
    pub first_number: Option<u64>,
}

/// The tax-authority series web service.
///
/// Implementations perform network I/O; the caller decides on retries.
pub trait SeriesAuthority: Send + Sync {
    /// Register a series, returning its validation code.
    fn register(
        &self,
        request: &SeriesRegistration,
    ) -> impl Future<Output = Result<String, FiscalError>> + Send;

    fn consult(
        &self,
        series_code: &str,
        doc_type: DocumentType,
    ) -> impl Future<Output = Result<SeriesInfo, FiscalError>> + Send;

    fn void(
        &self,
        series_code: &str,
        doc_type: DocumentType,
        validation_code: &str,
        reason: &str,
    ) -> impl Future<Output = Result<(), FiscalError>> + Send;
}

/// Register a series with AT and store the returned validation code.
///
/// No series lock is held while the request is in flight. On any failure
/// the series is marked `Error`, the failure is audited and returned. There
/// is no retry here.
pub async fn register_series_with_authority<A: SeriesAuthority>(
    registry: &SeriesRegistry,
    key: &SeriesKey,
    authority: &A,
    audit: &AuditTrail,
    software_certificate: &str,
    actor: &str,
) -> Result<String, FiscalError> {
    let series = registry.snapshot(key)?;
    if series.validation_code().is_some() {
        return Err(SequenceError::AlreadyCommunicated(key.to_string()).into());
    }
    if !series.is_active() {
        return Err(SequenceError::SeriesInactive(key.to_string()).into());
    }

    let request = SeriesRegistration::for_series(&series, software_certificate);
    tracing::info!(series = %key, "registering series with AT");

    let outcome = authority.register(&request).await;

    match outcome.and_then(|code| {
        registry.set_validation_code(key, &code)?;
        Ok(code)
    }) {
        Ok(code) => {
            tracing::info!(series = %key, validation_code = %code, "series communicated");
            audit.record(
                AuditEvent::new(AuditEventType::SeriesCommunicated, "Series", key.to_string())
                    .actor(actor)
                    .details(format!("validation code {code}")),
            );
            Ok(code)
        }
        Err(e) => {
            let message = e.to_string();
            registry.mark_error(key, &message)?;
            tracing::error!(series = %key, error = %message, "series communication failed");
            audit.record(
                AuditEvent::new(
                    AuditEventType::SeriesCommunicationFailed,
                    "Series",
                    key.to_string(),
                )
                .actor(actor)
                .details(message.clone()),
            );
            Err(match e {
                FiscalError::ExternalService(_) | FiscalError::Sequence(_) => e,
                other => FiscalError::ExternalService(other.to_string()),
            })
        }
    }
}

/// Ask AT about a series. Adopts the validation code if AT knows one and the
/// local record does not.
pub async fn consult_series_with_authority<A: SeriesAuthority>(
    registry: &SeriesRegistry,
    key: &SeriesKey,
    authority: &A,
) -> Result<SeriesInfo, FiscalError> {
    let info = authority.consult(&key.code, key.doc_type).await?;
    if let Some(code) = &info.validation_code {
        let local = registry.snapshot(key)?;
        if local.validation_code().is_none() {
            registry.set_validation_code(key, code)?;
            tracing::info!(series = %key, validation_code = %code, "validation code recovered from AT");
        }
    }
    Ok(info)
}

/// Void a series at AT and deactivate it locally.
pub async fn void_series_with_authority<A: SeriesAuthority>(
    registry: &SeriesRegistry,
    key: &SeriesKey,
    authority: &A,
    audit: &AuditTrail,
    reason: &str,
    actor: &str,
) -> Result<(), FiscalError> {
    let series = registry.snapshot(key)?;
    let code = series
        .validation_code()
        .ok_or_else(|| SequenceError::MissingValidationCode(key.to_string()))?
        .to_string();

    if let Err(e) = authority.void(&key.code, key.doc_type, &code, reason).await {
        tracing::error!(series = %key, error = %e, "series void failed");
        return Err(e);
    }

    registry.deactivate(key)?;
    tracing::info!(series = %key, "series voided");
    audit.record(
        AuditEvent::new(AuditEventType::SeriesVoided, "Series", key.to_string())
            .actor(actor)
            .details(reason.to_string()),
    );
    Ok(())
}
