use std::time::Duration;

use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;

use crate::core::{DocumentType, FiscalError};
use crate::series::{SeriesAuthority, SeriesInfo, SeriesRegistration};
use crate::settings::AtConfig;

use super::envelope::*;

/// HTTP client for the AT series web service.
///
/// One request per call, bounded by `AtConfig::timeout_secs`. Retries are
/// left to the caller.
pub struct AtSeriesClient {
    config: AtConfig,
    at_public_key: RsaPublicKey,
    http: reqwest::Client,
}

impl std::fmt::Debug for AtSeriesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtSeriesClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AtSeriesClient {
    pub fn new(config: AtConfig) -> Result<Self, FiscalError> {
        let pem = config
            .public_key_pem
            .as_deref()
            .ok_or_else(|| FiscalError::Config("AT public key is not configured".into()))?;
        let at_public_key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| FiscalError::Config(format!("invalid AT public key: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FiscalError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            config,
            at_public_key,
            http,
        })
    }

    fn token(&self) -> Result<UsernameToken, FiscalError> {
        UsernameToken::new(&self.config.username, &self.config.password, &self.at_public_key)
    }

    async fn call(&self, op: Operation, envelope: String) -> Result<AtResponse, FiscalError> {
        tracing::debug!(operation = op.name(), endpoint = %self.config.endpoint, "AT request");

        let resp = self
            .http
            .post(&self.config.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", op.soap_action())
            .body(envelope)
            .send()
            .await
            .map_err(|e| self.transport_error(op, e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(op, e))?;

        // SOAP faults come back as HTTP 500 with a parseable body.
        match AtResponse::parse(&body) {
            Ok(parsed) if status.is_success() || parsed.fault.is_some() => parsed.into_result(),
            _ => Err(FiscalError::ExternalService(format!(
                "{}: HTTP {status}",
                op.name()
            ))),
        }
    }

    fn transport_error(&self, op: Operation, e: reqwest::Error) -> FiscalError {
        if e.is_timeout() {
            FiscalError::ExternalService(format!(
                "{}: timed out after {}s",
                op.name(),
                self.config.timeout_secs
            ))
        } else {
            FiscalError::ExternalService(format!("{}: {e}", op.name()))
        }
    }
}

impl SeriesAuthority for AtSeriesClient {
    async fn register(&self, request: &SeriesRegistration) -> Result<String, FiscalError> {
        let envelope = register_envelope(&self.token()?, request)?;
        self.call(Operation::Register, envelope)
            .await?
            .into_validation_code()
    }

    async fn consult(
        &self,
        series_code: &str,
        doc_type: DocumentType,
    ) -> Result<SeriesInfo, FiscalError> {
        let envelope = consult_envelope(&self.token()?, series_code, doc_type)?;
        self.call(Operation::Consult, envelope)
            .await?
            .into_series_info(series_code, doc_type)
    }

    async fn void(
        &self,
        series_code: &str,
        doc_type: DocumentType,
        validation_code: &str,
        reason: &str,
    ) -> Result<(), FiscalError> {
        let envelope = void_envelope(&self.token()?, series_code, doc_type, validation_code, reason)?;
        self.call(Operation::Void, envelope).await?;
        Ok(())
    }
}
