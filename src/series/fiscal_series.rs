use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::{SequenceError, SeriesKey, is_validation_code};

/// AT communication status of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommunicationStatus {
    #[default]
    Uncommunicated,
    Communicated,
    Error,
}

/// A document series and its counter.
///
/// `counter` holds the last issued sequential number (0 before the first
/// document). It only ever moves forward.
///
/// ```
/// use fatura::core::{DocumentType, SeriesKey};
/// use fatura::series::FiscalSeries;
///
/// let key = SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, "A2024");
/// let mut series = FiscalSeries::new(key);
/// series.set_validation_code("AT7B3C9").unwrap();
///
/// let seq = series.issue_next().unwrap();
/// assert_eq!(series.format_number(seq), "FT A2024/00001");
/// assert_eq!(series.compute_atcud(seq).unwrap(), "AT7B3C9-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalSeries {
    pub key: SeriesKey,
    prefix: String,
    zero_pad: usize,
    active: bool,
    counter: u64,
    first_number: u64,
    expected_start: Option<NaiveDate>,
    validation_code: Option<String>,
    status: CommunicationStatus,
    last_error: Option<String>,
}

impl FiscalSeries {
    /// New series with prefix `"{doc type} {code}"`, numbering from 1.
    pub fn new(key: SeriesKey) -> Self {
        let prefix = format!("{} {}", key.doc_type.code(), key.code);
        Self {
            key,
            prefix,
            zero_pad: 5,
            active: true,
            counter: 0,
            first_number: 1,
            expected_start: None,
            validation_code: None,
            status: CommunicationStatus::Uncommunicated,
            last_error: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set zero-padding width (default: 5, so "00001").
    pub fn with_padding(mut self, width: usize) -> Self {
        self.zero_pad = width;
        self
    }

    /// First sequential number of the series, as communicated to AT.
    pub fn starting_at(mut self, first: u64) -> Self {
        self.first_number = first.max(1);
        self
    }

    /// Planned first-use date reported at registration.
    pub fn expected_start(mut self, date: NaiveDate) -> Self {
        self.expected_start = Some(date);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Last issued sequential number, 0 if none.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn first_number(&self) -> u64 {
        self.first_number
    }

    pub fn expected_start_date(&self) -> Option<NaiveDate> {
        self.expected_start
    }

    pub fn validation_code(&self) -> Option<&str> {
        self.validation_code.as_deref()
    }

    pub fn status(&self) -> CommunicationStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number the next call to [`issue_next`](Self::issue_next) will return.
    pub fn peek_next(&self) -> Result<u64, SequenceError> {
        if !self.active {
            return Err(SequenceError::SeriesInactive(self.key.to_string()));
        }
        Ok(self.counter.max(self.first_number.saturating_sub(1)) + 1)
    }

    /// Increment the counter and return the new sequential number.
    pub fn issue_next(&mut self) -> Result<u64, SequenceError> {
        let next = self.peek_next()?;
        self.counter = next;
        Ok(next)
    }

    /// `{prefix}/{zero-padded seq}`.
    pub fn format_number(&self, seq: u64) -> String {
        format!("{}/{:0>width$}", self.prefix, seq, width = self.zero_pad)
    }

    /// `{validation code}-{seq}`.
    pub fn compute_atcud(&self, seq: u64) -> Result<String, SequenceError> {
        let code = self
            .validation_code
            .as_deref()
            .ok_or_else(|| SequenceError::MissingValidationCode(self.key.to_string()))?;
        if seq == 0 {
            return Err(SequenceError::InvalidSequence(seq));
        }
        Ok(format!("{code}-{seq}"))
    }

    /// Store the AT validation code. A series gets at most one.
    pub fn set_validation_code(&mut self, code: impl Into<String>) -> Result<(), SequenceError> {
        if self.validation_code.is_some() {
            return Err(SequenceError::AlreadyCommunicated(self.key.to_string()));
        }
        let code = code.into();
        if code.trim().is_empty() {
            return Err(SequenceError::MissingValidationCode(self.key.to_string()));
        }
        if !is_validation_code(&code) {
            return Err(SequenceError::InvalidValidationCode {
                series: self.key.to_string(),
                code,
            });
        }
        self.validation_code = Some(code);
        self.status = CommunicationStatus::Communicated;
        self.last_error = None;
        Ok(())
    }

    /// Record a failed communication. An existing validation code is kept.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        if self.validation_code.is_none() {
            self.status = CommunicationStatus::Error;
        }
        self.last_error = Some(message.into());
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }
}
