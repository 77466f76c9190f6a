use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Hash the first entry chains to.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Events the compliance core records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventType {
    DraftCreated,
    Submitted,
    CancellationAttempt,
    CertifiedFieldModificationAttempt,
    SeriesCommunicated,
    SeriesCommunicationFailed,
    SeriesVoided,
    DocumentVoided,
    SaftGenerated,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DraftCreated => "draft_created",
            Self::Submitted => "submitted",
            Self::CancellationAttempt => "cancellation_attempt",
            Self::CertifiedFieldModificationAttempt => "certified_field_modification_attempt",
            Self::SeriesCommunicated => "series_communicated",
            Self::SeriesCommunicationFailed => "series_communication_failed",
            Self::SeriesVoided => "series_voided",
            Self::DocumentVoided => "document_voided",
            Self::SaftGenerated => "saft_generated",
        }
    }
}

/// An event to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub actor: String,
    pub event_type: AuditEventType,
    /// Kind of record referenced ("FiscalDocument", "Series", "SAF-T").
    pub reference_type: String,
    pub reference_id: String,
    pub details: String,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        reference_type: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            actor: "system".into(),
            event_type,
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
            details: String::new(),
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// A stored, chained audit entry. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub event_type: AuditEventType,
    pub reference_type: String,
    pub reference_id: String,
    pub details: String,
    pub previous_hash: String,
    /// SHA-256 over the entry content and `previous_hash`.
    pub hash: String,
}

impl AuditEntry {
    fn compute_hash(&self) -> String {
        let input = serde_json::json!([
            self.previous_hash,
            self.seq,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.actor,
            self.event_type.as_str(),
            self.reference_type,
            self.reference_id,
            self.details,
        ])
        .to_string();
        sha256_hex(&input)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("audit chain broken at entry {seq}: {reason}")]
    Tampered { seq: u64, reason: String },
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Append-only in-memory log with SHA-256 chaining.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of all entries in append order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    pub fn entries_for(&self, reference_id: &str) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.reference_id == reference_id)
            .cloned()
            .collect()
    }

    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Recompute every hash and check continuity.
    pub fn verify(&self) -> Result<(), AuditError> {
        verify_entries(&self.entries.read())
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut entries = self.entries.write();
        let previous_hash = entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut entry = AuditEntry {
            seq: entries.len() as u64 + 1,
            timestamp: Utc::now(),
            actor: event.actor,
            event_type: event.event_type,
            reference_type: event.reference_type,
            reference_id: event.reference_id,
            details: event.details,
            previous_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        entries.push(entry);
        Ok(())
    }
}

/// Check a sequence of entries for broken links or altered content.
pub fn verify_entries(entries: &[AuditEntry]) -> Result<(), AuditError> {
    let mut expected_prev = GENESIS_HASH;
    for entry in entries {
        if entry.previous_hash != expected_prev {
            return Err(AuditError::Tampered {
                seq: entry.seq,
                reason: "previous hash does not match preceding entry".into(),
            });
        }
        if entry.compute_hash() != entry.hash {
            return Err(AuditError::Tampered {
                seq: entry.seq,
                reason: "content does not match stored hash".into(),
            });
        }
        expected_prev = &entry.hash;
    }
    Ok(())
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(t: AuditEventType, id: &str) -> AuditEvent {
        AuditEvent::new(t, "FiscalDocument", id).actor("ana").details("test")
    }

    #[test]
    fn entries_are_chained() {
        let log = MemoryAuditLog::new();
        log.record(event(AuditEventType::DraftCreated, "D1")).unwrap();
        log.record(event(AuditEventType::Submitted, "D1")).unwrap();
        log.record(event(AuditEventType::CancellationAttempt, "D1")).unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);
        assert_eq!(entries[1].previous_hash, entries[0].hash);
        assert_eq!(entries[2].previous_hash, entries[1].hash);
        assert_eq!(entries[2].seq, 3);
        assert!(log.verify().is_ok());
    }

    #[test]
    fn altered_entry_is_detected() {
        let log = MemoryAuditLog::new();
        log.record(event(AuditEventType::Submitted, "D1")).unwrap();
        log.record(event(AuditEventType::Submitted, "D2")).unwrap();

        let mut entries = log.entries();
        entries[0].details = "rewritten".into();
        let err = verify_entries(&entries).unwrap_err();
        assert_eq!(
            err,
            AuditError::Tampered {
                seq: 1,
                reason: "content does not match stored hash".into()
            }
        );
    }

    #[test]
    fn removed_entry_is_detected() {
        let log = MemoryAuditLog::new();
        for id in ["D1", "D2", "D3"] {
            log.record(event(AuditEventType::Submitted, id)).unwrap();
        }
        let mut entries = log.entries();
        entries.remove(1);
        assert!(matches!(
            verify_entries(&entries),
            Err(AuditError::Tampered { seq: 3, .. })
        ));
    }

    #[test]
    fn field_boundaries_are_part_of_the_hash() {
        let entry = |reference_type: &str, reference_id: &str| AuditEntry {
            seq: 1,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            actor: "ana".into(),
            event_type: AuditEventType::Submitted,
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
            details: String::new(),
            previous_hash: "0".into(),
            hash: String::new(),
        };
        assert_ne!(
            entry("FiscalDocument|SINV", "0001").compute_hash(),
            entry("FiscalDocument", "SINV|0001").compute_hash()
        );
    }

    #[test]
    fn filters() {
        let log = MemoryAuditLog::new();
        log.record(event(AuditEventType::DraftCreated, "D1")).unwrap();
        log.record(event(AuditEventType::DraftCreated, "D2")).unwrap();
        log.record(event(AuditEventType::Submitted, "D1")).unwrap();
        assert_eq!(log.entries_for("D1").len(), 2);
        assert_eq!(log.count(AuditEventType::DraftCreated), 2);
    }
}
