//! Compliance audit log.
//!
//! Append-only trail of draft creation, submission, cancellation and
//! certified-field edit attempts, series communication and SAF-T exports.
//! Recording is fire-and-forget: [`AuditTrail::record`] never fails the
//! calling operation, it reports sink failures through `tracing` and a
//! failure counter instead.

mod store;

pub use store::*;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fire-and-forget front for an [`AuditSink`].
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    failures: Arc<AtomicU64>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Trail backed by a fresh [`MemoryAuditLog`]. Returns the log for inspection.
    pub fn in_memory() -> (Self, Arc<MemoryAuditLog>) {
        let log = Arc::new(MemoryAuditLog::new());
        (Self::new(log.clone()), log)
    }

    pub fn record(&self, event: AuditEvent) {
        let event_type = event.event_type;
        let reference_id = event.reference_id.clone();
        if let Err(e) = self.sink.record(event) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                event = event_type.as_str(),
                reference = %reference_id,
                error = %e,
                "failed to record audit event"
            );
        }
    }

    /// Number of events the sink rejected since creation.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("failures", &self.failures())
            .finish_non_exhaustive()
    }
}
