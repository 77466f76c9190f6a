use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::{SequenceError, SeriesKey};

use super::fiscal_series::FiscalSeries;

/// Shared, lockable series record. Holding the lock serializes finalization
/// for that series.
pub type SeriesHandle = Arc<Mutex<FiscalSeries>>;

/// All series known to the installation.
///
/// Each series sits behind its own mutex so different series finalize in
/// parallel while documents of one series are strictly serialized.
#[derive(Debug, Default)]
pub struct SeriesRegistry {
    series: RwLock<HashMap<SeriesKey, SeriesHandle>>,
}

impl SeriesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a series. (entity, doc type, fiscal year, code) must be unique.
    pub fn register(&self, series: FiscalSeries) -> Result<SeriesHandle, SequenceError> {
        let mut map = self.series.write();
        if map.contains_key(&series.key) {
            return Err(SequenceError::DuplicateSeries(series.key.to_string()));
        }
        let key = series.key.clone();
        let handle = Arc::new(Mutex::new(series));
        map.insert(key.clone(), handle.clone());
        tracing::info!(series = %key, "series registered");
        Ok(handle)
    }

    pub fn handle(&self, key: &SeriesKey) -> Result<SeriesHandle, SequenceError> {
        self.series
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| SequenceError::UnknownSeries(key.to_string()))
    }

    /// Point-in-time copy of a series.
    pub fn snapshot(&self, key: &SeriesKey) -> Result<FiscalSeries, SequenceError> {
        Ok(self.handle(key)?.lock().clone())
    }

    /// Series of one entity, ordered by key.
    pub fn list(&self, entity: &str) -> Vec<FiscalSeries> {
        let mut out: Vec<FiscalSeries> = self
            .series
            .read()
            .values()
            .map(|h| h.lock().clone())
            .filter(|s| s.key.entity == entity)
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Atomically increment and return the series counter.
    pub fn next_number(&self, key: &SeriesKey) -> Result<u64, SequenceError> {
        let handle = self.handle(key)?;
        let mut series = handle.lock();
        let seq = series.issue_next()?;
        tracing::debug!(series = %key, seq, "sequential number issued");
        Ok(seq)
    }

    pub fn format_number(&self, key: &SeriesKey, seq: u64) -> Result<String, SequenceError> {
        Ok(self.handle(key)?.lock().format_number(seq))
    }

    pub fn compute_atcud(&self, key: &SeriesKey, seq: u64) -> Result<String, SequenceError> {
        self.handle(key)?.lock().compute_atcud(seq)
    }

    pub fn set_validation_code(&self, key: &SeriesKey, code: &str) -> Result<(), SequenceError> {
        self.handle(key)?.lock().set_validation_code(code)
    }

    pub fn mark_error(&self, key: &SeriesKey, message: &str) -> Result<(), SequenceError> {
        self.handle(key)?.lock().mark_error(message);
        Ok(())
    }

    pub fn deactivate(&self, key: &SeriesKey) -> Result<(), SequenceError> {
        self.handle(key)?.lock().deactivate();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DocumentType;
    use std::collections::HashSet;
    use std::thread;

    fn key(code: &str) -> SeriesKey {
        SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, code)
    }

    #[test]
    fn duplicate_registration_rejected() {
        let reg = SeriesRegistry::new();
        reg.register(FiscalSeries::new(key("A2024"))).unwrap();
        assert!(matches!(
            reg.register(FiscalSeries::new(key("A2024"))),
            Err(SequenceError::DuplicateSeries(_))
        ));
        // same code, other fiscal year is a different series
        let other_year = SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2025, "A2024");
        assert!(reg.register(FiscalSeries::new(other_year)).is_ok());
    }

    #[test]
    fn unknown_series() {
        let reg = SeriesRegistry::new();
        assert!(matches!(
            reg.next_number(&key("Z")),
            Err(SequenceError::UnknownSeries(_))
        ));
    }

    #[test]
    fn concurrent_next_number_is_unique() {
        let reg = Arc::new(SeriesRegistry::new());
        reg.register(FiscalSeries::new(key("A2024"))).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                thread::spawn(move || {
                    (0..50)
                        .map(|_| reg.next_number(&key("A2024")).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for seq in h.join().unwrap() {
                assert!(seen.insert(seq), "sequence {seq} issued twice");
            }
        }
        assert_eq!(seen.len(), 400);
        assert_eq!(reg.snapshot(&key("A2024")).unwrap().counter(), 400);
    }

    #[test]
    fn list_by_entity() {
        let reg = SeriesRegistry::new();
        reg.register(FiscalSeries::new(key("B2024"))).unwrap();
        reg.register(FiscalSeries::new(key("A2024"))).unwrap();
        reg.register(FiscalSeries::new(SeriesKey::new(
            "Outra SA",
            DocumentType::Invoice,
            2024,
            "A2024",
        )))
        .unwrap();
        let codes: Vec<_> = reg
            .list("Exemplo Lda")
            .into_iter()
            .map(|s| s.key.code)
            .collect();
        assert_eq!(codes, vec!["A2024", "B2024"]);
    }
}
