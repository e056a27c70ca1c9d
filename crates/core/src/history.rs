use std::sync::{PoisonError, RwLock};

use crate::model::VisitRecord;
use crate::util::now_ms;

/// Append-only, ordered visit history for the lifetime of the process.
///
/// One writer (the orchestrator); any number of concurrent readers take
/// copies through [`HistoryStore::snapshot`].
#[derive(Debug, Default)]
pub struct HistoryStore {
    records: RwLock<Vec<VisitRecord>>,
}

impl HistoryStore {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `record`, stamping its `seq` and `visited_at_ms`, and returns
    /// the stored copy.
    pub fn append(&self, mut record: VisitRecord) -> VisitRecord {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        record.seq = records.len() as u64;
        record.visited_at_ms = now_ms();
        records.push(record.clone());
        record
    }

    /// Copy of every record appended so far, in append order.
    pub fn snapshot(&self) -> Vec<VisitRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of appended records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True before the first append.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Circle, CollectionOutcome};
    use std::sync::Arc;

    fn record(lat: f64) -> VisitRecord {
        VisitRecord::for_circle(&Circle {
            lat,
            lon: 0.0,
            radius_km: 100.0,
        })
    }

    #[test]
    fn append_grows_by_one_and_keeps_prior_entries() {
        let store = HistoryStore::new();
        assert!(store.is_empty());

        let mut first = record(1.0);
        first.resources.push(CollectionOutcome {
            lat: 1.0,
            lon: 2.0,
            amount: 3,
            owned: true,
        });
        let stored = store.append(first);
        assert_eq!(stored.seq, 0);
        let before = store.snapshot();
        assert_eq!(before.len(), 1);

        for i in 2..=5 {
            let len = store.len();
            store.append(record(i as f64));
            assert_eq!(store.len(), len + 1);
        }

        let after = store.snapshot();
        assert_eq!(after[0], before[0]);
        assert_eq!(after.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(store.snapshot(), after);
    }

    #[test]
    fn snapshot_is_a_detached_copy() {
        let store = HistoryStore::new();
        store.append(record(1.0));
        let mut snap = store.snapshot();
        snap[0].lat = 99.0;
        snap.clear();
        assert_eq!(store.snapshot()[0].lat, 1.0);
    }

    #[test]
    fn readers_run_alongside_the_writer() {
        let store = Arc::new(HistoryStore::new());
        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..1_000 {
                    let snap = store.snapshot();
                    assert!(snap.len() >= last);
                    assert!(snap.iter().enumerate().all(|(i, r)| r.seq == i as u64));
                    last = snap.len();
                }
            })
        };
        for i in 0..500 {
            store.append(record(i as f64 / 10.0));
        }
        reader.join().unwrap();
        assert_eq!(store.len(), 500);
    }
}
