//! Fan-out of appended visit records to live observers.
//!
//! Every observer owns a bounded queue. Publishing never waits: an observer
//! whose queue is full is dropped, one whose receiver is gone is removed.
//! New observers get the history snapshot once, then live records; records
//! already covered by the snapshot are filtered out by sequence number.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::history::HistoryStore;
use crate::model::VisitRecord;
use crate::util::new_ulid;

/// Handle identifying one observer.
pub type ObserverId = Ulid;

/// Default per-observer queue capacity.
pub const DEFAULT_OBSERVER_BUFFER: usize = 256;

/// Cheap to clone; clones share the observer set.
#[derive(Clone)]
pub struct LiveBroadcaster {
    inner: Arc<Inner>,
}

struct Inner {
    history: Arc<HistoryStore>,
    capacity: usize,
    observers: Mutex<HashMap<ObserverId, mpsc::Sender<VisitRecord>>>,
}

impl LiveBroadcaster {
    /// Broadcaster over `history` with `capacity` queued records per observer.
    pub fn new(history: Arc<HistoryStore>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                history,
                capacity: capacity.max(1),
                observers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The history observers are seeded from.
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.inner.history
    }

    /// Registers a new observer seeded with the current snapshot.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = new_ulid();

        let mut observers = self.observers();
        let snapshot = self.inner.history.snapshot();
        observers.insert(id, tx);
        drop(observers);

        debug!(observer = %id, snapshot = snapshot.len(), "observer subscribed");
        Subscription {
            id,
            broadcaster: self.clone(),
            next_seq: snapshot.len() as u64,
            snapshot,
            rx,
        }
    }

    /// Delivers `record` to every current observer without waiting.
    pub fn publish(&self, record: &VisitRecord) {
        self.observers().retain(|id, tx| match tx.try_send(record.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(observer = %id, seq = record.seq, "observer queue full; dropping observer");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(observer = %id, "observer gone");
                false
            }
        });
    }

    /// Removes an observer. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers().remove(&id).is_some()
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    fn observers(&self) -> std::sync::MutexGuard<'_, HashMap<ObserverId, mpsc::Sender<VisitRecord>>> {
        self.inner.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One observer's view: a snapshot, then live records in append order.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: ObserverId,
    broadcaster: LiveBroadcaster,
    snapshot: Vec<VisitRecord>,
    next_seq: u64,
    rx: mpsc::Receiver<VisitRecord>,
}

impl Subscription {
    /// This observer's id.
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Takes the subscribe-time snapshot. Later calls return an empty vec.
    pub fn take_snapshot(&mut self) -> Vec<VisitRecord> {
        std::mem::take(&mut self.snapshot)
    }

    /// Next live record, or `None` once the observer has been dropped and
    /// its queue drained.
    pub async fn recv(&mut self) -> Option<VisitRecord> {
        loop {
            let record = self.rx.recv().await?;
            if let Some(record) = self.accept(record) {
                return Some(record);
            }
        }
    }

    /// Non-waiting variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Result<VisitRecord, TryRecvError> {
        loop {
            let record = self.rx.try_recv()?;
            if let Some(record) = self.accept(record) {
                return Ok(record);
            }
        }
    }

    fn accept(&mut self, record: VisitRecord) -> Option<VisitRecord> {
        if record.seq < self.next_seq {
            return None;
        }
        self.next_seq = record.seq + 1;
        Some(record)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Circle;
    use std::time::{Duration, Instant};

    fn record(lat: f64) -> VisitRecord {
        VisitRecord::for_circle(&Circle {
            lat,
            lon: 0.0,
            radius_km: 50.0,
        })
    }

    fn append_and_publish(b: &LiveBroadcaster, lat: f64) -> VisitRecord {
        let stored = b.history().append(record(lat));
        b.publish(&stored);
        stored
    }

    #[tokio::test]
    async fn subscriber_gets_snapshot_then_live_records_in_order() {
        let b = LiveBroadcaster::new(Arc::new(HistoryStore::new()), 16);
        append_and_publish(&b, 1.0);
        append_and_publish(&b, 2.0);

        let mut sub = b.subscribe();
        let snapshot = sub.take_snapshot();
        assert_eq!(snapshot, b.history().snapshot());
        assert!(sub.take_snapshot().is_empty());

        let third = append_and_publish(&b, 3.0);
        let fourth = append_and_publish(&b, 4.0);

        assert_eq!(sub.recv().await, Some(third));
        assert_eq!(sub.recv().await, Some(fourth));
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn record_appended_before_subscribe_is_not_delivered_twice() {
        let b = LiveBroadcaster::new(Arc::new(HistoryStore::new()), 16);

        // Subscribe lands between append and publish.
        let stored = b.history().append(record(1.0));
        let mut sub = b.subscribe();
        b.publish(&stored);

        assert_eq!(sub.take_snapshot(), vec![stored]);
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Empty)));

        let next = append_and_publish(&b, 2.0);
        assert_eq!(sub.try_recv().ok(), Some(next));
    }

    #[test]
    fn blocked_observer_does_not_delay_others_and_is_dropped() {
        let b = LiveBroadcaster::new(Arc::new(HistoryStore::new()), 2);
        let mut blocked = b.subscribe();
        let mut fast = b.subscribe();
        assert_eq!(b.observer_count(), 2);

        let started = Instant::now();
        let mut published = Vec::new();
        for i in 0..10 {
            published.push(append_and_publish(&b, i as f64));
            assert_eq!(fast.try_recv().ok().as_ref(), published.last());
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(b.observer_count(), 1);
        assert_eq!(blocked.try_recv().ok().as_ref(), Some(&published[0]));
        assert_eq!(blocked.try_recv().ok().as_ref(), Some(&published[1]));
        assert!(matches!(blocked.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let b = LiveBroadcaster::new(Arc::new(HistoryStore::new()), 4);
        let sub = b.subscribe();
        let id = sub.id();
        assert_eq!(b.observer_count(), 1);
        drop(sub);
        assert_eq!(b.observer_count(), 0);
        assert!(!b.unsubscribe(id));
    }

    #[test]
    fn publish_with_no_observers_is_a_no_op() {
        let b = LiveBroadcaster::new(Arc::new(HistoryStore::new()), 4);
        append_and_publish(&b, 0.0);
        assert_eq!(b.history().len(), 1);
        assert_eq!(b.observer_count(), 0);
    }
}
