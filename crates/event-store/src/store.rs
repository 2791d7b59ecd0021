use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::LockCache;

use crate::{
    AggregateId, Event, EventRecord, EventStoreError, Result, Snapshot, Version, bus::EventBus,
    storage::EventStorage,
};

/// Tuning for [`EventStore`].
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Number of per-aggregate locks kept resident.
    pub lock_capacity: NonZeroUsize,
    /// How long an append waits for its aggregate's lock.
    pub lock_timeout: Duration,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            lock_capacity: NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Append-only, per-aggregate ordered event log with optimistic
/// concurrency control and publish-on-commit.
///
/// Within one process the read-check-write of an append is serialized by a
/// per-aggregate lock. Across processes the storage backend's unique
/// `(aggregate_id, version)` constraint is the safety net: losing that race
/// surfaces as a conflict, never as a duplicate record.
pub struct EventStore {
    storage: Arc<dyn EventStorage>,
    bus: Arc<dyn EventBus>,
    locks: LockCache<AggregateId>,
    lock_timeout: Duration,
}

impl EventStore {
    pub fn new(
        storage: Arc<dyn EventStorage>,
        bus: Arc<dyn EventBus>,
        config: EventStoreConfig,
    ) -> Self {
        Self {
            storage,
            bus,
            locks: LockCache::new("event_store", config.lock_capacity),
            lock_timeout: config.lock_timeout,
        }
    }

    pub fn storage(&self) -> &Arc<dyn EventStorage> {
        &self.storage
    }

    /// Appends `events` after `expected_version` and returns the version of
    /// the last one.
    ///
    /// Fails without writing anything if the aggregate's last version is not
    /// `expected_version`: with
    /// [`AggregateAlreadyExists`](EventStoreError::AggregateAlreadyExists)
    /// when `is_new` is set and history exists, with
    /// [`ConcurrencyConflict`](EventStoreError::ConcurrencyConflict)
    /// otherwise. Events get consecutive versions starting at
    /// `expected_version + 1`; each one is published right after it is
    /// stored. If storage fails part way through the batch, the records
    /// already written stay and the error is
    /// [`PartialAppend`](EventStoreError::PartialAppend).
    #[tracing::instrument(skip(self, events), fields(events = events.len()))]
    pub async fn append(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        events: Vec<Event>,
        expected_version: Version,
        is_new: bool,
    ) -> Result<Version> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyAppend(aggregate_id));
        }
        let start = Instant::now();
        let _guard = self.locks.acquire(&aggregate_id, self.lock_timeout).await?;

        let actual = self
            .storage
            .last_version(aggregate_id)
            .await?
            .unwrap_or_else(Version::initial);

        if actual != expected_version {
            metrics::counter!("event_store_conflicts_total").increment(1);
            tracing::debug!(%expected_version, %actual, "stale expected version");
            return Err(if is_new && !actual.is_initial() {
                EventStoreError::AggregateAlreadyExists {
                    aggregate_id,
                    actual,
                }
            } else {
                EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected: expected_version,
                    actual,
                }
            });
        }

        let mut committed = expected_version;
        for event in events {
            let version = committed.next();
            let record = EventRecord::new(aggregate_type, version, event);

            if let Err(error) = self.storage.insert(&record).await {
                let error = match error {
                    EventStoreError::VersionTaken { .. }
                        if is_new && committed == expected_version =>
                    {
                        EventStoreError::AggregateAlreadyExists {
                            aggregate_id,
                            actual: version,
                        }
                    }
                    EventStoreError::VersionTaken { version, .. } => {
                        EventStoreError::ConcurrencyConflict {
                            aggregate_id,
                            expected: expected_version,
                            actual: version,
                        }
                    }
                    other => other,
                };
                if committed == expected_version {
                    return Err(error);
                }
                metrics::counter!("event_store_partial_appends_total").increment(1);
                tracing::error!(committed_up_to = %committed, %error, "append failed mid-batch");
                return Err(EventStoreError::PartialAppend {
                    aggregate_id,
                    committed_up_to: committed,
                    source: Box::new(error),
                });
            }

            committed = version;
            self.publish(&record).await;
        }

        metrics::counter!("events_appended_total")
            .increment(committed.as_i64().abs_diff(expected_version.as_i64()));
        metrics::histogram!("event_store_append_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        tracing::debug!(committed_up_to = %committed, "events appended");

        Ok(committed)
    }

    /// Publication failures do not undo a durable write; they are logged
    /// and left to the transport's redelivery.
    async fn publish(&self, record: &EventRecord) {
        if let Err(error) = self.bus.publish(record).await {
            metrics::counter!("event_publish_failures_total").increment(1);
            tracing::warn!(
                aggregate_id = %record.aggregate_id,
                version = %record.version,
                event_type = %record.event_type,
                %error,
                "failed to publish committed event"
            );
        }
    }

    /// Every event of an aggregate in version order.
    pub async fn read_all(&self, aggregate_id: AggregateId) -> Result<Vec<EventRecord>> {
        let records = self.storage.load(aggregate_id).await?;
        if records.is_empty() {
            return Err(EventStoreError::AggregateNotFound(aggregate_id));
        }
        Ok(records)
    }

    /// Events with a version strictly after `version`, in order.
    pub async fn read_after(
        &self,
        aggregate_id: AggregateId,
        version: Version,
    ) -> Result<Vec<EventRecord>> {
        self.storage.load_after(aggregate_id, version).await
    }

    pub async fn last_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        self.storage.last_version(aggregate_id).await
    }

    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.storage.save_snapshot(snapshot).await
    }

    pub async fn load_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        self.storage.load_snapshot(aggregate_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{ChannelEventBus, EventReceiver, InMemoryEventStorage, NoopEventBus};

    fn event(aggregate_id: AggregateId, event_type: &str, n: i64) -> Event {
        Event::new(
            event_type,
            aggregate_id,
            Version::initial(),
            serde_json::json!({"n": n, "nested": {"list": [1, 2, 3], "flag": true}}),
        )
    }

    fn store_with_bus() -> (EventStore, InMemoryEventStorage, EventReceiver) {
        let storage = InMemoryEventStorage::new();
        let (bus, receiver) = ChannelEventBus::channel();
        let store = EventStore::new(
            Arc::new(storage.clone()),
            Arc::new(bus),
            EventStoreConfig::default(),
        );
        (store, storage, receiver)
    }

    #[tokio::test]
    async fn append_assigns_contiguous_versions() {
        let (store, _, _rx) = store_with_bus();
        let id = AggregateId::new();

        let last = store
            .append(
                id,
                "Account",
                vec![event(id, "A", 0), event(id, "B", 1), event(id, "C", 2)],
                Version::initial(),
                true,
            )
            .await
            .unwrap();
        assert_eq!(last, Version::new(2));

        let last = store
            .append(id, "Account", vec![event(id, "D", 3)], last, false)
            .await
            .unwrap();
        assert_eq!(last, Version::new(3));

        let versions: Vec<i64> = store
            .read_all(id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.version.as_i64())
            .collect();
        assert_eq!(versions, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn round_trip_preserves_order_and_payloads() {
        let (store, _, _rx) = store_with_bus();
        let id = AggregateId::new();
        let originals: Vec<Event> = (0..5).map(|n| event(id, "Tick", n)).collect();

        store
            .append(id, "Clock", originals.clone(), Version::initial(), true)
            .await
            .unwrap();

        let records = store.read_all(id).await.unwrap();
        assert_eq!(records.len(), originals.len());
        for (index, (record, original)) in records.iter().zip(&originals).enumerate() {
            assert_eq!(record.version, Version::new(index as i64));
            assert_eq!(record.payload, original.payload);
            assert_eq!(record.event_type, original.event_type);
            assert_eq!(record.aggregate_type, "Clock");
        }
    }

    #[tokio::test]
    async fn stale_version_on_existing_aggregate_conflicts() {
        let (store, storage, _rx) = store_with_bus();
        let id = AggregateId::new();
        store
            .append(
                id,
                "Account",
                vec![event(id, "A", 0), event(id, "B", 1)],
                Version::initial(),
                true,
            )
            .await
            .unwrap();

        let result = store
            .append(id, "Account", vec![event(id, "C", 2)], Version::first(), false)
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { expected, actual, .. })
                if expected == Version::first() && actual == Version::new(1)
        ));
        assert_eq!(storage.event_count().await, 2);
    }

    #[tokio::test]
    async fn creating_existing_aggregate_reports_already_exists() {
        let (store, storage, _rx) = store_with_bus();
        let id = AggregateId::new();
        store
            .append(id, "Account", vec![event(id, "Opened", 0)], Version::initial(), true)
            .await
            .unwrap();

        let result = store
            .append(id, "Account", vec![event(id, "Opened", 1)], Version::initial(), true)
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::AggregateAlreadyExists { actual, .. })
                if actual == Version::first()
        ));
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(storage.event_count().await, 1);
    }

    #[tokio::test]
    async fn expecting_history_that_does_not_exist_conflicts() {
        let (store, storage, _rx) = store_with_bus();
        let id = AggregateId::new();

        let result = store
            .append(id, "Account", vec![event(id, "A", 0)], Version::new(3), false)
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { actual, .. }) if actual == Version::initial()
        ));
        assert_eq!(storage.event_count().await, 0);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let (store, _, _rx) = store_with_bus();
        let id = AggregateId::new();

        let result = store
            .append(id, "Account", Vec::new(), Version::initial(), true)
            .await;

        assert!(matches!(result, Err(EventStoreError::EmptyAppend(got)) if got == id));
    }

    #[tokio::test]
    async fn read_all_of_unknown_aggregate_is_not_found() {
        let (store, _, _rx) = store_with_bus();
        let id = AggregateId::new();

        assert!(matches!(
            store.read_all(id).await,
            Err(EventStoreError::AggregateNotFound(got)) if got == id
        ));
        assert!(store.read_after(id, Version::initial()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_after_returns_tail() {
        let (store, _, _rx) = store_with_bus();
        let id = AggregateId::new();
        let events = (0..6).map(|n| event(id, "Tick", n)).collect();
        store
            .append(id, "Clock", events, Version::initial(), true)
            .await
            .unwrap();

        let tail = store.read_after(id, Version::new(3)).await.unwrap();

        let versions: Vec<i64> = tail.iter().map(|r| r.version.as_i64()).collect();
        assert_eq!(versions, vec![4, 5]);
    }

    #[tokio::test]
    async fn publishes_each_record_in_version_order() {
        let (store, _, mut rx) = store_with_bus();
        let id = AggregateId::new();
        store
            .append(
                id,
                "Clock",
                vec![event(id, "A", 0), event(id, "B", 1)],
                Version::initial(),
                true,
            )
            .await
            .unwrap();
        store
            .append(id, "Clock", vec![event(id, "C", 2)], Version::new(1), false)
            .await
            .unwrap();

        let mut published = Vec::new();
        while let Some(record) = rx.try_recv() {
            published.push((record.event_type, record.version.as_i64()));
        }
        assert_eq!(
            published,
            vec![("A".to_string(), 0), ("B".to_string(), 1), ("C".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn publish_failure_does_not_fail_append() {
        let (store, storage, rx) = store_with_bus();
        drop(rx);
        let id = AggregateId::new();

        let last = store
            .append(id, "Account", vec![event(id, "A", 0)], Version::initial(), true)
            .await
            .unwrap();

        assert_eq!(last, Version::first());
        assert_eq!(storage.event_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_with_same_expectation_admit_one() {
        let store = Arc::new(EventStore::new(
            Arc::new(InMemoryEventStorage::new()),
            Arc::new(NoopEventBus),
            EventStoreConfig::default(),
        ));
        let id = AggregateId::new();
        store
            .append(id, "Account", vec![event(id, "Opened", 0)], Version::initial(), true)
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for n in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .append(id, "Account", vec![event(id, "Deposited", n)], Version::first(), false)
                    .await
            }));
        }

        let mut successes = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(e.is_conflict(), "unexpected error: {e}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.read_all(id).await.unwrap().len(), 2);
    }

    /// Delegates to memory storage but fails every insert after the first `limit`.
    struct FlakyStorage {
        inner: InMemoryEventStorage,
        limit: usize,
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl EventStorage for FlakyStorage {
        async fn last_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
            self.inner.last_version(aggregate_id).await
        }

        async fn insert(&self, record: &EventRecord) -> Result<()> {
            if self.inserts.fetch_add(1, Ordering::SeqCst) >= self.limit {
                return Err(EventStoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.insert(record).await
        }

        async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventRecord>> {
            self.inner.load(aggregate_id).await
        }

        async fn load_after(
            &self,
            aggregate_id: AggregateId,
            after: Version,
        ) -> Result<Vec<EventRecord>> {
            self.inner.load_after(aggregate_id, after).await
        }

        async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
            self.inner.save_snapshot(snapshot).await
        }

        async fn load_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
            self.inner.load_snapshot(aggregate_id).await
        }
    }

    fn flaky_store(limit: usize) -> (EventStore, InMemoryEventStorage, EventReceiver) {
        let inner = InMemoryEventStorage::new();
        let (bus, receiver) = ChannelEventBus::channel();
        let storage = FlakyStorage {
            inner: inner.clone(),
            limit,
            inserts: AtomicUsize::new(0),
        };
        let store = EventStore::new(Arc::new(storage), Arc::new(bus), EventStoreConfig::default());
        (store, inner, receiver)
    }

    #[tokio::test]
    async fn failure_mid_batch_is_partial_append() {
        let (store, inner, mut rx) = flaky_store(2);
        let id = AggregateId::new();
        let events = (0..4).map(|n| event(id, "Tick", n)).collect();

        let result = store
            .append(id, "Clock", events, Version::initial(), true)
            .await;

        match result {
            Err(EventStoreError::PartialAppend {
                committed_up_to,
                source,
                ..
            }) => {
                assert_eq!(committed_up_to, Version::new(1));
                assert!(matches!(*source, EventStoreError::Database(_)));
            }
            other => panic!("expected partial append, got {other:?}"),
        }
        assert_eq!(inner.event_count().await, 2);
        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn failure_on_first_record_is_plain_error() {
        let (store, inner, _rx) = flaky_store(0);
        let id = AggregateId::new();

        let result = store
            .append(id, "Clock", vec![event(id, "Tick", 0)], Version::initial(), true)
            .await;

        assert!(matches!(result, Err(EventStoreError::Database(_))));
        assert_eq!(inner.event_count().await, 0);
    }

    #[tokio::test]
    async fn snapshots_pass_through() {
        let (store, _, _rx) = store_with_bus();
        let id = AggregateId::new();
        let snapshot = Snapshot::from_state(id, "Account", Version::new(9), &42u64).unwrap();

        store.save_snapshot(&snapshot).await.unwrap();

        assert_eq!(store.load_snapshot(id).await.unwrap(), Some(snapshot));
    }
}
