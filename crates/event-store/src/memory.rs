use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventRecord, EventStoreError, Result, Snapshot, Version, storage::EventStorage,
};

/// In-memory [`EventStorage`] for tests and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryEventStorage {
    streams: Arc<RwLock<HashMap<AggregateId, Vec<EventRecord>>>>,
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
}

impl InMemoryEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all aggregates.
    pub async fn event_count(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }

    pub async fn clear(&self) {
        self.streams.write().await.clear();
        self.snapshots.write().await.clear();
    }
}

#[async_trait]
impl EventStorage for InMemoryEventStorage {
    async fn last_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map(|record| record.version))
    }

    async fn insert(&self, record: &EventRecord) -> Result<()> {
        let mut streams = self.streams.write().await;
        let stream = streams.entry(record.aggregate_id).or_default();

        // streams stay sorted: a record must land strictly after the tail
        if stream
            .last()
            .is_some_and(|last| last.version >= record.version)
        {
            return Err(EventStoreError::VersionTaken {
                aggregate_id: record.aggregate_id,
                version: record.version,
            });
        }

        stream.push(record.clone());
        Ok(())
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventRecord>> {
        let streams = self.streams.read().await;
        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn load_after(
        &self,
        aggregate_id: AggregateId,
        after: Version,
    ) -> Result<Vec<EventRecord>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|record| record.version > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.aggregate_id, snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(&aggregate_id).cloned())
    }
}
