use async_trait::async_trait;

use crate::{AggregateId, EventRecord, Result, Snapshot, Version};

/// Durable append-and-query backend for event records and snapshots.
///
/// Backends only enforce uniqueness of `(aggregate_id, version)`; the
/// version protocol itself lives in [`EventStore`](crate::EventStore).
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Highest persisted version, or `None` for an aggregate without events.
    async fn last_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Persists one record. Fails with
    /// [`VersionTaken`](crate::EventStoreError::VersionTaken) if the
    /// aggregate already has a record at that version.
    async fn insert(&self, record: &EventRecord) -> Result<()>;

    /// All records of an aggregate in ascending version order.
    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventRecord>>;

    /// Records with a version strictly greater than `after`, ascending.
    async fn load_after(&self, aggregate_id: AggregateId, after: Version)
    -> Result<Vec<EventRecord>>;

    /// Stores a snapshot, replacing any previous one for the aggregate.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn load_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;
}
