use common::LockError;
use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The caller's view of the aggregate is stale.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: \
         expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// A constructor command targeted an id that already has history.
    #[error("Aggregate {aggregate_id} already exists at version {actual}")]
    AggregateAlreadyExists {
        aggregate_id: AggregateId,
        actual: Version,
    },

    /// The aggregate has no events.
    #[error("Aggregate not found: {0}")]
    AggregateNotFound(AggregateId),

    /// A storage backend already holds a record at this version.
    #[error("Version {version} of aggregate {aggregate_id} is already taken")]
    VersionTaken {
        aggregate_id: AggregateId,
        version: Version,
    },

    /// Some events of a batch were persisted before a later one failed.
    /// Everything up to `committed_up_to` is durable and was published.
    #[error("Append to {aggregate_id} stopped after version {committed_up_to}: {source}")]
    PartialAppend {
        aggregate_id: AggregateId,
        committed_up_to: Version,
        #[source]
        source: Box<EventStoreError>,
    },

    #[error("Refusing to append an empty batch to {0}")]
    EmptyAppend(AggregateId),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// True when retrying against fresh state may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::AggregateAlreadyExists { .. }
        )
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
