//! Domain error types.

use common::{AggregateId, HandlerError, LockError, RegistryError};
use event_store::{EventStoreError, Version};
use thiserror::Error;

/// Errors raised while applying or replaying events on an aggregate.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// History does not continue where the aggregate stands.
    #[error("Aggregate {aggregate_id} expected version {expected} during replay, found {found}")]
    VersionGap {
        aggregate_id: AggregateId,
        expected: Version,
        found: Version,
    },
}

impl From<AggregateError> for HandlerError {
    fn from(error: AggregateError) -> Self {
        HandlerError::other(error)
    }
}

/// Errors surfaced to the sender of a command.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A pre-handle interceptor refused the command.
    #[error("Command {command_type} rejected by interceptor: {reason}")]
    Rejected {
        command_type: String,
        #[source]
        reason: HandlerError,
    },

    /// The command handler failed. Nothing was persisted.
    #[error("Command handler failed: {0}")]
    Handler(#[source] HandlerError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Command payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl DispatchError {
    /// True when resending the command against fresh state may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Lock(_) => true,
            Self::Store(EventStoreError::Lock(_)) => true,
            Self::Store(error) => error.is_conflict(),
            _ => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registry(_) => "registry",
            Self::Rejected { .. } => "rejected",
            Self::Handler(_) => "handler",
            Self::Aggregate(_) => "aggregate",
            Self::Store(EventStoreError::ConcurrencyConflict { .. }) => "conflict",
            Self::Store(EventStoreError::AggregateAlreadyExists { .. }) => "already_exists",
            Self::Store(EventStoreError::AggregateNotFound(_)) => "not_found",
            Self::Store(_) => "store",
            Self::Lock(_) => "lock_timeout",
            Self::Payload(_) => "payload",
        }
    }
}
