//! Saga error types.

use common::{HandlerError, LockError, RegistryError, SagaId};
use thiserror::Error;

/// Errors raised while routing an event to a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The event does not carry the property the handler correlates on.
    #[error("Event {event_type} has no association property '{property}'")]
    MissingAssociation {
        event_type: String,
        property: String,
    },

    /// The association property exists but is not a UUID.
    #[error("Association property '{property}' of {event_type} is not a saga id: {value}")]
    InvalidAssociation {
        event_type: String,
        property: String,
        value: String,
    },

    /// More than one handler is registered for the event in one table.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The saga handler itself failed.
    #[error("Saga handler for {event_type} failed on saga {saga_id}: {source}")]
    Handler {
        event_type: String,
        saga_id: SagaId,
        #[source]
        source: HandlerError,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
