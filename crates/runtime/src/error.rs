//! Runtime error types.

use common::{LockError, RegistryError};
use domain::{AggregateError, DispatchError};
use event_store::EventStoreError;
use saga::SagaError;
use thiserror::Error;

/// Errors raised while assembling or running the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A registry holds more than one handler where one is allowed.
    #[error("Invalid handler registration: {0}")]
    Registry(#[from] RegistryError),

    #[error("Invalid aggregate registration: {0}")]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Saga error: {0}")]
    Saga(#[from] SagaError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    /// Tracing or metrics could not be installed.
    #[error("Telemetry setup failed: {0}")]
    Telemetry(String),

    /// The event consumer task ended abnormally.
    #[error("Event consumer failed: {0}")]
    Consumer(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
