//! Event dispatch error types.

use common::{HandlerError, RegistryError};
use saga::SagaError;
use thiserror::Error;

/// Errors that fail an event's completion signal.
#[derive(Debug, Error)]
pub enum EventDispatchError {
    /// The projection handler for the event failed.
    #[error("Projection {projection} failed on {event_type}: {source}")]
    Projection {
        projection: String,
        event_type: String,
        #[source]
        source: HandlerError,
    },

    /// The saga step for the event failed.
    #[error("Saga error: {0}")]
    Saga(#[from] SagaError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The worker pool was closed before the event was picked up.
    #[error("Event dispatcher is shut down")]
    Shutdown,

    /// The worker task panicked or was cancelled.
    #[error("Dispatch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl EventDispatchError {
    /// Label used in metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Projection { .. } => "projection",
            Self::Saga(_) => "saga",
            Self::Registry(_) => "registry",
            Self::Shutdown => "shutdown",
            Self::Task(_) => "task",
        }
    }
}

/// Result type for event dispatch.
pub type Result<T> = std::result::Result<T, EventDispatchError>;
