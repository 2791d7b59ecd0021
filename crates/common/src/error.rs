//! Error types shared across crates.

use std::time::Duration;

use thiserror::Error;

/// Configuration errors raised by a [`HandlerRegistry`](crate::HandlerRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No handler is registered for the message type.
    #[error("No {category} handler registered for {message_type}")]
    NoHandler {
        category: &'static str,
        message_type: String,
    },

    /// More than one handler is registered for a message type that allows one.
    #[error("{count} {category} handlers registered for {message_type}, expected one")]
    AmbiguousHandler {
        category: &'static str,
        message_type: String,
        count: usize,
    },
}

/// Failure to take an exclusive lock in time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("Timed out after {timeout:?} waiting for lock on {resource}")]
    Timeout { resource: String, timeout: Duration },
}

/// Failure raised by user-supplied handler code.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler refused the message on business grounds.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The message payload did not match the handler's expected shape.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Any other failure.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(error))
    }
}
