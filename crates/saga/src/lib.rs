//! Saga orchestration.
//!
//! A saga is a long-running process correlated across otherwise independent
//! events by an association property. This crate provides:
//!
//! - [`SagaHandlerRegistry`] with separate start, step and end tables
//! - [`resolve_saga_id`], which reads the association property from an event
//! - [`SagaOrchestrator`], which serializes steps per saga instance and
//!   keeps the [`SagaState`] row in step with the saga's lifecycle
//! - [`SagaStateRepository`] with in-memory and PostgreSQL backends

pub mod association;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod postgres;
pub mod registry;
pub mod repository;
pub mod state;

pub use association::resolve_saga_id;
pub use common::SagaId;
pub use context::SagaContext;
pub use error::{Result, SagaError};
pub use orchestrator::{SagaConfig, SagaOrchestrator, SagaOutcome};
pub use postgres::PostgresSagaStateRepository;
pub use registry::{SagaFuture, SagaHandlerFn, SagaHandlerRegistry, SagaRoute, SagaStage};
pub use repository::{InMemorySagaStateRepository, SagaStateRepository};
pub use state::SagaState;
