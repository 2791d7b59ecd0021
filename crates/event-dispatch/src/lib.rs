//! Event dispatch for the query and process side.
//!
//! Published records are routed to at most one projection and then to the
//! saga orchestrator, on a bounded worker pool:
//!
//! - [`Projection`] and [`ProjectionRegistry`] for read-model handlers
//! - [`EventDispatcher`], the worker pool and completion signal
//! - [`EventConsumer`] and [`Acknowledger`], which settle each record

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod projection;

pub use consumer::{Acknowledger, EventConsumer, LoggingAcknowledger};
pub use dispatcher::{DispatchReport, EventDispatcher, EventDispatcherConfig};
pub use error::{EventDispatchError, Result};
pub use projection::{Projection, ProjectionRegistry};
