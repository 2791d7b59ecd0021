//! Domain layer for the event-sourcing runtime.
//!
//! - [`Aggregate`], [`AggregateState`] and [`DomainEvent`] for event-sourced entities
//! - [`EventSourcingHandlers`], the per-aggregate reconstruction registry
//! - [`Command`], [`CommandPayload`] and [`CommandHandlerRegistry`]
//! - [`CommandDispatcher`], which serializes commands per aggregate

pub mod aggregate;
pub mod command;
pub mod dispatcher;
pub mod error;
pub mod interceptor;
pub mod registry;

pub use aggregate::{Aggregate, AggregateState, DomainEvent, EventSourcingHandlers};
pub use command::{Command, CommandPayload, CommandReceipt};
pub use dispatcher::{CommandDispatcher, DispatcherConfig};
pub use error::{AggregateError, DispatchError};
pub use interceptor::{CommandInterceptor, LoggingInterceptor};
pub use registry::{CommandExecutor, CommandHandlerRegistry, Execution};
