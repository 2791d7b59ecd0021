//! Process wiring for the event-sourcing runtime.
//!
//! [`RuntimeBuilder`] collects aggregates, command handlers, projections
//! and saga handlers, validates the registrations and assembles a
//! [`Runtime`] around one event store, one command dispatcher and one
//! event dispatcher.

pub mod app;
pub mod builder;
pub mod config;
pub mod demo;
pub mod error;
pub mod gateway;
pub mod telemetry;

pub use app::Runtime;
pub use builder::RuntimeBuilder;
pub use config::{LogFormat, RuntimeConfig};
pub use error::{Result, RuntimeError};
pub use gateway::CommandGateway;
