//! Event store for the event-sourcing runtime.
//!
//! [`EventStore`] implements the optimistic-concurrency append protocol on
//! top of an [`EventStorage`] backend and publishes committed records on an
//! [`EventBus`].

pub mod bus;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod storage;
pub mod store;

pub use bus::{BusError, ChannelEventBus, EventBus, EventReceiver, NoopEventBus};
pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{Event, EventId, EventRecord, Version};
pub use memory::InMemoryEventStorage;
pub use postgres::PostgresEventStorage;
pub use snapshot::Snapshot;
pub use storage::EventStorage;
pub use store::{EventStore, EventStoreConfig};
