//! Building blocks shared by every layer of the runtime.
//!
//! - [`AggregateId`], [`SagaId`] and [`CommandId`] identifiers
//! - [`LockCache`], a bounded key → lock table used to serialize work per entity
//! - [`HandlerRegistry`], the type-keyed handler table behind every registry
//! - [`LeaderSignal`] and [`DistributedMutex`], the cluster collaborator seams

pub mod cluster;
pub mod error;
pub mod lock_cache;
pub mod registry;
pub mod types;

pub use cluster::{
    DistributedGuard, DistributedMutex, LeaderSignal, LocalMutex, StaticLeader, SwitchableLeader,
    run_if_leader, with_exclusive,
};
pub use error::{HandlerError, LockError, RegistryError};
pub use lock_cache::{KeyGuard, KeyLock, LockCache};
pub use registry::HandlerRegistry;
pub use types::{AggregateId, CommandId, SagaId};
