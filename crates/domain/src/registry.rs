//! Command handler registry.
//!
//! Each registration binds a command type to a typed handler and the
//! reconstruction handlers of the aggregate it runs against. The registry
//! erases those types so the dispatcher can route by name.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, HandlerError, HandlerRegistry, RegistryError};
use event_store::{EventStore, Version};

use crate::aggregate::{Aggregate, AggregateState, EventSourcingHandlers};
use crate::command::{Command, CommandPayload};
use crate::error::DispatchError;

/// What a command execution committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    pub version: Version,
    pub events: usize,
}

/// Runs one command type against its aggregate: load, invoke, append.
///
/// Callers must hold the aggregate's lock for the whole call.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    fn aggregate_type(&self) -> &'static str;

    async fn execute(
        &self,
        command: &Command,
        store: &EventStore,
    ) -> Result<Execution, DispatchError>;
}

struct TypedExecutor<S: AggregateState, C, F> {
    handlers: Arc<EventSourcingHandlers<S>>,
    handler: F,
    _command: PhantomData<fn(C)>,
}

impl<S, C, F> TypedExecutor<S, C, F>
where
    S: AggregateState,
    C: CommandPayload,
    F: Fn(&mut Aggregate<S>, C) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    async fn load(
        &self,
        store: &EventStore,
        aggregate_id: AggregateId,
        constructor: bool,
    ) -> Result<Aggregate<S>, DispatchError> {
        if constructor {
            return Ok(Aggregate::new(aggregate_id, Arc::clone(&self.handlers)));
        }

        if S::snapshot_interval().is_some()
            && let Some(snapshot) = store.load_snapshot(aggregate_id).await?
        {
            match Aggregate::restore(snapshot, Arc::clone(&self.handlers)) {
                Ok(mut aggregate) => {
                    let tail = store.read_after(aggregate_id, aggregate.version()).await?;
                    aggregate.replay(&tail)?;
                    return Ok(aggregate);
                }
                Err(error) => {
                    tracing::warn!(
                        %aggregate_id,
                        %error,
                        "unusable snapshot, replaying full history"
                    );
                }
            }
        }

        let history = store.read_all(aggregate_id).await?;
        let mut aggregate = Aggregate::new(aggregate_id, Arc::clone(&self.handlers));
        aggregate.replay(&history)?;
        Ok(aggregate)
    }

    /// Saves a snapshot when the commit crossed a multiple of the interval.
    /// Failures are logged; the command has already succeeded.
    async fn snapshot_if_due(&self, store: &EventStore, aggregate: &Aggregate<S>, before: Version) {
        let Some(interval) = S::snapshot_interval().filter(|n| *n > 0) else {
            return;
        };
        if before.event_count() / interval == aggregate.version().event_count() / interval {
            return;
        }

        let saved = match aggregate.snapshot() {
            Ok(snapshot) => store.save_snapshot(&snapshot).await.map_err(|e| e.to_string()),
            Err(error) => Err(error.to_string()),
        };
        match saved {
            Ok(()) => {
                metrics::counter!("snapshots_saved_total").increment(1);
                tracing::debug!(
                    aggregate_id = %aggregate.id(),
                    version = %aggregate.version(),
                    "snapshot saved"
                );
            }
            Err(error) => {
                tracing::warn!(aggregate_id = %aggregate.id(), %error, "failed to save snapshot");
            }
        }
    }
}

#[async_trait]
impl<S, C, F> CommandExecutor for TypedExecutor<S, C, F>
where
    S: AggregateState,
    C: CommandPayload,
    F: Fn(&mut Aggregate<S>, C) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn aggregate_type(&self) -> &'static str {
        S::aggregate_type()
    }

    async fn execute(
        &self,
        command: &Command,
        store: &EventStore,
    ) -> Result<Execution, DispatchError> {
        let payload: C = command.payload_as()?;
        let mut aggregate = self
            .load(store, command.target_aggregate_id, command.constructor)
            .await?;
        let before = aggregate.version();

        (self.handler)(&mut aggregate, payload).map_err(DispatchError::Handler)?;

        if !aggregate.has_uncommitted() {
            return Ok(Execution {
                version: before,
                events: 0,
            });
        }

        let events = aggregate.uncommitted_events().to_vec();
        let count = events.len();
        let version = store
            .append(
                aggregate.id(),
                S::aggregate_type(),
                events,
                aggregate.committed_version(),
                command.constructor,
            )
            .await?;
        aggregate.mark_committed();

        self.snapshot_if_due(store, &aggregate, before).await;

        Ok(Execution {
            version,
            events: count,
        })
    }
}

/// Command type → single handler.
pub struct CommandHandlerRegistry {
    executors: HandlerRegistry<Arc<dyn CommandExecutor>>,
}

impl CommandHandlerRegistry {
    pub fn new() -> Self {
        Self {
            executors: HandlerRegistry::new("command"),
        }
    }

    /// Registers `handler` for commands of type `C` against aggregates with state `S`.
    pub fn register<S, C, F>(&mut self, handlers: &Arc<EventSourcingHandlers<S>>, handler: F)
    where
        S: AggregateState,
        C: CommandPayload,
        F: Fn(&mut Aggregate<S>, C) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let executor = TypedExecutor::<S, C, F> {
            handlers: Arc::clone(handlers),
            handler,
            _command: PhantomData,
        };
        self.executors.register(C::command_type(), Arc::new(executor));
    }

    pub fn lookup(&self, command_type: &str) -> Result<&Arc<dyn CommandExecutor>, RegistryError> {
        self.executors.lookup(command_type)
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        self.executors.validate()
    }

    pub fn command_types(&self) -> impl Iterator<Item = &str> {
        self.executors.message_types()
    }
}

impl Default for CommandHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
