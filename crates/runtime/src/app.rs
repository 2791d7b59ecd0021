//! The assembled runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{DistributedMutex, LeaderSignal, run_if_leader, with_exclusive};
use domain::{Command, CommandDispatcher, CommandPayload, CommandReceipt, DispatchError};
use event_dispatch::{DispatchReport, EventDispatchError, EventDispatcher};
use event_store::{EventRecord, EventStore};
use saga::SagaStateRepository;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;

/// A running command, event and saga pipeline.
///
/// Commands go through the [`CommandDispatcher`]; every event the store
/// commits is published on an in-process bus and consumed by the
/// [`EventDispatcher`], which feeds projections and sagas.
pub struct Runtime {
    commands: Arc<CommandDispatcher>,
    store: Arc<EventStore>,
    events: EventDispatcher,
    saga_repository: Arc<dyn SagaStateRepository>,
    leader: Arc<dyn LeaderSignal>,
    cluster_mutex: Arc<dyn DistributedMutex>,
    consumer: JoinHandle<usize>,
    shutdown: watch::Sender<bool>,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        commands: Arc<CommandDispatcher>,
        store: Arc<EventStore>,
        events: EventDispatcher,
        saga_repository: Arc<dyn SagaStateRepository>,
        leader: Arc<dyn LeaderSignal>,
        cluster_mutex: Arc<dyn DistributedMutex>,
        consumer: JoinHandle<usize>,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            commands,
            store,
            events,
            saga_repository,
            leader,
            cluster_mutex,
            consumer,
            shutdown,
        }
    }

    /// Dispatches a command and waits for its outcome.
    pub async fn send_command(
        &self,
        command: Command,
    ) -> std::result::Result<CommandReceipt, DispatchError> {
        self.commands.send(command).await
    }

    /// Wraps a typed payload and dispatches it.
    pub async fn send_payload<C: CommandPayload>(&self, payload: &C) -> Result<CommandReceipt> {
        Ok(self.commands.send(Command::from_payload(payload)?).await?)
    }

    /// Dispatches a command in the background, reporting to `callback`.
    pub fn send_command_async<F>(&self, command: Command, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Command, std::result::Result<CommandReceipt, DispatchError>) + Send + 'static,
    {
        self.commands.send_async(command, callback)
    }

    /// Feeds an externally delivered record to projections and sagas.
    ///
    /// Records committed through this runtime's own store are dispatched
    /// automatically and must not be published again.
    pub fn publish_event(
        &self,
        record: EventRecord,
    ) -> JoinHandle<std::result::Result<DispatchReport, EventDispatchError>> {
        self.events.dispatch(record)
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn saga_repository(&self) -> &Arc<dyn SagaStateRepository> {
        &self.saga_repository
    }

    pub fn is_leader(&self) -> bool {
        self.leader.is_leader()
    }

    /// Runs `action` only if this process is the elected singleton.
    pub async fn run_singleton<F, Fut, T>(&self, name: &str, action: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        run_if_leader(self.leader.as_ref(), name, action).await
    }

    /// Runs `action` under the cluster-wide mutex.
    pub async fn with_cluster_lock<F, Fut, T>(&self, timeout: Duration, action: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        Ok(with_exclusive(self.cluster_mutex.as_ref(), timeout, action).await?)
    }

    /// Stops consuming new deliveries, lets in-flight events settle and
    /// closes the worker pool. Events that running saga steps commit while
    /// settling are still dispatched, so sagas already under way reach a
    /// resting point. Returns the number of events consumed.
    pub async fn shutdown(self) -> Result<usize> {
        // a send error means the consumer already stopped
        let _ = self.shutdown.send(true);
        let consumed = self.consumer.await?;
        self.events.shutdown().await;
        tracing::info!(consumed, "runtime stopped");
        Ok(consumed)
    }
}
