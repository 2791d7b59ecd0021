//! Startup registration and wiring.

use std::future::Future;
use std::sync::Arc;

use common::{DistributedMutex, HandlerError, LeaderSignal, LocalMutex, StaticLeader};
use domain::{
    Aggregate, AggregateState, CommandDispatcher, CommandHandlerRegistry, CommandInterceptor,
    CommandPayload, EventSourcingHandlers,
};
use event_dispatch::{
    Acknowledger, EventConsumer, EventDispatcher, LoggingAcknowledger, Projection,
    ProjectionRegistry,
};
use event_store::{
    ChannelEventBus, EventRecord, EventStorage, EventStore, InMemoryEventStorage,
    PostgresEventStorage,
};
use saga::{
    InMemorySagaStateRepository, PostgresSagaStateRepository, SagaContext, SagaHandlerRegistry,
    SagaOrchestrator, SagaStateRepository,
};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

use crate::app::Runtime;
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::gateway::CommandGateway;

/// Collects every handler and collaborator, then assembles a [`Runtime`].
///
/// Registries are only writable here. [`build`](Self::build) validates them
/// so ambiguous registrations fail at startup rather than on first use.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    commands: CommandHandlerRegistry,
    projections: ProjectionRegistry,
    sagas: SagaHandlerRegistry,
    aggregate_checks: Vec<Result<()>>,
    interceptors: Vec<Arc<dyn CommandInterceptor>>,
    storage: Option<Arc<dyn EventStorage>>,
    saga_repository: Option<Arc<dyn SagaStateRepository>>,
    acknowledger: Arc<dyn Acknowledger>,
    leader: Option<Arc<dyn LeaderSignal>>,
    cluster_mutex: Option<Arc<dyn DistributedMutex>>,
    gateway: CommandGateway,
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            commands: CommandHandlerRegistry::new(),
            projections: ProjectionRegistry::new(),
            sagas: SagaHandlerRegistry::new(),
            aggregate_checks: Vec::new(),
            interceptors: Vec::new(),
            storage: None,
            saga_repository: None,
            acknowledger: Arc::new(LoggingAcknowledger),
            leader: None,
            cluster_mutex: None,
            gateway: CommandGateway::default(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// A handle for sending commands from saga or projection handlers. It
    /// becomes usable once [`build`](Self::build) returns.
    pub fn command_gateway(&self) -> CommandGateway {
        self.gateway.clone()
    }

    /// Registers an aggregate's reconstruction handlers and returns the
    /// shared table to pass to [`register_command_handler`](Self::register_command_handler).
    pub fn register_aggregate<S: AggregateState>(
        &mut self,
        handlers: EventSourcingHandlers<S>,
    ) -> Arc<EventSourcingHandlers<S>> {
        self.aggregate_checks
            .push(handlers.validate().map_err(RuntimeError::from));
        Arc::new(handlers)
    }

    pub fn register_command_handler<S, C, F>(
        &mut self,
        handlers: &Arc<EventSourcingHandlers<S>>,
        handler: F,
    ) -> &mut Self
    where
        S: AggregateState,
        C: CommandPayload,
        F: Fn(&mut Aggregate<S>, C) -> std::result::Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.commands.register(handlers, handler);
        self
    }

    /// Registers the projection for `event_type`. At most one per type.
    pub fn register_event_handler<F, Fut>(&mut self, event_type: &str, handler: F) -> &mut Self
    where
        F: Fn(EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.projections.on(event_type, handler);
        self
    }

    pub fn register_projection(
        &mut self,
        event_type: &str,
        projection: Arc<dyn Projection>,
    ) -> &mut Self {
        self.projections.register(event_type, projection);
        self
    }

    pub fn register_saga_start<F, Fut>(
        &mut self,
        event_type: &str,
        association: &str,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(SagaContext, EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.sagas.start(event_type, association, handler);
        self
    }

    pub fn register_saga_step<F, Fut>(
        &mut self,
        event_type: &str,
        association: &str,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(SagaContext, EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.sagas.step(event_type, association, handler);
        self
    }

    pub fn register_saga_end<F, Fut>(
        &mut self,
        event_type: &str,
        association: &str,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(SagaContext, EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.sagas.end(event_type, association, handler);
        self
    }

    pub fn interceptor(&mut self, interceptor: Arc<dyn CommandInterceptor>) -> &mut Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Overrides the event storage. Without this, `DATABASE_URL` decides.
    pub fn storage(&mut self, storage: Arc<dyn EventStorage>) -> &mut Self {
        self.storage = Some(storage);
        self
    }

    pub fn saga_repository(&mut self, repository: Arc<dyn SagaStateRepository>) -> &mut Self {
        self.saga_repository = Some(repository);
        self
    }

    pub fn acknowledger(&mut self, acknowledger: Arc<dyn Acknowledger>) -> &mut Self {
        self.acknowledger = acknowledger;
        self
    }

    pub fn leader(&mut self, leader: Arc<dyn LeaderSignal>) -> &mut Self {
        self.leader = Some(leader);
        self
    }

    pub fn cluster_mutex(&mut self, mutex: Arc<dyn DistributedMutex>) -> &mut Self {
        self.cluster_mutex = Some(mutex);
        self
    }

    /// Validates every registry, connects storage and starts the event
    /// consumer.
    pub async fn build(self) -> Result<Runtime> {
        for check in self.aggregate_checks {
            check?;
        }
        self.commands.validate()?;
        self.projections.validate()?;
        self.sagas.validate()?;

        let (storage, saga_repository) = match (self.storage, self.saga_repository) {
            (Some(storage), Some(repository)) => (storage, repository),
            (storage, repository) => {
                let (default_storage, default_repository) = default_backends(&self.config).await?;
                (
                    storage.unwrap_or(default_storage),
                    repository.unwrap_or(default_repository),
                )
            }
        };

        let (bus, receiver) = ChannelEventBus::channel();
        let store = Arc::new(EventStore::new(storage, Arc::new(bus), self.config.store_config()));

        let dispatcher = self.interceptors.into_iter().fold(
            CommandDispatcher::new(
                Arc::new(self.commands),
                Arc::clone(&store),
                self.config.dispatcher_config(),
            ),
            CommandDispatcher::with_interceptor,
        );
        let dispatcher = Arc::new(dispatcher);
        self.gateway.bind(Arc::clone(&dispatcher));

        let orchestrator = SagaOrchestrator::new(
            Arc::new(self.sagas),
            Arc::clone(&saga_repository),
            self.config.saga_config(),
        );
        let events = EventDispatcher::new(
            Arc::new(self.projections),
            Arc::new(orchestrator),
            self.config.event_dispatcher_config(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer = tokio::spawn(
            EventConsumer::new(events.clone(), self.acknowledger).run(receiver, shutdown_rx),
        );

        let leader = self
            .leader
            .unwrap_or_else(|| Arc::new(StaticLeader(self.config.is_leader)));
        let cluster_mutex = self
            .cluster_mutex
            .unwrap_or_else(|| Arc::new(LocalMutex::new("runtime")));

        tracing::info!(
            event_workers = events.workers(),
            leader = leader.is_leader(),
            "runtime started"
        );

        Ok(Runtime::new(
            dispatcher,
            store,
            events,
            saga_repository,
            leader,
            cluster_mutex,
            consumer,
            shutdown_tx,
        ))
    }
}

async fn default_backends(
    config: &RuntimeConfig,
) -> Result<(Arc<dyn EventStorage>, Arc<dyn SagaStateRepository>)> {
    let Some(url) = &config.database_url else {
        tracing::info!("no DATABASE_URL, keeping events and saga state in memory");
        return Ok((
            Arc::new(InMemoryEventStorage::new()),
            Arc::new(InMemorySagaStateRepository::new()),
        ));
    };

    let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
    let storage = PostgresEventStorage::new(pool.clone());
    storage.run_migrations().await?;
    tracing::info!("connected to PostgreSQL");

    Ok((
        Arc::new(storage),
        Arc::new(PostgresSagaStateRepository::new(pool)),
    ))
}
