//! Event dispatcher.

use std::sync::Arc;
use std::time::Instant;

use event_store::EventRecord;
use saga::{SagaOrchestrator, SagaOutcome};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::{EventDispatchError, Result};
use crate::projection::ProjectionRegistry;

/// Tuning for [`EventDispatcher`].
#[derive(Debug, Clone)]
pub struct EventDispatcherConfig {
    /// Maximum number of events handled at the same time.
    pub workers: usize,
}

impl EventDispatcherConfig {
    /// Half the available parallelism, at least one.
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get() / 2)
            .unwrap_or(1)
            .max(1)
    }
}

impl Default for EventDispatcherConfig {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
        }
    }
}

/// What happened to one dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Name of the projection that handled the event, if one is registered.
    pub projection: Option<String>,
    pub saga: SagaOutcome,
}

/// Hands each published event to its projection, then to the saga
/// orchestrator, on a bounded pool of workers.
///
/// [`dispatch`](Self::dispatch) never runs handlers on the caller's task;
/// it returns a handle that resolves once both stages are done. Deciding
/// whether a failed event is retried, dead-lettered or dropped is left to
/// the caller.
#[derive(Clone)]
pub struct EventDispatcher {
    projections: Arc<ProjectionRegistry>,
    sagas: Arc<SagaOrchestrator>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl EventDispatcher {
    pub fn new(
        projections: Arc<ProjectionRegistry>,
        sagas: Arc<SagaOrchestrator>,
        config: EventDispatcherConfig,
    ) -> Self {
        let workers = config.workers.max(1);
        Self {
            projections,
            sagas,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Schedules `record` on the worker pool.
    ///
    /// The handle resolves to the dispatch outcome. Once the dispatcher is
    /// shut down, it resolves to [`EventDispatchError::Shutdown`].
    pub fn dispatch(&self, record: EventRecord) -> JoinHandle<Result<DispatchReport>> {
        let span = tracing::info_span!(
            "dispatch_event",
            event_type = %record.event_type,
            aggregate_id = %record.aggregate_id,
            version = %record.version,
        );
        let dispatcher = self.clone();

        tokio::spawn(
            async move {
                let _permit = Arc::clone(&dispatcher.permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| EventDispatchError::Shutdown)?;
                dispatcher.process(&record).await
            }
            .instrument(span),
        )
    }

    /// Runs both stages for `record` on the current task.
    pub async fn process(&self, record: &EventRecord) -> Result<DispatchReport> {
        let start = Instant::now();
        let result = self.run_stages(record).await;

        match &result {
            Ok(report) => {
                metrics::counter!("events_dispatched_total").increment(1);
                tracing::debug!(
                    projection = ?report.projection,
                    saga = ?report.saga,
                    "event dispatched"
                );
            }
            Err(error) => {
                metrics::counter!("event_dispatch_failures_total", "stage" => error.stage())
                    .increment(1);
                tracing::warn!(%error, "event dispatch failed");
            }
        }
        metrics::histogram!("event_dispatch_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        result
    }

    /// Stops accepting work and waits for in-flight events to finish.
    ///
    /// Events dispatched afterwards resolve to
    /// [`EventDispatchError::Shutdown`].
    pub async fn shutdown(&self) {
        let workers = u32::try_from(self.workers).unwrap_or(u32::MAX);
        // holding every permit means nothing is in flight
        if let Ok(all) = self.permits.acquire_many(workers).await {
            self.permits.close();
            drop(all);
        }
        tracing::info!("event dispatcher stopped");
    }

    async fn run_stages(&self, record: &EventRecord) -> Result<DispatchReport> {
        let projection = match self.projections.find(&record.event_type)? {
            Some(projection) => {
                projection
                    .handle(record)
                    .await
                    .map_err(|source| EventDispatchError::Projection {
                        projection: projection.name().to_string(),
                        event_type: record.event_type.clone(),
                        source,
                    })?;
                Some(projection.name().to_string())
            }
            None => None,
        };

        let saga = self.sagas.handle(record).await?;

        Ok(DispatchReport { projection, saga })
    }
}
