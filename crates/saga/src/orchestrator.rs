//! Saga orchestrator.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{LockCache, SagaId};
use event_store::EventRecord;

use crate::association::resolve_saga_id;
use crate::context::SagaContext;
use crate::registry::{SagaHandlerRegistry, SagaStage};
use crate::{Result, SagaError, SagaState, SagaStateRepository};

/// Tuning for [`SagaOrchestrator`].
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Number of per-saga locks kept resident.
    pub lock_capacity: NonZeroUsize,
    pub lock_timeout: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            lock_capacity: NonZeroUsize::new(10_000).unwrap_or(NonZeroUsize::MIN),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// What [`SagaOrchestrator::handle`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaOutcome {
    /// No saga handler is registered for the event type.
    Ignored,
    /// A start handler ran and the saga's state row was written.
    Started(SagaId),
    /// A step handler ran. The state row is left as the handler left it.
    Stepped(SagaId),
    /// An end handler ran and the saga's state row was removed.
    Ended(SagaId),
}

impl SagaOutcome {
    pub fn saga_id(&self) -> Option<SagaId> {
        match self {
            Self::Ignored => None,
            Self::Started(id) | Self::Stepped(id) | Self::Ended(id) => Some(*id),
        }
    }
}

/// Routes events to saga handlers, one step per saga instance at a time.
///
/// The orchestrator keeps no saga state in memory between events; the
/// [`SagaStateRepository`] is the only record of which sagas are live.
pub struct SagaOrchestrator {
    registry: Arc<SagaHandlerRegistry>,
    repository: Arc<dyn SagaStateRepository>,
    locks: LockCache<SagaId>,
    lock_timeout: Duration,
}

impl SagaOrchestrator {
    pub fn new(
        registry: Arc<SagaHandlerRegistry>,
        repository: Arc<dyn SagaStateRepository>,
        config: SagaConfig,
    ) -> Self {
        Self {
            registry,
            repository,
            locks: LockCache::new("saga_orchestrator", config.lock_capacity),
            lock_timeout: config.lock_timeout,
        }
    }

    pub fn repository(&self) -> &Arc<dyn SagaStateRepository> {
        &self.repository
    }

    /// Runs the saga handler registered for `record`'s event type, if any.
    #[tracing::instrument(
        skip(self, record),
        fields(
            event_type = %record.event_type,
            aggregate_id = %record.aggregate_id,
            saga_id = tracing::field::Empty,
        )
    )]
    pub async fn handle(&self, record: &EventRecord) -> Result<SagaOutcome> {
        let start = Instant::now();
        let result = self.route(record).await;

        match &result {
            Ok(SagaOutcome::Ignored) => {}
            Ok(outcome) => {
                let kind = match outcome {
                    SagaOutcome::Started(_) => SagaStage::Start,
                    SagaOutcome::Ended(_) => SagaStage::End,
                    _ => SagaStage::Step,
                };
                metrics::counter!("saga_steps_total", "kind" => kind.as_str()).increment(1);
                metrics::histogram!("saga_step_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::debug!(?outcome, "saga step completed");
            }
            Err(error) => {
                metrics::counter!("saga_failures_total").increment(1);
                tracing::warn!(%error, "saga step failed");
            }
        }

        result
    }

    async fn route(&self, record: &EventRecord) -> Result<SagaOutcome> {
        let Some((stage, route)) = self.registry.resolve(&record.event_type)? else {
            return Ok(SagaOutcome::Ignored);
        };

        let saga_id = resolve_saga_id(record, route.association())?;
        tracing::Span::current().record("saga_id", tracing::field::display(saga_id));

        let _guard = self.locks.acquire(&saga_id, self.lock_timeout).await?;

        let state = self.repository.find(saga_id).await?;
        let context = SagaContext::new(saga_id, stage, state, Arc::clone(&self.repository));

        (route.handler())(context, record.clone())
            .await
            .map_err(|source| SagaError::Handler {
                event_type: record.event_type.clone(),
                saga_id,
                source,
            })?;

        let outcome = match stage {
            SagaStage::Start => {
                let state = SagaState::new(saga_id, &record.event_type, record.payload.clone());
                self.repository.save(&state).await?;
                SagaOutcome::Started(saga_id)
            }
            SagaStage::End => {
                if !self.repository.delete(saga_id).await? {
                    tracing::debug!(%saga_id, "saga ended without a stored state");
                }
                SagaOutcome::Ended(saga_id)
            }
            SagaStage::Step => SagaOutcome::Stepped(saga_id),
        };

        Ok(outcome)
    }
}
