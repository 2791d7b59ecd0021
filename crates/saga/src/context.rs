use std::sync::Arc;

use common::SagaId;

use crate::{Result, SagaStage, SagaState, SagaStateRepository};

/// What a saga handler knows about the instance it runs for.
///
/// Handlers run while the orchestrator holds the saga's lock, so reads and
/// writes through the context are not interleaved with other steps of the
/// same saga.
#[derive(Clone)]
pub struct SagaContext {
    saga_id: SagaId,
    stage: SagaStage,
    state: Option<SagaState>,
    repository: Arc<dyn SagaStateRepository>,
}

impl SagaContext {
    pub(crate) fn new(
        saga_id: SagaId,
        stage: SagaStage,
        state: Option<SagaState>,
        repository: Arc<dyn SagaStateRepository>,
    ) -> Self {
        Self {
            saga_id,
            stage,
            state,
            repository,
        }
    }

    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    pub fn stage(&self) -> SagaStage {
        self.stage
    }

    /// The persisted row as it was when the handler was invoked.
    pub fn state(&self) -> Option<&SagaState> {
        self.state.as_ref()
    }

    /// Records progress from a step handler, creating the row if the saga
    /// has none yet.
    pub async fn record_step(
        &mut self,
        step_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<()> {
        let state = match &self.state {
            Some(current) => {
                let mut next = current.clone();
                next.advance(step_name, payload);
                next
            }
            None => SagaState::new(self.saga_id, step_name, payload),
        };
        self.repository.save(&state).await?;
        self.state = Some(state);
        Ok(())
    }
}
