//! Saga state storage seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::SagaId;
use tokio::sync::RwLock;

use crate::{Result, SagaState};

/// Durable storage for [`SagaState`] rows, keyed by saga id.
#[async_trait]
pub trait SagaStateRepository: Send + Sync {
    /// Inserts the row, or replaces the row already stored for its saga id.
    async fn save(&self, state: &SagaState) -> Result<()>;

    async fn find(&self, saga_id: SagaId) -> Result<Option<SagaState>>;

    /// Removes the row for `saga_id`. Returns whether a row existed.
    async fn delete(&self, saga_id: SagaId) -> Result<bool>;

    /// Number of live saga instances.
    async fn count(&self) -> Result<usize>;
}

/// In-memory [`SagaStateRepository`] for tests and single-process runs.
#[derive(Clone, Default)]
pub struct InMemorySagaStateRepository {
    states: Arc<RwLock<HashMap<SagaId, SagaState>>>,
}

impl InMemorySagaStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaStateRepository for InMemorySagaStateRepository {
    async fn save(&self, state: &SagaState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(state.saga_id, state.clone());
        Ok(())
    }

    async fn find(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        Ok(self.states.read().await.get(&saga_id).cloned())
    }

    async fn delete(&self, saga_id: SagaId) -> Result<bool> {
        Ok(self.states.write().await.remove(&saga_id).is_some())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.states.read().await.len())
    }
}
