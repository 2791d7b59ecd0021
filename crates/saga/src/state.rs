//! Persisted saga state.

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// One row per live saga instance.
///
/// Written when a start handler succeeds, removed when an end handler
/// succeeds. A saga without an end handler keeps its row indefinitely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaState {
    /// Storage identifier of the row.
    pub id: Uuid,
    pub saga_id: SagaId,
    /// Event type of the step that last wrote the row.
    pub step_name: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl SagaState {
    pub fn new(saga_id: SagaId, step_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            saga_id,
            step_name: step_name.into(),
            payload,
            updated_at: Utc::now(),
        }
    }

    /// Deserializes the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Replaces the step and payload, keeping the row identity.
    pub fn advance(&mut self, step_name: impl Into<String>, payload: serde_json::Value) {
        self.step_name = step_name.into();
        self.payload = payload;
        self.updated_at = Utc::now();
    }
}
