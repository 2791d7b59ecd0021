//! Commands and the receipt returned for them.

use common::{AggregateId, CommandId};
use event_store::Version;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// A typed command payload.
///
/// Commands express an intention against one aggregate and may be refused.
pub trait CommandPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Command type name used for routing.
    fn command_type() -> &'static str;

    /// The aggregate this command targets.
    fn aggregate_id(&self) -> AggregateId;

    /// Constructor commands create a new aggregate instead of loading one.
    fn is_constructor() -> bool {
        false
    }
}

/// A command as the dispatcher sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command_id: CommandId,
    pub command_type: String,
    pub target_aggregate_id: AggregateId,
    /// Create a new aggregate (no replay) rather than mutate an existing one.
    pub constructor: bool,
    pub payload: serde_json::Value,
}

impl Command {
    pub fn new(
        command_type: impl Into<String>,
        target_aggregate_id: AggregateId,
        constructor: bool,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            command_id: CommandId::new(),
            command_type: command_type.into(),
            target_aggregate_id,
            constructor,
            payload,
        }
    }

    /// Wraps a typed payload, taking routing data from its [`CommandPayload`] impl.
    pub fn from_payload<C: CommandPayload>(payload: &C) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            C::command_type(),
            payload.aggregate_id(),
            C::is_constructor(),
            serde_json::to_value(payload)?,
        ))
    }

    pub fn payload_as<C: DeserializeOwned>(&self) -> Result<C, serde_json::Error> {
        C::deserialize(&self.payload)
    }
}

/// Outcome of a successfully dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandReceipt {
    pub command_id: CommandId,
    pub aggregate_id: AggregateId,
    /// Version the aggregate reached. Equals the prior version when the
    /// handler produced no events.
    pub version: Version,
    /// Number of events the command committed.
    pub events: usize,
}
