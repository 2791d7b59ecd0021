//! Late-bound command access for event-side handlers.

use std::sync::{Arc, OnceLock};

use common::HandlerError;
use domain::{Command, CommandDispatcher, CommandPayload, CommandReceipt};

/// Sends commands from saga and projection handlers.
///
/// Handlers are registered before the dispatcher exists, so they capture a
/// gateway that [`RuntimeBuilder::build`](crate::RuntimeBuilder::build)
/// binds to the dispatcher once it is assembled.
#[derive(Clone, Default)]
pub struct CommandGateway {
    dispatcher: Arc<OnceLock<Arc<CommandDispatcher>>>,
}

impl CommandGateway {
    pub(crate) fn bind(&self, dispatcher: Arc<CommandDispatcher>) {
        if self.dispatcher.set(dispatcher).is_err() {
            tracing::warn!("command gateway already bound, keeping the first dispatcher");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.dispatcher.get().is_some()
    }

    /// Dispatches `command`, reporting failures as handler errors so saga
    /// steps can propagate them with `?`.
    pub async fn send(&self, command: Command) -> Result<CommandReceipt, HandlerError> {
        let dispatcher = self
            .dispatcher
            .get()
            .ok_or_else(|| {
                HandlerError::rejected("command gateway used before the runtime was built")
            })?;
        dispatcher.send(command).await.map_err(HandlerError::other)
    }

    /// Wraps `payload` and dispatches it.
    pub async fn send_payload<C: CommandPayload>(
        &self,
        payload: &C,
    ) -> Result<CommandReceipt, HandlerError> {
        self.send(Command::from_payload(payload)?).await
    }
}
