//! Hooks around command dispatch.

use async_trait::async_trait;
use common::HandlerError;

use crate::command::{Command, CommandReceipt};

/// Runs before and after every dispatched command, in registration order.
#[async_trait]
pub trait CommandInterceptor: Send + Sync {
    /// Returning an error rejects the command before any lock is taken.
    async fn pre_handle(&self, _command: &Command) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Runs after the command's events are committed.
    async fn post_handle(&self, _command: &Command, _receipt: &CommandReceipt) {}
}

/// Logs every command at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInterceptor;

#[async_trait]
impl CommandInterceptor for LoggingInterceptor {
    async fn pre_handle(&self, command: &Command) -> Result<(), HandlerError> {
        tracing::debug!(
            command_id = %command.command_id,
            command_type = %command.command_type,
            aggregate_id = %command.target_aggregate_id,
            constructor = command.constructor,
            "dispatching command"
        );
        Ok(())
    }

    async fn post_handle(&self, command: &Command, receipt: &CommandReceipt) {
        tracing::debug!(
            command_id = %command.command_id,
            version = %receipt.version,
            events = receipt.events,
            "command committed"
        );
    }
}
