//! Command dispatcher.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{AggregateId, LockCache};
use event_store::EventStore;
use tokio::task::JoinHandle;

use crate::command::{Command, CommandReceipt};
use crate::error::DispatchError;
use crate::interceptor::CommandInterceptor;
use crate::registry::CommandHandlerRegistry;

/// Tuning for [`CommandDispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of per-aggregate locks kept resident. Size it to at least the
    /// number of aggregates expected to be busy at the same time.
    pub lock_capacity: NonZeroUsize,
    /// How long a command waits for its aggregate's lock.
    pub lock_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lock_capacity: NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Routes commands to their handlers, one command per aggregate at a time.
///
/// For each command the dispatcher:
/// 1. runs the pre-handle interceptors
/// 2. looks up the single handler for the command type
/// 3. locks the target aggregate id
/// 4. constructs the aggregate fresh, or replays it from the store
/// 5. invokes the handler and appends the events it produced, expecting the
///    version the aggregate had before the handler ran
/// 6. marks the events committed and runs the post-handle interceptors
///
/// The lock is released whether the command succeeds or fails.
pub struct CommandDispatcher {
    registry: Arc<CommandHandlerRegistry>,
    store: Arc<EventStore>,
    interceptors: Vec<Arc<dyn CommandInterceptor>>,
    locks: LockCache<AggregateId>,
    lock_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<CommandHandlerRegistry>,
        store: Arc<EventStore>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            store,
            interceptors: Vec::new(),
            locks: LockCache::new("command_dispatcher", config.lock_capacity),
            lock_timeout: config.lock_timeout,
        }
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn CommandInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Dispatches a command and waits for the outcome.
    #[tracing::instrument(
        skip(self, command),
        fields(
            command_id = %command.command_id,
            command_type = %command.command_type,
            aggregate_id = %command.target_aggregate_id,
        )
    )]
    pub async fn send(&self, command: Command) -> Result<CommandReceipt, DispatchError> {
        let start = Instant::now();
        let result = self.dispatch(&command).await;

        match &result {
            Ok(receipt) => {
                metrics::counter!("commands_dispatched_total").increment(1);
                tracing::info!(
                    version = %receipt.version,
                    events = receipt.events,
                    "command handled"
                );
            }
            Err(error) => {
                metrics::counter!("commands_failed_total", "kind" => error.kind()).increment(1);
                if error.is_retryable() {
                    tracing::info!(%error, "command failed, retryable");
                } else {
                    tracing::warn!(%error, "command failed");
                }
            }
        }
        metrics::histogram!("command_duration_seconds").record(start.elapsed().as_secs_f64());

        result
    }

    /// Dispatches a command in the background and hands the outcome to
    /// `callback`. Errors reach the callback, never the caller.
    pub fn send_async<F>(self: &Arc<Self>, command: Command, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Command, Result<CommandReceipt, DispatchError>) + Send + 'static,
    {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let result = dispatcher.send(command.clone()).await;
            callback(command, result);
        })
    }

    async fn dispatch(&self, command: &Command) -> Result<CommandReceipt, DispatchError> {
        for interceptor in &self.interceptors {
            interceptor
                .pre_handle(command)
                .await
                .map_err(|reason| DispatchError::Rejected {
                    command_type: command.command_type.clone(),
                    reason,
                })?;
        }

        let executor = self.registry.lookup(&command.command_type)?;

        let _guard = self
            .locks
            .acquire(&command.target_aggregate_id, self.lock_timeout)
            .await?;

        let execution = executor.execute(command, &self.store).await?;
        let receipt = CommandReceipt {
            command_id: command.command_id,
            aggregate_id: command.target_aggregate_id,
            version: execution.version,
            events: execution.events,
        };

        for interceptor in &self.interceptors {
            interceptor.post_handle(command, &receipt).await;
        }

        Ok(receipt)
    }
}
