//! Bus consumer feeding the event dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use event_store::{EventReceiver, EventRecord};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::dispatcher::{DispatchReport, EventDispatcher};
use crate::error::EventDispatchError;

/// Settles each delivered event once its dispatch completes.
///
/// This is where retry and dead-letter policy lives; the dispatcher only
/// reports success or failure.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, record: &EventRecord, report: &DispatchReport);

    async fn reject(&self, record: &EventRecord, error: &EventDispatchError);
}

/// Logs outcomes and drops failed events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAcknowledger;

#[async_trait]
impl Acknowledger for LoggingAcknowledger {
    async fn ack(&self, record: &EventRecord, _report: &DispatchReport) {
        tracing::trace!(event_id = %record.id, "event acknowledged");
    }

    async fn reject(&self, record: &EventRecord, error: &EventDispatchError) {
        tracing::error!(
            event_id = %record.id,
            event_type = %record.event_type,
            aggregate_id = %record.aggregate_id,
            %error,
            "event dropped after failed dispatch"
        );
    }
}

/// Reads records off the bus and hands them to the [`EventDispatcher`].
///
/// The receive loop never waits on handlers: each record is scheduled on
/// the dispatcher's pool and settled by a separate task.
pub struct EventConsumer {
    dispatcher: EventDispatcher,
    acknowledger: Arc<dyn Acknowledger>,
}

impl EventConsumer {
    pub fn new(dispatcher: EventDispatcher, acknowledger: Arc<dyn Acknowledger>) -> Self {
        Self {
            dispatcher,
            acknowledger,
        }
    }

    /// Consumes until the bus closes or `shutdown` flips to `true`, then
    /// settles until quiescent: records already queued are dispatched, and
    /// so are records that in-flight handlers commit while finishing, until
    /// nothing is queued or running. Returns the number of records consumed.
    pub async fn run(
        self,
        mut receiver: EventReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut in_flight = JoinSet::new();
        let mut consumed = 0;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = receiver.recv() => {
                    let Some(record) = next else { break };
                    consumed += 1;
                    self.schedule(&mut in_flight, record);
                }
                // reap settled tasks so the set does not grow unbounded
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        // a saga step still running may commit follow-up events
        loop {
            while let Some(record) = receiver.try_recv() {
                consumed += 1;
                self.schedule(&mut in_flight, record);
            }
            if in_flight.is_empty() {
                break;
            }
            while in_flight.join_next().await.is_some() {}
        }

        tracing::info!(consumed, "event consumer stopped");
        consumed
    }

    fn schedule(&self, in_flight: &mut JoinSet<()>, record: EventRecord) {
        let completion = self.dispatcher.dispatch(record.clone());
        let acknowledger = Arc::clone(&self.acknowledger);
        in_flight.spawn(async move {
            match completion.await.map_err(EventDispatchError::from).and_then(|r| r) {
                Ok(report) => acknowledger.ack(&record, &report).await,
                Err(error) => acknowledger.reject(&record, &error).await,
            }
        });
    }
}
