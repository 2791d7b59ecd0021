//! Event-sourced aggregate and its reconstruction handlers.

use std::sync::Arc;

use common::{AggregateId, HandlerRegistry};
use event_store::{Event, EventRecord, Snapshot, Version};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::AggregateError;

/// Domain fields of an aggregate.
///
/// The runtime owns id, version and the uncommitted buffer; implementors
/// only hold what their reconstruction handlers fold events into.
pub trait AggregateState: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Aggregate type name, stored with every record.
    fn aggregate_type() -> &'static str;

    /// Take a snapshot every `n` events. `None` disables snapshots.
    fn snapshot_interval() -> Option<u64> {
        None
    }
}

/// A fact that happened in the domain. Named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Event type name used for routing and storage.
    fn event_type() -> &'static str;
}

type ApplyFn<S> =
    Box<dyn Fn(&mut S, &serde_json::Value) -> Result<(), serde_json::Error> + Send + Sync>;

/// Reconstruction handlers of one aggregate type, keyed by event type.
///
/// Events without a handler are accepted and leave the state untouched.
pub struct EventSourcingHandlers<S> {
    handlers: HandlerRegistry<ApplyFn<S>>,
}

impl<S: AggregateState> EventSourcingHandlers<S> {
    pub fn new() -> Self {
        Self {
            handlers: HandlerRegistry::new("event-sourcing"),
        }
    }

    /// Registers how `E` changes the state.
    pub fn on<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: DomainEvent,
        F: Fn(&mut S, E) + Send + Sync + 'static,
    {
        let apply: ApplyFn<S> = Box::new(move |state, payload| {
            let event = E::deserialize(payload)?;
            handler(state, event);
            Ok(())
        });
        self.handlers.register(E::event_type(), apply);
        self
    }

    /// Applies an event to `state`. Returns `false` when no handler is
    /// registered for `event_type`.
    pub fn apply(
        &self,
        state: &mut S,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<bool, AggregateError> {
        match self.handlers.find(event_type)? {
            Some(apply) => {
                apply(state, payload)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Fails if an event type has more than one handler.
    pub fn validate(&self) -> Result<(), AggregateError> {
        Ok(self.handlers.validate()?)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.message_types()
    }
}

impl<S: AggregateState> Default for EventSourcingHandlers<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// The unit of consistency: state rebuilt from its events.
///
/// An aggregate is fresh (version -1, nothing buffered) until it applies
/// its first event. [`apply_new`](Self::apply_new) records a new fact and
/// buffers it for persistence; [`replay`](Self::replay) rebuilds state from
/// history without buffering.
pub struct Aggregate<S: AggregateState> {
    id: AggregateId,
    version: Version,
    state: S,
    uncommitted: Vec<Event>,
    handlers: Arc<EventSourcingHandlers<S>>,
}

impl<S: AggregateState> Aggregate<S> {
    pub fn new(id: AggregateId, handlers: Arc<EventSourcingHandlers<S>>) -> Self {
        Self {
            id,
            version: Version::initial(),
            state: S::default(),
            uncommitted: Vec::new(),
            handlers,
        }
    }

    /// Rebuilds an aggregate from a snapshot. Events after the snapshot
    /// still have to be replayed.
    pub fn restore(
        snapshot: Snapshot,
        handlers: Arc<EventSourcingHandlers<S>>,
    ) -> Result<Self, AggregateError> {
        let id = snapshot.aggregate_id;
        let version = snapshot.version;
        Ok(Self {
            id,
            version,
            state: snapshot.into_state()?,
            uncommitted: Vec::new(),
            handlers,
        })
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Version of the last applied event, persisted or not.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Version before any uncommitted event. This is the version the store
    /// must still be at for the buffered events to be appended.
    pub fn committed_version(&self) -> Version {
        Version::new(self.version.as_i64() - self.uncommitted.len() as i64)
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn is_fresh(&self) -> bool {
        self.version.is_initial() && self.uncommitted.is_empty()
    }

    /// Records a new fact. If the reconstruction handler fails the event is
    /// neither applied nor buffered.
    pub fn apply_new<E: DomainEvent>(&mut self, event: E) -> Result<(), AggregateError> {
        let payload = serde_json::to_value(&event)?;
        self.apply_new_raw(E::event_type(), payload)
    }

    /// Untyped [`apply_new`](Self::apply_new).
    pub fn apply_new_raw(
        &mut self,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), AggregateError> {
        self.handlers.apply(&mut self.state, event_type, &payload)?;
        self.version = self.version.next();
        self.uncommitted
            .push(Event::new(event_type, self.id, self.version, payload));
        Ok(())
    }

    /// Folds persisted history into the state. `records` must continue
    /// exactly where the aggregate's version stands.
    pub fn replay(&mut self, records: &[EventRecord]) -> Result<(), AggregateError> {
        for record in records {
            let expected = self.version.next();
            if record.version != expected {
                return Err(AggregateError::VersionGap {
                    aggregate_id: self.id,
                    expected,
                    found: record.version,
                });
            }
            self.handlers
                .apply(&mut self.state, &record.event_type, &record.payload)?;
            self.version = record.version;
        }
        Ok(())
    }

    pub fn uncommitted_events(&self) -> &[Event] {
        &self.uncommitted
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Hands over the buffered events, leaving the buffer empty.
    pub fn take_uncommitted(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.uncommitted)
    }

    /// Drops the buffered events once they are persisted.
    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
    }

    pub fn snapshot(&self) -> Result<Snapshot, AggregateError> {
        Ok(Snapshot::from_state(
            self.id,
            S::aggregate_type(),
            self.version,
            &self.state,
        )?)
    }
}

impl<S: AggregateState + std::fmt::Debug> std::fmt::Debug for Aggregate<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregate")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("uncommitted", &self.uncommitted.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Tally {
        total: i64,
        entries: u32,
    }

    impl AggregateState for Tally {
        fn aggregate_type() -> &'static str {
            "Tally"
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Added {
        amount: i64,
    }

    impl DomainEvent for Added {
        fn event_type() -> &'static str {
            "Added"
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Annotated {
        note: String,
    }

    impl DomainEvent for Annotated {
        fn event_type() -> &'static str {
            "Annotated"
        }
    }

    fn handlers() -> Arc<EventSourcingHandlers<Tally>> {
        let mut handlers = EventSourcingHandlers::new();
        handlers.on(|state: &mut Tally, event: Added| {
            state.total += event.amount;
            state.entries += 1;
        });
        Arc::new(handlers)
    }

    fn persist(aggregate: &mut Aggregate<Tally>) -> Vec<EventRecord> {
        aggregate
            .take_uncommitted()
            .into_iter()
            .map(|event| EventRecord::new("Tally", event.version, event))
            .collect()
    }

    #[test]
    fn fresh_aggregate_has_initial_version() {
        let aggregate = Aggregate::new(AggregateId::new(), handlers());

        assert!(aggregate.is_fresh());
        assert_eq!(aggregate.version(), Version::initial());
        assert!(!aggregate.has_uncommitted());
    }

    #[test]
    fn apply_new_buffers_and_increments_version() {
        let mut aggregate = Aggregate::new(AggregateId::new(), handlers());

        aggregate.apply_new(Added { amount: 5 }).unwrap();
        aggregate.apply_new(Added { amount: 7 }).unwrap();

        assert_eq!(aggregate.version(), Version::new(1));
        assert_eq!(aggregate.committed_version(), Version::initial());
        assert_eq!(aggregate.state().total, 12);
        let versions: Vec<_> = aggregate
            .uncommitted_events()
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![Version::first(), Version::new(1)]);
    }

    #[test]
    fn replay_of_n_events_reaches_version_n_minus_one() {
        let id = AggregateId::new();
        let mut source = Aggregate::new(id, handlers());
        for amount in 1..=10 {
            source.apply_new(Added { amount }).unwrap();
        }
        let history = persist(&mut source);

        let mut rebuilt = Aggregate::new(id, handlers());
        rebuilt.replay(&history).unwrap();

        assert_eq!(rebuilt.version(), Version::new(9));
        assert_eq!(rebuilt.state(), source.state());
        assert!(rebuilt.take_uncommitted().is_empty());
    }

    #[test]
    fn events_without_handler_are_no_ops() {
        let mut aggregate = Aggregate::new(AggregateId::new(), handlers());

        aggregate
            .apply_new(Annotated {
                note: "ignored".to_string(),
            })
            .unwrap();

        assert_eq!(aggregate.state(), &Tally::default());
        assert_eq!(aggregate.version(), Version::first());
        assert_eq!(aggregate.uncommitted_events().len(), 1);
    }

    #[test]
    fn failed_apply_leaves_aggregate_untouched() {
        let mut aggregate = Aggregate::new(AggregateId::new(), handlers());

        let result = aggregate.apply_new_raw("Added", serde_json::json!({"amount": "five"}));

        assert!(matches!(result, Err(AggregateError::Serialization(_))));
        assert!(aggregate.is_fresh());
    }

    #[test]
    fn replay_rejects_gaps() {
        let id = AggregateId::new();
        let mut source = Aggregate::new(id, handlers());
        for amount in 0..3 {
            source.apply_new(Added { amount }).unwrap();
        }
        let mut history = persist(&mut source);
        history.remove(1);

        let mut rebuilt = Aggregate::new(id, handlers());
        let result = rebuilt.replay(&history);

        assert!(matches!(
            result,
            Err(AggregateError::VersionGap { expected, found, .. })
                if expected == Version::new(1) && found == Version::new(2)
        ));
    }

    #[test]
    fn snapshot_then_tail_matches_full_replay() {
        let id = AggregateId::new();
        let mut source = Aggregate::new(id, handlers());
        for amount in 0..6 {
            source.apply_new(Added { amount }).unwrap();
        }
        let history = persist(&mut source);

        let mut partial = Aggregate::new(id, handlers());
        partial.replay(&history[..4]).unwrap();
        let snapshot = partial.snapshot().unwrap();

        let mut restored = Aggregate::restore(snapshot, handlers()).unwrap();
        restored.replay(&history[4..]).unwrap();

        assert_eq!(restored.version(), source.version());
        assert_eq!(restored.state(), source.state());
    }

    #[test]
    fn mark_committed_clears_buffer() {
        let mut aggregate = Aggregate::new(AggregateId::new(), handlers());
        aggregate.apply_new(Added { amount: 1 }).unwrap();

        aggregate.mark_committed();

        assert!(!aggregate.has_uncommitted());
        assert_eq!(aggregate.committed_version(), Version::first());
    }

    #[test]
    fn duplicate_reconstruction_handlers_fail_validation() {
        let mut handlers = EventSourcingHandlers::<Tally>::new();
        handlers.on(|_: &mut Tally, _: Added| {});
        handlers.on(|_: &mut Tally, _: Added| {});

        assert!(handlers.validate().is_err());
        let mut state = Tally::default();
        assert!(matches!(
            handlers.apply(&mut state, "Added", &serde_json::json!({"amount": 1})),
            Err(AggregateError::Registry(_))
        ));
    }
}
