use std::sync::Arc;

use common::{AggregateId, HandlerError};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{
    Aggregate, AggregateState, Command, CommandDispatcher, CommandHandlerRegistry, CommandPayload,
    DispatcherConfig, DomainEvent, EventSourcingHandlers,
};
use event_store::{
    Event, EventRecord, EventStore, EventStoreConfig, InMemoryEventStorage, NoopEventBus, Version,
};
use serde::{Deserialize, Serialize};

#[derive(Default, Serialize, Deserialize)]
struct Counter {
    total: i64,
}

impl AggregateState for Counter {
    fn aggregate_type() -> &'static str {
        "Counter"
    }
}

#[derive(Serialize, Deserialize)]
struct Incremented {
    by: i64,
}

impl DomainEvent for Incremented {
    fn event_type() -> &'static str {
        "Incremented"
    }
}

#[derive(Serialize, Deserialize)]
struct Increment {
    counter_id: AggregateId,
    constructor: bool,
}

impl CommandPayload for Increment {
    fn command_type() -> &'static str {
        "Increment"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.counter_id
    }
}

fn handlers() -> Arc<EventSourcingHandlers<Counter>> {
    let mut handlers = EventSourcingHandlers::new();
    handlers.on(|state: &mut Counter, event: Incremented| state.total += event.by);
    Arc::new(handlers)
}

fn history(aggregate_id: AggregateId, len: i64) -> Vec<EventRecord> {
    (0..len)
        .map(|v| {
            let event = Event::new(
                "Incremented",
                aggregate_id,
                Version::new(v),
                serde_json::json!({ "by": 1 }),
            );
            EventRecord::new("Counter", Version::new(v), event)
        })
        .collect()
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain/replay");
    let handlers = handlers();

    for len in [10, 100, 1000] {
        let id = AggregateId::new();
        let records = history(id, len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &records, |b, records| {
            b.iter(|| {
                let mut aggregate = Aggregate::new(id, Arc::clone(&handlers));
                aggregate.replay(records).unwrap();
                aggregate
            });
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(EventStore::new(
        Arc::new(InMemoryEventStorage::new()),
        Arc::new(NoopEventBus),
        EventStoreConfig::default(),
    ));
    let mut registry = CommandHandlerRegistry::new();
    registry.register(&handlers(), |aggregate: &mut Aggregate<Counter>, _: Increment| {
        aggregate.apply_new(Incremented { by: 1 })?;
        Ok::<_, HandlerError>(())
    });
    let dispatcher = CommandDispatcher::new(Arc::new(registry), store, DispatcherConfig::default());

    c.bench_function("domain/dispatch_new_aggregate", |b| {
        b.iter(|| {
            rt.block_on(async {
                let payload = Increment {
                    counter_id: AggregateId::new(),
                    constructor: true,
                };
                let mut command = Command::from_payload(&payload).unwrap();
                command.constructor = payload.constructor;
                dispatcher.send(command).await.unwrap();
            });
        });
    });

    let id = AggregateId::new();
    rt.block_on(async {
        let mut seed = Command::from_payload(&Increment {
            counter_id: id,
            constructor: true,
        })
        .unwrap();
        seed.constructor = true;
        dispatcher.send(seed).await.unwrap();
    });

    c.bench_function("domain/dispatch_existing_aggregate", |b| {
        b.iter(|| {
            rt.block_on(async {
                let command = Command::from_payload(&Increment {
                    counter_id: id,
                    constructor: false,
                })
                .unwrap();
                dispatcher.send(command).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_replay, bench_dispatch);
criterion_main!(benches);
