use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    Event, EventQuery, EventStore, HistoryStore, InMemoryEventStore, InMemoryHistoryStore,
    MessageGroup, ObjectHistory, ObjectId, ProcessingState, Version,
};

fn make_event(object_id: &str, version: i64) -> Event {
    Event::fresh(
        object_id,
        Version::new(version),
        MessageGroup::GopsParcelSub,
        "<parcel><id>1</id></parcel>",
    )
}

fn bench_persist_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/persist_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                store.persist(make_event("A", 1)).await.unwrap();
            });
        });
    });
}

fn bench_merge_state_changes(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/merge_through_pipeline", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let mut event = store.persist(make_event("A", 1)).await.unwrap();
                for state in [
                    ProcessingState::Received,
                    ProcessingState::Transformed,
                    ProcessingState::Published,
                ] {
                    event.advance(state).unwrap();
                    store.find_and_merge(&event).await.unwrap();
                }
            });
        });
    });
}

fn bench_query_events(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    rt.block_on(async {
        for object in 0..10 {
            for version in 1..=100 {
                store
                    .persist(make_event(&format!("obj-{object}"), version))
                    .await
                    .unwrap();
            }
        }
    });

    c.bench_function("event_store/query_events_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .query_events(EventQuery::for_object("obj-3").from_version(Version::new(50)))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_history_purge(c: &mut Criterion) {
    c.bench_function("history/record_advance_purge_100", |b| {
        b.iter(|| {
            let mut history = ObjectHistory::new(ObjectId::new("A"));
            for version in 1..=100 {
                history.record(make_event("A", version).with_state(ProcessingState::Transformed));
            }
            for version in 1..=100 {
                history.advance_watermark(Version::new(version));
                history.purge_published();
            }
        });
    });
}

fn bench_history_merge(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut history = ObjectHistory::new(ObjectId::new("A"));
    for version in 1..=20 {
        history.record(make_event("A", version));
    }

    c.bench_function("history_store/find_and_merge_20_versions", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryHistoryStore::new();
                store.find_and_merge(&history).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_persist_single_event,
    bench_merge_state_changes,
    bench_query_events,
    bench_history_purge,
    bench_history_merge,
);
criterion_main!(benches);
