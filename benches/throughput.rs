use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use livesync::replay::{CountingReceiver, DeliveryStats};
use livesync::{Dispatcher, SliceRanges, SyncContext};
use serde_json::json;
use std::collections::HashMap;
use std::hint::black_box;
use std::sync::Arc;

// Fan-out cost of one timeline event to every joined subscriber of a room,
// plus the range bookkeeping a sliding window does per request.

fn dispatch_fanout_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let ctx = SyncContext::default();

    for members in [10usize, 100, 1000] {
        let dispatcher = Dispatcher::new();
        let stats = Arc::new(DeliveryStats::default());
        let users: Vec<String> = (0..members).map(|i| format!("@user{i}:example.org")).collect();
        let snapshot = HashMap::from([("!bench:example.org".to_string(), users.clone())]);
        dispatcher.startup(&snapshot).unwrap();
        for user in &users {
            dispatcher
                .register(&ctx, user, Arc::new(CountingReceiver::new(Arc::clone(&stats))))
                .unwrap();
        }

        let event = json!({
            "type": "m.room.message",
            "event_id": "$bench",
            "sender": "@user0:example.org",
            "content": {"msgtype": "m.text", "body": "Hello world"},
        });

        group.throughput(Throughput::Elements(members as u64));
        group.bench_function(format!("fanout_{members}"), |b| {
            b.iter(|| {
                dispatcher.on_new_event(&ctx, "!bench:example.org", black_box(event.clone()), 1)
            })
        });
    }

    group.finish();
}

fn range_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ranges");
    let rooms: Vec<u32> = (0..10_000).collect();
    let prev = SliceRanges::new(vec![[0, 20], [100, 200], [5000, 5100]]);
    let next = SliceRanges::new(vec![[0, 25], [150, 250], [9000, 9100]]);

    group.bench_function("delta", |b| b.iter(|| black_box(&prev).delta(black_box(&next))));
    group.bench_function("slice_into", |b| {
        b.iter(|| black_box(&next).slice_into(black_box(rooms.as_slice())))
    });

    group.finish();
}

criterion_group!(benches, dispatch_fanout_benchmark, range_benchmark);
criterion_main!(benches);
