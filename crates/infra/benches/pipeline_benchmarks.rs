use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use courier_core::{EntityId, ManualClock, UserId};
use courier_events::{EventPayload, NewEvent, OrderDelivered};
use courier_infra::directory::{InMemoryUserDirectory, UserProfile};
use courier_infra::jobs::{ImmediateDispatch, Mailer, RecordingProvider};
use courier_infra::pipeline::{Pipeline, PipelineSettings};
use courier_infra::runner::RunRequest;
use courier_infra::store::InMemoryDocumentStore;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn pipeline(recipients: usize) -> Pipeline {
    let directory = Arc::new(InMemoryUserDirectory::new());
    for i in 0..recipients {
        directory.insert(
            UserId::new(format!("user-{i}")).unwrap(),
            UserProfile::new(format!("user-{i}@example.com")),
        );
    }
    Pipeline::build(
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(ManualClock::default()),
        directory,
        Mailer::configured(RecordingProvider::new()),
        &PipelineSettings {
            immediate_dispatch: ImmediateDispatch::Off,
            ..Default::default()
        },
    )
}

fn delivered(order: usize, recipients: usize) -> NewEvent {
    NewEvent::new(
        "order",
        EntityId::new(format!("O{order}")).unwrap(),
        EventPayload::OrderDelivered(OrderDelivered {
            order_id: format!("O{order}"),
            listing_title: "Desk lamp".into(),
        }),
    )
    .with_targets((0..recipients).map(|i| UserId::new(format!("user-{i}")).unwrap()))
}

fn bench_emit(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("emit");

    group.bench_function("fresh_event", |b| {
        let pipeline = pipeline(1);
        let mut order = 0;
        b.iter(|| {
            order += 1;
            rt.block_on(pipeline.emitter.emit(black_box(delivered(order, 1))))
                .unwrap()
        });
    });

    group.bench_function("duplicate_event", |b| {
        let pipeline = pipeline(1);
        rt.block_on(pipeline.emitter.emit(delivered(0, 1))).unwrap();
        b.iter(|| {
            rt.block_on(pipeline.emitter.emit(black_box(delivered(0, 1))))
                .unwrap()
        });
    });

    group.finish();
}

fn bench_full_run(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("pipeline_run");
    group.sample_size(20);

    for recipients in [1usize, 10, 50] {
        group.throughput(Throughput::Elements(recipients as u64));
        group.bench_with_input(
            BenchmarkId::new("emit_process_send", recipients),
            &recipients,
            |b, &recipients| {
                b.iter(|| {
                    let pipeline = pipeline(recipients);
                    rt.block_on(async {
                        pipeline.emitter.emit(delivered(1, recipients)).await.unwrap();
                        black_box(pipeline.runner.run(RunRequest::default()).await)
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_emit, bench_full_run);
criterion_main!(benches);
