use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::mpsc;

use loophost::host::{HostLifetime, ServiceRegistry};
use loophost::runloop::{QueueToolkit, RunLoopOptions, RunLoopThreadBridge};
use tokio_util::sync::CancellationToken;

fn bench_dispatch(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let bridge = RunLoopThreadBridge::new(
        QueueToolkit::new(4096),
        RunLoopOptions {
            thread_name: "bench-loop".to_string(),
            lifetime_linked: false,
            require_shell: false,
        },
        Arc::new(HostLifetime::new("Bench")),
        Arc::new(ServiceRegistry::new()),
    );
    bridge.start().expect("start");
    while !bridge.is_running() {
        std::thread::yield_now();
    }

    let mut group = c.benchmark_group("dispatch");
    for batch in [1u64, 64, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                let (done_tx, done_rx) = mpsc::channel();
                for i in 0..batch {
                    bridge
                        .dispatch(move |ctx| {
                            black_box(ctx.processed() + i);
                        })
                        .expect("dispatch");
                }
                bridge
                    .dispatch(move |_| {
                        let _ = done_tx.send(());
                    })
                    .expect("dispatch");
                done_rx.recv().expect("loop alive");
            })
        });
    }
    group.finish();

    runtime
        .block_on(bridge.shutdown(CancellationToken::new()))
        .expect("shutdown");
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
