use criterion::{criterion_group, criterion_main, Criterion};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

const TASKS: usize = 300;
const STEPS: usize = 300;
const LIGHT_TASKS: usize = 25_000;

fn spawn_one(b: &mut criterion::Bencher) {
    b.iter(move || {
        tin::block_on(|| {});
    });
}

fn spawn_many(b: &mut criterion::Bencher) {
    b.iter(move || {
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..LIGHT_TASKS)
            .map(|_| {
                let counter = counter.clone();
                tin::spawn(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();
        for h in handles {
            h.join();
        }
        assert_eq!(counter.load(Ordering::Relaxed), LIGHT_TASKS);
    });
}

fn yield_now(b: &mut criterion::Bencher) {
    b.iter(move || {
        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                tin::spawn(move || {
                    for _ in 0..STEPS {
                        tin::yield_now();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join();
        }
    });
}

fn ping_pong(b: &mut criterion::Bencher) {
    const NUM_PINGS: usize = 1_000;
    b.iter(move || {
        let mailbox: Arc<Mutex<Option<tin::GreenletRef>>> = Arc::new(Mutex::new(None));
        let server = {
            let mailbox = mailbox.clone();
            tin::spawn(move || {
                for _ in 0..NUM_PINGS {
                    let me = tin::current();
                    tin::park_with(|| {
                        mailbox.lock().replace(me);
                        true
                    });
                }
            })
        };
        let client = {
            let mailbox = mailbox.clone();
            tin::spawn(move || {
                for _ in 0..NUM_PINGS {
                    loop {
                        if let Some(peer) = mailbox.lock().take() {
                            tin::ready(peer);
                            break;
                        }
                        tin::yield_now();
                    }
                }
            })
        };
        client.join();
        server.join();
    });
}

fn offload_round_trip(b: &mut criterion::Bencher) {
    b.iter(move || {
        tin::block_on(|| tin::submit_blocking(|| 1 + 1));
    });
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("spawn_one", spawn_one);
    c.bench_function("spawn_many", spawn_many);
    c.bench_function("yield_now", yield_now);
    c.bench_function("ping_pong", ping_pong);
    c.bench_function("offload_round_trip", offload_round_trip);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
