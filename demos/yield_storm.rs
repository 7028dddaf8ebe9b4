use std::time::{Duration, Instant};

fn main() {
    // A thousand greenlets doing nothing but yielding, while one measures
    // how far the runtime drifts from a requested 1 ms offload sleep.
    for _ in 0..1000 {
        tin::spawn(|| loop {
            tin::yield_now();
        });
    }

    tin::block_on(|| {
        let mut accum = 1.0;
        for iter in 0u64.. {
            let start = Instant::now();
            tin::submit_blocking(|| std::thread::sleep(Duration::from_millis(1)));
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            accum = accum * 0.99 + elapsed_ms * 0.01;
            if iter % 1000 == 0 {
                eprintln!("drift {} µs", (accum - 1.0) * 1000.0)
            }
        }
    })
}
