//! # Pool Benchmark
//!
//! Drives SET/GET pairs from several threads through one shared pool so pool
//! contention and connection reuse can be compared across settings.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Each worker uses a fixed PRNG seed.
//! 2. **Allocation Control**: Keys and values are pre-built per worker.
//! 3. **Shared Pool**: Workers borrow one pool; nothing else is shared.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use kvpool_client::{Client, ClientError, Pool};

const KEY_SPACE: usize = 1 << 10;
const VALUE_SIZE: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct BenchReport {
    pub threads: usize,
    /// Commands issued (each pair counts as two).
    pub ops: usize,
    pub errors: usize,
    pub elapsed: Duration,
}

impl BenchReport {
    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.ops as f64 / secs
        }
    }
}

/// Tiny deterministic PRNG; XorShift keeps the workload reproducible.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_index(&mut self, mask: usize) -> usize {
        (self.next_u64() as usize) & mask
    }
}

pub fn run(pool: &Pool, threads: usize, pairs_per_thread: usize) -> Result<BenchReport> {
    if threads == 0 {
        return Err(anyhow!("bench needs at least one thread"));
    }

    let start = Instant::now();
    let errors = thread::scope(|scope| {
        let workers: Vec<_> = (0..threads)
            .map(|worker| scope.spawn(move || run_worker(pool, worker, pairs_per_thread)))
            .collect();
        workers
            .into_iter()
            .map(|handle| handle.join().unwrap_or(pairs_per_thread * 2))
            .sum::<usize>()
    });
    let elapsed = start.elapsed();

    Ok(BenchReport {
        threads,
        ops: threads * pairs_per_thread * 2,
        errors,
        elapsed,
    })
}

fn run_worker(pool: &Pool, worker: usize, pairs: usize) -> usize {
    let client = Client::new(pool);
    let keys: Vec<String> = (0..KEY_SPACE).map(|i| format!("bench:{}:{}", worker, i)).collect();
    let value = "x".repeat(VALUE_SIZE);
    let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0 ^ worker as u64);

    let mut errors = 0;
    for _ in 0..pairs {
        let key = &keys[rng.next_index(KEY_SPACE - 1)];
        if let Err(err) = client.set(key, &value) {
            errors += 1;
            log_error(&err);
        }
        if let Err(err) = client.get(key) {
            errors += 1;
            log_error(&err);
        }
    }
    errors
}

fn log_error(err: &ClientError) {
    tracing::warn!(error = %err, "bench command failed");
}
