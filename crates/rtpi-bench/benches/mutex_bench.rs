//! PI mutex microbenchmarks.
//!
//! Uncontended lock/unlock and trylock stay in user space; the handoff bench
//! forces every acquisition through `FUTEX_LOCK_PI` / `FUTEX_UNLOCK_PI`.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rtpi_bench::{BenchStats, print_env_metadata_once, trace_label};
use rtpi_core::PiMutex;

const TAG: &str = "PI_MUTEX_BENCH";

fn bench_lock_unlock(c: &mut Criterion) {
    print_env_metadata_once(TAG);
    let mode = trace_label();
    let m = PiMutex::new();
    for _ in 0..10_000 {
        let _ = m.lock();
        let _ = m.unlock();
    }

    let stats = RefCell::new(BenchStats::default());
    let mut group = c.benchmark_group("pi_mutex_hotpath");
    group.throughput(Throughput::Elements(1));
    group.bench_function(BenchmarkId::new("lock_unlock", mode), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                black_box(m.lock()).ok();
                black_box(m.unlock()).ok();
            }
            let dur = start.elapsed().max(Duration::from_nanos(1));
            stats.borrow_mut().record(iters, dur);
            dur
        });
    });
    group.finish();
    stats.borrow().report(TAG, "lock_unlock");
}

fn bench_trylock(c: &mut Criterion) {
    print_env_metadata_once(TAG);
    let mode = trace_label();
    let m = PiMutex::new();

    let stats = RefCell::new(BenchStats::default());
    let mut group = c.benchmark_group("pi_mutex_hotpath");
    group.throughput(Throughput::Elements(1));
    group.bench_function(BenchmarkId::new("trylock_unlock", mode), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                black_box(m.trylock()).ok();
                black_box(m.unlock()).ok();
            }
            let dur = start.elapsed().max(Duration::from_nanos(1));
            stats.borrow_mut().record(iters, dur);
            dur
        });
    });
    group.finish();
    stats.borrow().report(TAG, "trylock_unlock");
}

fn bench_lock_save_nested(c: &mut Criterion) {
    print_env_metadata_once(TAG);
    let mode = trace_label();
    let m = PiMutex::new();

    let stats = RefCell::new(BenchStats::default());
    let mut group = c.benchmark_group("pi_mutex_hotpath");
    group.throughput(Throughput::Elements(1));
    group.bench_function(BenchmarkId::new("lock_save_nested", mode), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                if let Ok(outer) = m.lock_save() {
                    if let Ok(inner) = m.lock_save() {
                        black_box(inner.already_held());
                        inner.restore().ok();
                    }
                    outer.restore().ok();
                }
            }
            let dur = start.elapsed().max(Duration::from_nanos(1));
            stats.borrow_mut().record(iters, dur);
            dur
        });
    });
    group.finish();
    stats.borrow().report(TAG, "lock_save_nested");
}

/// Two threads hammering one mutex; most acquisitions hit the kernel.
fn bench_contended_pair(c: &mut Criterion) {
    print_env_metadata_once(TAG);
    let mode = trace_label();
    let m = Arc::new(PiMutex::new());
    let stop = Arc::new(AtomicBool::new(false));
    let (m2, stop2) = (m.clone(), stop.clone());
    let rival = std::thread::spawn(move || {
        while !stop2.load(Ordering::Relaxed) {
            if m2.lock().is_ok() {
                black_box(m2.owner());
                m2.unlock().ok();
            }
        }
    });

    let stats = RefCell::new(BenchStats::default());
    let mut group = c.benchmark_group("pi_mutex_contended");
    group.throughput(Throughput::Elements(1));
    group.bench_function(BenchmarkId::new("pair_lock_unlock", mode), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                if m.lock().is_ok() {
                    black_box(m.has_waiters());
                    m.unlock().ok();
                }
            }
            let dur = start.elapsed().max(Duration::from_nanos(1));
            stats.borrow_mut().record(iters, dur);
            dur
        });
    });
    group.finish();
    stop.store(true, Ordering::Relaxed);
    rival.join().ok();
    stats.borrow().report(TAG, "pair_lock_unlock");
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(1))
        .measurement_time(Duration::from_secs(2))
        .sample_size(80);
    targets = bench_lock_unlock, bench_trylock, bench_lock_save_nested, bench_contended_pair
);
criterion_main!(benches);
