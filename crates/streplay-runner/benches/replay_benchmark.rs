//! Replay throughput benchmarks.
//!
//! Replays synthetic in-memory traces through the batch driver to measure
//! scheduler, resolver and timing overhead without file I/O.
//!
//! ## Running the benchmarks
//!
//! ```bash
//! cargo bench -p streplay-runner
//! ```
//!
//! ## Benchmarks included
//!
//! - `replay/threads/N` - N threads on 4 cores, producer/consumer chain plus a shared lock
//! - `replay/cores/N` - 16 threads on N cores

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use streplay_engine::{Driver, Engine, ReplayConfig};
use streplay_trace::{EventSource, PthreadMetadata, ThreadId, TraceReader};

const ITERATIONS: u64 = 200;
const BARRIER: u64 = 0x9000;

/// Trace text for thread `t`: per iteration a compute event writing one
/// line, a read of the previous thread's line, and a locked empty section.
fn synthetic_trace(t: u32) -> String {
    let mut text = String::new();
    for i in 0..ITERATIONS {
        let id = 4 * i + 1;
        let addr = 0x10000 * (t as u64 + 1) + 64 * i;
        text.push_str(&format!("{},{},10,2,0,1 $ {:#x} {:#x}\n", id, t, addr, addr + 7));
        if t == 0 {
            text.push_str(&format!("{},{},4,0,0,0\n", id + 1, t));
        } else {
            let producer_addr = 0x10000 * t as u64 + 64 * i;
            text.push_str(&format!(
                "{},{} # {} {} {:#x} {:#x}\n",
                id + 1,
                t,
                t - 1,
                id,
                producer_addr,
                producer_addr + 7
            ));
        }
        text.push_str(&format!("{},{},pth_ty:1^0x40\n", id + 2, t));
        text.push_str(&format!("{},{},pth_ty:2^0x40\n", id + 3, t));
    }
    text.push_str(&format!("{},{},pth_ty:5^{:#x}\n", 4 * ITERATIONS + 1, t, BARRIER));
    text
}

fn replay(traces: &[String], cores: u32) -> u64 {
    let threads = traces.len() as u32;
    let config = ReplayConfig {
        num_cores: cores,
        num_threads: threads,
        deadlock_threshold: 10_000_000,
        ..ReplayConfig::default()
    };
    let metadata = PthreadMetadata::default().with_barrier(BARRIER, (0..threads).map(ThreadId));
    let sources = traces
        .iter()
        .enumerate()
        .map(|(t, text)| {
            Box::new(TraceReader::new(ThreadId(t as u32), Cursor::new(text.clone()))) as Box<dyn EventSource>
        })
        .collect();
    let latency = config.memory_latency;
    let engine = Engine::new(config, metadata, sources).expect("engine should build");
    let report = Driver::new(engine, latency).run().expect("replay should complete");
    report.total_events()
}

fn bench_thread_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay/threads");
    group.sample_size(20);

    for threads in [2u32, 4, 8, 16] {
        let traces: Vec<String> = (0..threads).map(synthetic_trace).collect();
        let events = threads as u64 * (4 * ITERATIONS + 1);
        group.throughput(Throughput::Elements(events));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &traces, |b, traces| {
            b.iter(|| black_box(replay(traces, 4)));
        });
    }

    group.finish();
}

fn bench_core_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay/cores");
    group.sample_size(20);

    let traces: Vec<String> = (0..16).map(synthetic_trace).collect();
    let events = 16 * (4 * ITERATIONS + 1);
    for cores in [1u32, 2, 4, 8, 16] {
        group.throughput(Throughput::Elements(events));
        group.bench_with_input(BenchmarkId::from_parameter(cores), &cores, |b, &cores| {
            b.iter(|| black_box(replay(&traces, cores)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_thread_scaling, bench_core_scaling);
criterion_main!(benches);
