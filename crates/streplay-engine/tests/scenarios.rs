//! End-to-end replay scenarios driven through the batch harness.

use std::io::Cursor;

use streplay_engine::{
    BlockReason, CoreId, Driver, Engine, ReplayConfig, ReplayError, Report, StopReason, ThreadState, TimelineEntry,
};
use streplay_trace::{EventId, EventSource, PthreadMetadata, ThreadId, TraceReader};

// ============================================================================
// Helpers
// ============================================================================

fn config(threads: u32, cores: u32) -> ReplayConfig {
    ReplayConfig {
        num_threads: threads,
        num_cores: cores,
        record_timeline: true,
        ..ReplayConfig::default()
    }
}

fn sources(traces: &[&str]) -> Vec<Box<dyn EventSource>> {
    traces
        .iter()
        .enumerate()
        .map(|(t, text)| {
            Box::new(TraceReader::new(ThreadId(t as u32), Cursor::new(text.to_string()))) as Box<dyn EventSource>
        })
        .collect()
}

fn run(
    config: &ReplayConfig,
    metadata: PthreadMetadata,
    traces: &[&str],
) -> Result<(Report, Vec<TimelineEntry>), ReplayError> {
    let engine = Engine::new(config.clone(), metadata, sources(traces))?;
    let mut driver = Driver::new(engine, config.memory_latency);
    let report = driver.run()?;
    Ok((report, driver.engine().timeline().to_vec()))
}

fn entry(timeline: &[TimelineEntry], thread: u32, event: u64) -> &TimelineEntry {
    timeline
        .iter()
        .find(|e| e.thread == ThreadId(thread) && e.event == EventId(event))
        .unwrap_or_else(|| panic!("T{}#{} not in timeline", thread, event))
}

/// Critical sections `[lock completion, unlock completion]` of one thread.
fn critical_sections(timeline: &[TimelineEntry], thread: u32, pairs: &[(u64, u64)]) -> Vec<(u64, u64)> {
    pairs
        .iter()
        .map(|&(lock, unlock)| {
            (
                entry(timeline, thread, lock).completed_at,
                entry(timeline, thread, unlock).completed_at,
            )
        })
        .collect()
}

// ============================================================================
// Mutexes and spinlocks
// ============================================================================

#[test]
fn test_second_locker_waits_for_unlock() {
    let traces = [
        "1,0,pth_ty:1^0x1000\n2,0,10,0,0,0\n3,0,pth_ty:2^0x1000\n",
        "1,1,pth_ty:1^0x1000\n2,1,pth_ty:2^0x1000\n",
    ];
    let (report, timeline) = run(&config(2, 2), PthreadMetadata::default(), &traces).unwrap();

    let unlock = entry(&timeline, 0, 3);
    let acquire = entry(&timeline, 1, 1);
    assert_eq!(unlock.completed_at, 10);
    assert!(
        acquire.completed_at >= unlock.completed_at,
        "T1 acquired at {} before T0 released at {}",
        acquire.completed_at,
        unlock.completed_at
    );
    assert_eq!(report.threads[1].stalls, 1);
    assert_eq!(report.lock_handoffs, 1);
    assert_eq!(report.stop_reason, StopReason::Completed);
}

#[test]
fn test_mutex_waiters_acquire_in_arrival_order() {
    // T2 queues at cycle 0, T1 at cycle 3: T2 must get the lock first.
    let traces = [
        "1,0,pth_ty:1^0x1000\n2,0,10,0,0,0\n3,0,pth_ty:2^0x1000\n",
        "1,1,3,0,0,0\n2,1,pth_ty:1^0x1000\n3,1,5,0,0,0\n4,1,pth_ty:2^0x1000\n",
        "1,2,pth_ty:1^0x1000\n2,2,5,0,0,0\n3,2,pth_ty:2^0x1000\n",
    ];
    let (report, timeline) = run(&config(3, 3), PthreadMetadata::default(), &traces).unwrap();

    let t2_lock = entry(&timeline, 2, 1).completed_at;
    let t1_lock = entry(&timeline, 1, 2).completed_at;
    assert!(t2_lock < t1_lock, "FIFO violated: T2 at {}, T1 at {}", t2_lock, t1_lock);
    assert_eq!(report.lock_handoffs, 2);

    let mut sections = critical_sections(&timeline, 0, &[(1, 3)]);
    sections.extend(critical_sections(&timeline, 1, &[(2, 4)]));
    sections.extend(critical_sections(&timeline, 2, &[(1, 3)]));
    sections.sort_unstable();
    for pair in sections.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlapping critical sections {:?}", pair);
    }
}

#[test]
fn test_unlock_without_lock_is_fatal() {
    let traces = ["1,0,5,0,0,0\n2,0,pth_ty:2^0x1000\n"];
    let err = run(&config(1, 1), PthreadMetadata::default(), &traces).unwrap_err();
    match err {
        ReplayError::LockViolation { thread, event, address, .. } => {
            assert_eq!(thread, ThreadId(0));
            assert_eq!(event, EventId(2));
            assert_eq!(address, 0x1000);
        }
        other => panic!("expected LockViolation, got {:?}", other),
    }
}

#[test]
fn test_spinner_keeps_its_core() {
    let traces = [
        "1,0,pth_ty:8^0x40\n2,0,30,0,0,0\n3,0,pth_ty:9^0x40\n",
        "1,1,pth_ty:8^0x40\n2,1,pth_ty:9^0x40\n",
    ];
    let (report, timeline) = run(&config(2, 2), PthreadMetadata::default(), &traces).unwrap();

    assert!(entry(&timeline, 1, 1).completed_at >= entry(&timeline, 0, 3).completed_at);
    assert_eq!(report.threads[1].stalls, 1, "retries of one spin count once");
    assert_eq!(report.cores[1].swaps, 0, "spinning is not a swap");
    assert_eq!(report.lock_handoffs, 0);
}

// ============================================================================
// Communication
// ============================================================================

#[test]
fn test_consumer_waits_for_producer_and_records_one_rtt_sample() {
    let traces = [
        "1,0,10,0,0,0\n2,0,10,0,0,0\n3,0,10,0,0,0\n4,0,10,0,0,0\n5,0,10,0,0,0\n",
        "1,1 # 0 5 0x100 0x107\n",
    ];
    let (report, timeline) = run(&config(2, 2), PthreadMetadata::default(), &traces).unwrap();

    let produced = entry(&timeline, 0, 5).completed_at;
    let consumed = entry(&timeline, 1, 1);
    assert_eq!(produced, 50);
    assert!(consumed.started_at >= produced, "consumer started at {}", consumed.started_at);
    assert!(consumed.completed_at >= produced + 20, "shared read goes to memory");

    assert_eq!(report.rtt.len(), 1);
    let rtt = &report.rtt[0];
    assert_eq!((rtt.producer, rtt.consumer), (ThreadId(0), ThreadId(1)));
    assert_eq!(rtt.histogram.samples, 1);
    assert_eq!(rtt.histogram.total_cycles, 50, "trigger at 0, satisfied at 50");
    assert_eq!(rtt.histogram.bins[5], 1);
    assert_eq!(report.shared_accesses, 1);
}

#[test]
fn test_rtt_bins_sum_to_blocked_edges() {
    let traces = [
        "1,0,10,0,0,0\n2,0,20,0,0,0\n3,0,5,0,0,0\n",
        "1,1 # 0 1 0x100 0x107\n2,1 # 0 2 0x200 0x207 # 2 1 0x300 0x307\n",
        "1,2,100,0,0,0\n",
    ];
    let (report, _) = run(&config(3, 3), PthreadMetadata::default(), &traces).unwrap();

    let samples = report.total_rtt_samples();
    let binned: u64 = report.rtt.iter().flat_map(|e| e.histogram.bins.iter()).sum();
    assert_eq!(binned, samples);
    assert!(samples >= 2, "T1 blocks on T0#1 and on T2#1, got {}", samples);
}

// ============================================================================
// Barriers
// ============================================================================

#[test]
fn test_barrier_releases_once_all_arrive() {
    let metadata = PthreadMetadata::default().with_barrier(0x2000, [ThreadId(0), ThreadId(1)]);
    let traces = [
        "1,0,pth_ty:5^0x2000\n2,0,5,0,0,0\n",
        "1,1,40,0,0,0\n2,1,pth_ty:5^0x2000\n3,1,5,0,0,0\n",
    ];
    let (report, timeline) = run(&config(2, 2), metadata, &traces).unwrap();

    assert_eq!(report.barrier_releases, 1);
    let released = entry(&timeline, 0, 1).completed_at;
    assert!(released >= 40, "T0 passed the barrier at {}", released);
    assert_eq!(report.stop_reason, StopReason::Completed);
}

#[test]
fn test_missing_barrier_arrival_deadlocks_at_threshold() {
    let metadata = PthreadMetadata::default().with_barrier(0x2000, [ThreadId(0), ThreadId(1)]);
    let config = ReplayConfig {
        deadlock_threshold: 100,
        ..config(2, 2)
    };
    let traces = ["1,0,pth_ty:5^0x2000\n", "1,1,5,0,0,0\n"];
    let err = run(&config, metadata, &traces).unwrap_err();
    match err {
        ReplayError::Deadlock { time, cores, details } => {
            assert_eq!(time, 101, "no progress since cycle 0, threshold 100");
            assert_eq!(cores, vec![CoreId(0)]);
            assert!(details.contains("barrier 0x2000"), "{}", details);
        }
        other => panic!("expected Deadlock, got {:?}", other),
    }
}

#[test]
fn test_unexpected_barrier_participant() {
    let metadata = PthreadMetadata::default().with_barrier(0x2000, [ThreadId(0), ThreadId(1)]);
    let traces = ["1,0,pth_ty:5^0x2000\n", "1,1,pth_ty:5^0x2000\n", "1,2,pth_ty:5^0x2000\n"];
    let err = run(&config(3, 3), metadata, &traces).unwrap_err();
    assert!(
        matches!(err, ReplayError::BarrierMismatch { thread: ThreadId(2), address: 0x2000, .. }),
        "{:?}",
        err
    );
}

#[test]
fn test_barrier_naming_untraced_thread_is_rejected() {
    let metadata = PthreadMetadata::default().with_barrier(0x2000, [ThreadId(0), ThreadId(5)]);
    let traces = ["1,0,pth_ty:5^0x2000
", "1,1,5,0,0,0
"];
    let err = run(&config(2, 2), metadata, &traces).unwrap_err();
    assert!(matches!(err, ReplayError::Config(_)), "{:?}", err);
}

// ============================================================================
// Threads
// ============================================================================

#[test]
fn test_created_thread_starts_on_create_and_join_waits() {
    let metadata = PthreadMetadata::default().with_handle(0x500, ThreadId(1));
    let traces = [
        "1,0,15,0,0,0\n2,0,pth_ty:3^0x500\n3,0,5,0,0,0\n4,0,pth_ty:4^0x500\n",
        "1,1,20,0,0,0\n",
    ];
    let engine = Engine::new(config(2, 2), metadata.clone(), sources(&traces)).unwrap();
    assert_eq!(engine.thread_state(ThreadId(1)), Some(ThreadState::NotStarted));

    let (report, timeline) = run(&config(2, 2), metadata, &traces).unwrap();
    let created = entry(&timeline, 0, 2).completed_at;
    let child = entry(&timeline, 1, 1);
    assert_eq!(created, 15);
    assert!(child.started_at >= created);
    assert!(entry(&timeline, 0, 4).completed_at >= child.completed_at, "join returned early");
    assert_eq!(report.completion_order, vec![ThreadId(1), ThreadId(0)]);
}

#[test]
fn test_join_stall_reason() {
    let metadata = PthreadMetadata::default().with_handle(0x500, ThreadId(1));
    let traces = ["1,0,pth_ty:3^0x500\n2,0,pth_ty:4^0x500\n", "1,1,50,0,0,0\n"];
    let mut engine = Engine::new(config(2, 2), metadata, sources(&traces)).unwrap();
    let mut memory = streplay_engine::FixedLatencyMemory::new(1);
    engine.tick(CoreId(0), 0, &mut memory).unwrap();
    assert_eq!(
        engine.thread_state(ThreadId(0)),
        Some(ThreadState::Stalled(BlockReason::Join { thread: ThreadId(1) }))
    );
    assert_eq!(engine.thread_state(ThreadId(1)), Some(ThreadState::Running));
}

#[test]
fn test_core_with_only_uncreated_thread_is_not_deadlocked() {
    // T0 computes past the threshold before creating T1, whose core sits idle.
    let metadata = PthreadMetadata::default().with_handle(0x500, ThreadId(1));
    let config = ReplayConfig {
        deadlock_threshold: 100,
        ..config(2, 2)
    };
    let traces = [
        "1,0,300,0,0,0\n2,0,pth_ty:3^0x500\n3,0,pth_ty:4^0x500\n",
        "1,1,5,0,0,0\n",
    ];
    let (report, timeline) = run(&config, metadata, &traces).unwrap();
    assert_eq!(report.stop_reason, StopReason::Completed);
    assert!(entry(&timeline, 1, 1).started_at >= 300);
}

// ============================================================================
// Timing
// ============================================================================

#[test]
fn test_cache_parameters_cost_issued_accesses() {
    let traces = ["1,0,0,0,1,1 $ 0x40 0x47 * 0x80 0x87\n"];
    let (base, _) = run(&config(1, 1), PthreadMetadata::default(), &traces).unwrap();
    // Two serial accesses, each 13 expected cache cycles plus 20 of latency.
    assert_eq!(base.final_cycle, 66);

    let mut heavy = config(1, 1);
    heavy.cache.l1_hit_cycles = 500;
    heavy.cache.l1_miss_rate = 1.0;
    heavy.cache.l2_miss_penalty = 10_000;
    let (slow, _) = run(&heavy, PthreadMetadata::default(), &traces).unwrap();
    // 500 + 10 + 0.1 * 10000 = 1510 per access.
    assert_eq!(slow.final_cycle, 2 * (1510 + 20));
    assert_eq!(slow.total_events(), base.total_events());
}

#[test]
fn test_cycle_counter_saturates_instead_of_overflowing() {
    let traces = ["1,0,18446744073709551615,0,0,0\n2,0,1,0,0,0\n"];
    let (report, _) = run(&config(1, 1), PthreadMetadata::default(), &traces).unwrap();
    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.total_events(), 2);
    assert_eq!(report.final_cycle, u64::MAX);
}

// ============================================================================
// Ordering, determinism, errors
// ============================================================================

fn mixed_workload() -> (ReplayConfig, PthreadMetadata, [&'static str; 4]) {
    let metadata = PthreadMetadata::default().with_barrier(0x9000, [ThreadId(0), ThreadId(1), ThreadId(2), ThreadId(3)]);
    let traces = [
        "1,0,12,3,1,1 $ 0x1000 0x100f * 0x2000 0x2007\n2,0,pth_ty:1^0x40\n3,0,4,0,0,0\n4,0,pth_ty:2^0x40\n5,0,pth_ty:5^0x9000\n6,0,8,0,0,0\n",
        "1,1,7,1,0,0\n2,1 # 0 1 0x1000 0x100f\n3,1,pth_ty:1^0x40\n4,1,pth_ty:2^0x40\n5,1,pth_ty:5^0x9000\n",
        "1,2,3,0,1,0 * 0x1000 0x1007\n2,2,pth_ty:5^0x9000\n3,2 # 1 2 0x1000 0x1007\n",
        "1,3,pth_ty:1^0x40\n2,3,25,5,0,0\n3,3,pth_ty:2^0x40\n4,3,pth_ty:5^0x9000\n",
    ];
    (config(4, 2), metadata, traces)
}

#[test]
fn test_replay_is_deterministic() {
    let (config, metadata, traces) = mixed_workload();
    let first = run(&config, metadata.clone(), &traces).unwrap();
    let second = run(&config, metadata, &traces).unwrap();
    assert_eq!(first.0, second.0);
    assert_eq!(first.1, second.1);
    assert_eq!(first.0.stop_reason, StopReason::Completed);
    assert_eq!(first.0.total_events(), 18);
}

#[test]
fn test_events_complete_in_trace_order() {
    let (config, metadata, traces) = mixed_workload();
    let (_, timeline) = run(&config, metadata, &traces).unwrap();
    for thread in 0..4 {
        let ids: Vec<u64> = timeline
            .iter()
            .filter(|e| e.thread == ThreadId(thread))
            .map(|e| e.event.0)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "T{} out of order: {:?}", thread, ids);
    }
}

#[test]
fn test_core_cycles_cover_the_run() {
    let (config, metadata, traces) = mixed_workload();
    let (report, _) = run(&config, metadata, &traces).unwrap();
    for core in &report.cores {
        assert!(core.active_cycles + core.idle_cycles <= report.final_cycle);
        assert!(core.active_cycles > 0, "{} never ran", core.core);
    }
}

#[test]
fn test_malformed_line_names_thread_and_line() {
    let traces = ["1,0,5,0,0,0\n2,0,oops\n"];
    let err = run(&config(1, 1), PthreadMetadata::default(), &traces).unwrap_err();
    match err {
        ReplayError::MalformedTrace { thread, line, .. } => {
            assert_eq!(thread, ThreadId(0));
            assert_eq!(line, 2);
        }
        other => panic!("expected MalformedTrace, got {:?}", other),
    }
}
