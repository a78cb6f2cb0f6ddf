//! End-to-end thread array scenarios.

use strand::{system_allocator, CondVar, Mutex, ThreadArray, ThreadTask};

use serial_test::serial;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-thread context: the thread's index and the batch-wide tallies.
struct WorkerContext {
    index: usize,
    index_sum: Arc<AtomicU64>,
    runs: Arc<AtomicUsize>,
}

#[test]
#[serial]
fn sixty_four_workers_full_cycle() {
    let thread_count = 64usize;
    let index_sum = Arc::new(AtomicU64::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let task: ThreadTask<WorkerContext> = Arc::new(|context| {
        context
            .index_sum
            .fetch_add(context.index as u64, Ordering::SeqCst);
        context.runs.fetch_add(1, Ordering::SeqCst);
    });

    let mut array = ThreadArray::create(thread_count).unwrap();
    array.configure_tasks(0, thread_count, &task).unwrap();
    for index in 0..thread_count {
        let context = Arc::new(WorkerContext {
            index,
            index_sum: Arc::clone(&index_sum),
            runs: Arc::clone(&runs),
        });
        array.configure_contexts(index, 1, &context).unwrap();
    }

    match array.launch_all() {
        Ok(()) => {
            assert_eq!(array.joinable_count(), thread_count);
            array.join_all().expect("join should drain every worker");
            assert_eq!(array.joinable_count(), 0);

            assert_eq!(runs.load(Ordering::SeqCst), thread_count);
            let expected: u64 = (0..thread_count as u64).sum();
            assert_eq!(index_sum.load(Ordering::SeqCst), expected);
        }
        Err(_) => {
            // Partial launch: a strict prefix is running and joinable, and
            // joining drains exactly that prefix.
            let launched = array.joinable_count();
            assert!(launched < thread_count);
            array.join_all().expect("join should drain the prefix");
            assert_eq!(array.joinable_count(), 0);
            assert_eq!(runs.load(Ordering::SeqCst), launched);
        }
    }
}

#[test]
fn workers_coordinate_shutdown_through_a_flag() {
    // The launch-failure recovery pattern: tasks wait for a go/stop decision
    // so a partially launched batch can always be joined.
    struct GateContext {
        gate: Mutex<Option<bool>>,
        decided: CondVar,
        proceeded: AtomicUsize,
    }

    let alloc = system_allocator();
    let thread_count = 8usize;
    let context = Arc::new(GateContext {
        gate: Mutex::create(&alloc, None).unwrap(),
        decided: CondVar::create(&alloc).unwrap(),
        proceeded: AtomicUsize::new(0),
    });

    let task: ThreadTask<GateContext> = Arc::new(|context| {
        let mut decision = context.gate.lock().unwrap();
        while decision.is_none() {
            decision = context.decided.wait(decision).unwrap();
        }
        if *decision == Some(true) {
            context.proceeded.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut array = ThreadArray::create(thread_count).unwrap();
    array.configure(0, thread_count, &context, &task).unwrap();

    let launch_result = array.launch_all();

    // Whatever happened at launch, every running worker gets a decision:
    // proceed on full launch, shut down on a partial one.
    let full = launch_result.is_ok();
    {
        let mut decision = context.gate.lock().unwrap();
        *decision = Some(full);
        context.decided.broadcast().unwrap();
    }

    array.join_all().expect("join should drain the batch");
    assert_eq!(array.joinable_count(), 0);
    if full {
        assert_eq!(context.proceeded.load(Ordering::SeqCst), thread_count);
    }
}

#[test]
fn relaunch_is_refused_after_join() {
    let runs = Arc::new(AtomicUsize::new(0));
    let task: ThreadTask<AtomicUsize> = Arc::new(|runs| {
        runs.fetch_add(1, Ordering::SeqCst);
    });

    let mut array = ThreadArray::create(4).unwrap();
    array.configure(0, 4, &runs, &task).unwrap();
    array.launch_all().unwrap();
    array.join_all().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 4);

    // Thread state machines are monotonic; a drained array stays drained.
    assert!(array.launch_all().is_err());
    assert_eq!(array.joinable_count(), 0);
}
