//! Host adapter: the only module that talks to the operating system.
//!
//! Each backend provides the same surface: a raw mutex, a raw counting
//! semaphore with [`SEMAPHORE_COUNT_MAX`], an auto-reset event for the
//! emulated condition variable, a raw thread-local key bounded by
//! [`LOCAL_SLOT_MIN_AVAILABLE`], and the hardware-topology queries. The unix
//! backend additionally provides a native condition variable; elsewhere the
//! library emulates one. Thread creation, joining, and yielding ride Rust's
//! portable threading layer and are shared below.
//!
//! Raw types follow a pin-then-`init` lifecycle: the owner places them at a
//! stable address (allocator storage), calls `init` once, uses them, and
//! calls `finalize` once. The adapter itself never allocates.

#[cfg(unix)]
mod pthread;
#[cfg(unix)]
pub(crate) use pthread::*;

#[cfg(not(unix))]
mod portable;
#[cfg(not(unix))]
pub(crate) use portable::*;

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crate::error::{Result, SyncError};

/// Spawn a native thread running `task`, optionally labelled for debuggers.
pub(crate) fn spawn_thread<F>(label: Option<String>, task: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let mut builder = std::thread::Builder::new();
    if let Some(name) = label {
        builder = builder.name(name);
    }
    builder.spawn(task).map_err(|error| match error.kind() {
        std::io::ErrorKind::OutOfMemory => SyncError::OutOfMemory,
        _ => SyncError::Invalid,
    })
}

/// Offer the rest of the current thread's time slice to the scheduler.
pub(crate) fn yield_now() {
    std::thread::yield_now();
}

/// Identifier of the calling thread, unique for the process lifetime.
///
/// Ids are handed out on first query per thread and never reused, unlike
/// native thread ids which the host may recycle after a join.
pub(crate) fn current_thread_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static THREAD_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_spawn_and_join_runs_task() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_thread = Arc::clone(&hits);

        let handle = spawn_thread(Some("host-probe".into()), move || {
            hits_in_thread.fetch_add(1, Ordering::SeqCst);
        })
        .expect("spawn should succeed");

        handle.join().expect("thread should not panic");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_ids_differ_between_threads() {
        let main_id = current_thread_id();
        assert_eq!(main_id, current_thread_id());

        let handle = std::thread::spawn(current_thread_id);
        let other = handle.join().expect("thread should not panic");
        assert_ne!(main_id, other);
    }
}
