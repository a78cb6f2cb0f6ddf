//! Portable low-level threading primitives.
//!
//! One API over the native threading facilities of the host operating
//! system: mutexes, condition variables, counting semaphores, reusable
//! barriers, thread objects with an explicit configure/launch/join life
//! cycle, batched thread arrays, thread-local storage slots, and
//! hardware-topology queries. The `host` module is the only place that
//! talks to the OS; on hosts without a native condition variable the
//! library emulates one from a mutex, a semaphore, and an auto-reset event.
//!
//! Every `create` takes an allocator handle and either returns a fully
//! initialized primitive or an error with nothing left allocated; dropping
//! a primitive finalizes its host resource and releases its storage through
//! the same allocator. Blocking is always kernel blocking: there is no
//! scheduler, no thread pool, and no timed waits in this crate.

pub mod alloc;
pub mod error;
pub mod platform;
pub mod sync;
pub mod thread;

mod host;

pub use crate::alloc::{
    system_allocator, AllocRef, Allocator, CountingAlloc, RawAllocator, SystemAlloc,
};
pub use crate::error::{Result, SyncError};
pub use crate::sync::{
    Barrier, BarrierWaitOutcome, CondVar, Mutex, MutexGuard, Semaphore, SEMAPHORE_COUNT_MAX,
};
pub use crate::thread::{
    current_thread_id, yield_now, LocalSlot, Thread, ThreadArray, ThreadGroup, ThreadState,
    ThreadTask, LOCAL_SLOT_MIN_AVAILABLE,
};
