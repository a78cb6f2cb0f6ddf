//! Synchronization primitives: mutex, condition variable, counting
//! semaphore, and barrier.
//!
//! Every primitive follows the same lifecycle: `create` takes an allocator
//! and either returns a fully initialized handle or a failure code with
//! nothing left allocated; dropping the handle finalizes the host resource
//! and releases the storage through the same allocator.

pub mod barrier;
pub mod condvar;
pub mod mutex;
pub mod semaphore;

#[cfg(any(not(unix), test))]
pub(crate) mod emulated;


pub use barrier::{Barrier, BarrierWaitOutcome};
pub use condvar::CondVar;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::{Semaphore, SEMAPHORE_COUNT_MAX};
