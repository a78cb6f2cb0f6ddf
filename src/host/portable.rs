//! Fallback host adapter for non-unix hosts.
//!
//! Builds the raw primitives from `parking_lot` locks and std thread-local
//! storage. The host provides no native condition variable through this
//! backend; the library's emulated engine supplies one from the mutex,
//! semaphore, and auto-reset event below.
//!
//! The API mirrors `host::pthread` so the rest of the crate is backend
//! agnostic, including the pin-then-`init` lifecycle even where the types
//! here would tolerate moves.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::lock_api::RawMutex as _;
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, SyncError};

/// Largest value the host semaphore counter may hold.
pub(crate) const SEMAPHORE_COUNT_MAX: u32 = i32::MAX as u32;

/// Conservative number of concurrently usable thread-local keys.
pub(crate) const LOCAL_SLOT_MIN_AVAILABLE: usize = 64;

// ============================================================================
// Mutex
// ============================================================================

pub(crate) struct RawMutex {
    inner: parking_lot::RawMutex,
}

impl RawMutex {
    pub(crate) fn new() -> RawMutex {
        RawMutex {
            inner: parking_lot::RawMutex::INIT,
        }
    }

    /// # Safety
    /// Call exactly once, before any other operation.
    pub(crate) unsafe fn init(&self) -> Result<()> {
        Ok(())
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn lock(&self) -> Result<()> {
        self.inner.lock();
        Ok(())
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn try_lock(&self) -> Result<()> {
        if self.inner.try_lock() {
            Ok(())
        } else {
            Err(SyncError::Busy)
        }
    }

    /// # Safety
    /// Only between `init` and `finalize`, by the locking thread.
    pub(crate) unsafe fn unlock(&self) -> Result<()> {
        self.inner.unlock();
        Ok(())
    }

    /// # Safety
    /// Call exactly once; no thread may hold or wait on the mutex.
    pub(crate) unsafe fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Counting semaphore
// ============================================================================

pub(crate) struct RawSemaphore {
    count: Mutex<u32>,
    a_thread_can_pass: Condvar,
}

impl RawSemaphore {
    pub(crate) fn new() -> RawSemaphore {
        RawSemaphore {
            count: Mutex::new(0),
            a_thread_can_pass: Condvar::new(),
        }
    }

    /// # Safety
    /// Call exactly once, before any other operation. `init_count` must not
    /// exceed [`SEMAPHORE_COUNT_MAX`].
    pub(crate) unsafe fn init(&self, init_count: u32) -> Result<()> {
        *self.count.lock() = init_count;
        Ok(())
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn wait(&self) -> Result<()> {
        let mut count = self.count.lock();
        while *count == 0 {
            self.a_thread_can_pass.wait(&mut count);
        }
        *count -= 1;
        Ok(())
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn signal(&self) -> Result<()> {
        self.signal_many(1)
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn signal_many(&self, permits: u32) -> Result<()> {
        let mut count = self.count.lock();
        match count.checked_add(permits) {
            Some(total) if total <= SEMAPHORE_COUNT_MAX => {
                *count = total;
                if permits == 1 {
                    self.a_thread_can_pass.notify_one();
                } else {
                    self.a_thread_can_pass.notify_all();
                }
                Ok(())
            }
            _ => Err(SyncError::Invalid),
        }
    }

    /// # Safety
    /// Call exactly once; no thread may be waiting.
    pub(crate) unsafe fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Auto-reset event
// ============================================================================

pub(crate) struct AutoResetEvent {
    signaled: Mutex<bool>,
    signaled_cond: Condvar,
}

impl AutoResetEvent {
    pub(crate) fn new() -> AutoResetEvent {
        AutoResetEvent {
            signaled: Mutex::new(false),
            signaled_cond: Condvar::new(),
        }
    }

    /// # Safety
    /// Call exactly once, before any other operation.
    pub(crate) unsafe fn init(&self) -> Result<()> {
        *self.signaled.lock() = false;
        Ok(())
    }

    /// Block until signaled, consuming the signal.
    ///
    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn wait(&self) -> Result<()> {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.signaled_cond.wait(&mut signaled);
        }
        *signaled = false;
        Ok(())
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn signal(&self) -> Result<()> {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.signaled_cond.notify_one();
        Ok(())
    }

    /// # Safety
    /// Call exactly once; no thread may be waiting.
    pub(crate) unsafe fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Thread-local key
// ============================================================================

thread_local! {
    static SLOT_CELLS: RefCell<HashMap<usize, usize>> = RefCell::new(HashMap::new());
}

static NEXT_SLOT_INDEX: AtomicUsize = AtomicUsize::new(1);

/// Process-wide key naming one storage cell per thread.
///
/// Keys are a monotonically handed-out index into a per-thread map; deleted
/// indices are not reused.
pub(crate) struct RawTlsKey {
    index: usize,
}

impl RawTlsKey {
    pub(crate) fn create() -> Result<RawTlsKey> {
        let index = NEXT_SLOT_INDEX.fetch_add(1, Ordering::Relaxed);
        if index == usize::MAX {
            return Err(SyncError::Invalid);
        }
        Ok(RawTlsKey { index })
    }

    pub(crate) fn set(&self, value: *mut c_void) -> Result<()> {
        SLOT_CELLS.with(|cells| {
            cells.borrow_mut().insert(self.index, value as usize);
        });
        Ok(())
    }

    pub(crate) fn get(&self) -> *mut c_void {
        SLOT_CELLS.with(|cells| {
            cells
                .borrow()
                .get(&self.index)
                .copied()
                .unwrap_or(0)
        }) as *mut c_void
    }

    pub(crate) fn delete(&self) -> Result<()> {
        SLOT_CELLS.with(|cells| {
            cells.borrow_mut().remove(&self.index);
        });
        Ok(())
    }
}

// ============================================================================
// Topology queries
// ============================================================================

pub(crate) fn installed_core_count() -> Option<usize> {
    None
}

pub(crate) fn active_core_count() -> Option<usize> {
    std::thread::available_parallelism().ok().map(|n| n.get())
}

pub(crate) fn installed_hwthread_count() -> Option<usize> {
    None
}

pub(crate) fn active_hwthread_count() -> Option<usize> {
    None
}
