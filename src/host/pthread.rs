//! Unix host adapter over pthreads.
//!
//! Raw types wrap the native object in an `UnsafeCell` and must stay at a
//! stable address between `init` and `finalize`; their owners pin them in
//! allocator storage. Debug builds initialize mutexes with error checking so
//! recursive locking and unlock-by-non-owner surface as errors instead of
//! deadlocks.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::mem::MaybeUninit;

use crate::error::{Result, SyncError};

/// Largest value the host semaphore counter may hold.
pub(crate) const SEMAPHORE_COUNT_MAX: u32 = i32::MAX as u32;

/// Thread-local keys POSIX guarantees to be concurrently available.
pub(crate) const LOCAL_SLOT_MIN_AVAILABLE: usize = 128;

fn map_init_error(code: i32) -> SyncError {
    match code {
        libc::ENOMEM => SyncError::OutOfMemory,
        _ => SyncError::Invalid,
    }
}

// ============================================================================
// Mutex
// ============================================================================

pub(crate) struct RawMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    pub(crate) fn new() -> RawMutex {
        RawMutex {
            inner: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
        }
    }

    /// # Safety
    /// Call exactly once, after the value has reached its final address and
    /// before any other operation.
    pub(crate) unsafe fn init(&self) -> Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        let rc = libc::pthread_mutexattr_init(attr.as_mut_ptr());
        if rc != 0 {
            return Err(map_init_error(rc));
        }

        // Error checking while debug assertions are enabled; the default
        // (possibly deadlocking) kind otherwise.
        #[cfg(debug_assertions)]
        {
            let rc =
                libc::pthread_mutexattr_settype(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ERRORCHECK);
            debug_assert_eq!(rc, 0);
        }

        let rc = libc::pthread_mutex_init(self.inner.get(), attr.as_ptr());
        let attr_rc = libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        debug_assert_eq!(attr_rc, 0);

        match rc {
            0 => Ok(()),
            code => Err(map_init_error(code)),
        }
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn lock(&self) -> Result<()> {
        match libc::pthread_mutex_lock(self.inner.get()) {
            0 => Ok(()),
            // EDEADLK: recursive lock attempt under the error-checking kind.
            _ => Err(SyncError::Invalid),
        }
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn try_lock(&self) -> Result<()> {
        match libc::pthread_mutex_trylock(self.inner.get()) {
            0 => Ok(()),
            libc::EBUSY => Err(SyncError::Busy),
            _ => Err(SyncError::Invalid),
        }
    }

    /// # Safety
    /// Only between `init` and `finalize`, by the locking thread.
    pub(crate) unsafe fn unlock(&self) -> Result<()> {
        match libc::pthread_mutex_unlock(self.inner.get()) {
            0 => Ok(()),
            // EPERM: unlock by a thread that does not hold the lock.
            _ => Err(SyncError::Invalid),
        }
    }

    /// # Safety
    /// Call exactly once; no thread may hold or wait on the mutex.
    pub(crate) unsafe fn finalize(&self) -> Result<()> {
        match libc::pthread_mutex_destroy(self.inner.get()) {
            0 => Ok(()),
            libc::EBUSY => Err(SyncError::Busy),
            _ => Err(SyncError::Invalid),
        }
    }

    fn as_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }
}

// ============================================================================
// Condition variable
// ============================================================================

pub(crate) struct RawCondvar {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for RawCondvar {}
unsafe impl Sync for RawCondvar {}

impl RawCondvar {
    pub(crate) fn new() -> RawCondvar {
        RawCondvar {
            inner: UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER),
        }
    }

    /// # Safety
    /// Call exactly once, after the value has reached its final address and
    /// before any other operation.
    pub(crate) unsafe fn init(&self) -> Result<()> {
        match libc::pthread_cond_init(self.inner.get(), std::ptr::null()) {
            0 => Ok(()),
            code => Err(map_init_error(code)),
        }
    }

    /// Atomically release `mutex` and suspend; `mutex` is re-acquired before
    /// returning. Spurious wakeups possible.
    ///
    /// # Safety
    /// The calling thread must hold `mutex`; both objects must be
    /// initialized.
    pub(crate) unsafe fn wait(&self, mutex: &RawMutex) -> Result<()> {
        match libc::pthread_cond_wait(self.inner.get(), mutex.as_ptr()) {
            0 => Ok(()),
            _ => Err(SyncError::Invalid),
        }
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn signal(&self) -> Result<()> {
        match libc::pthread_cond_signal(self.inner.get()) {
            0 => Ok(()),
            _ => Err(SyncError::Invalid),
        }
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn broadcast(&self) -> Result<()> {
        match libc::pthread_cond_broadcast(self.inner.get()) {
            0 => Ok(()),
            _ => Err(SyncError::Invalid),
        }
    }

    /// # Safety
    /// Call exactly once; no thread may be waiting.
    pub(crate) unsafe fn finalize(&self) -> Result<()> {
        match libc::pthread_cond_destroy(self.inner.get()) {
            0 => Ok(()),
            libc::EBUSY => Err(SyncError::Busy),
            _ => Err(SyncError::Invalid),
        }
    }
}

// ============================================================================
// Counting semaphore
// ============================================================================

/// Counting semaphore over a pthread mutex and condition variable.
///
/// Portable across unix flavours regardless of POSIX 1003.1b semaphore
/// support. The counter is only touched while `guard` is held.
pub(crate) struct RawSemaphore {
    guard: RawMutex,
    a_thread_can_pass: RawCondvar,
    count: UnsafeCell<u32>,
}

unsafe impl Send for RawSemaphore {}
unsafe impl Sync for RawSemaphore {}

impl RawSemaphore {
    pub(crate) fn new() -> RawSemaphore {
        RawSemaphore {
            guard: RawMutex::new(),
            a_thread_can_pass: RawCondvar::new(),
            count: UnsafeCell::new(0),
        }
    }

    /// # Safety
    /// Call exactly once, after the value has reached its final address and
    /// before any other operation. `init_count` must not exceed
    /// [`SEMAPHORE_COUNT_MAX`].
    pub(crate) unsafe fn init(&self, init_count: u32) -> Result<()> {
        self.guard.init()?;
        if let Err(code) = self.a_thread_can_pass.init() {
            let _ = self.guard.finalize();
            return Err(code);
        }
        *self.count.get() = init_count;
        Ok(())
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn wait(&self) -> Result<()> {
        self.guard.lock()?;
        let mut result = Ok(());
        while *self.count.get() == 0 && result.is_ok() {
            result = self.a_thread_can_pass.wait(&self.guard);
        }
        if result.is_ok() {
            *self.count.get() -= 1;
        }
        self.guard.unlock()?;
        result
    }

    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn signal(&self) -> Result<()> {
        self.signal_many(1)
    }

    /// Release `permits` permits, waking as many waiters.
    ///
    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn signal_many(&self, permits: u32) -> Result<()> {
        self.guard.lock()?;
        let count = self.count.get();
        let result = match (*count).checked_add(permits) {
            Some(total) if total <= SEMAPHORE_COUNT_MAX => {
                *count = total;
                if permits == 1 {
                    self.a_thread_can_pass.signal()
                } else {
                    self.a_thread_can_pass.broadcast()
                }
            }
            _ => Err(SyncError::Invalid),
        };
        self.guard.unlock()?;
        result
    }

    /// # Safety
    /// Call exactly once; no thread may be waiting.
    pub(crate) unsafe fn finalize(&self) -> Result<()> {
        let cond_result = self.a_thread_can_pass.finalize();
        let mutex_result = self.guard.finalize();
        cond_result.and(mutex_result)
    }
}

// ============================================================================
// Auto-reset event
// ============================================================================

/// Event that wakes one waiter per signal and resets itself.
///
/// Building block of the emulated condition variable on hosts without a
/// native one; compiled here for the unix test build of that engine.
#[cfg(test)]
pub(crate) struct AutoResetEvent {
    guard: RawMutex,
    signaled_cond: RawCondvar,
    signaled: UnsafeCell<bool>,
}

#[cfg(test)]
unsafe impl Send for AutoResetEvent {}
#[cfg(test)]
unsafe impl Sync for AutoResetEvent {}

#[cfg(test)]
impl AutoResetEvent {
    pub(crate) fn new() -> AutoResetEvent {
        AutoResetEvent {
            guard: RawMutex::new(),
            signaled_cond: RawCondvar::new(),
            signaled: UnsafeCell::new(false),
        }
    }

    /// # Safety
    /// Call exactly once, after the value has reached its final address and
    /// before any other operation.
    pub(crate) unsafe fn init(&self) -> Result<()> {
        self.guard.init()?;
        if let Err(code) = self.signaled_cond.init() {
            let _ = self.guard.finalize();
            return Err(code);
        }
        *self.signaled.get() = false;
        Ok(())
    }

    /// Block until signaled, consuming the signal.
    ///
    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn wait(&self) -> Result<()> {
        self.guard.lock()?;
        let mut result = Ok(());
        while !*self.signaled.get() && result.is_ok() {
            result = self.signaled_cond.wait(&self.guard);
        }
        if result.is_ok() {
            *self.signaled.get() = false;
        }
        self.guard.unlock()?;
        result
    }

    /// Set the event; one past or future waiter passes.
    ///
    /// # Safety
    /// Only between `init` and `finalize`.
    pub(crate) unsafe fn signal(&self) -> Result<()> {
        self.guard.lock()?;
        *self.signaled.get() = true;
        let result = self.signaled_cond.signal();
        self.guard.unlock()?;
        result
    }

    /// # Safety
    /// Call exactly once; no thread may be waiting.
    pub(crate) unsafe fn finalize(&self) -> Result<()> {
        let cond_result = self.signaled_cond.finalize();
        let mutex_result = self.guard.finalize();
        cond_result.and(mutex_result)
    }
}

// ============================================================================
// Thread-local key
// ============================================================================

/// Process-wide key naming one storage cell per thread.
pub(crate) struct RawTlsKey {
    key: libc::pthread_key_t,
}

impl RawTlsKey {
    pub(crate) fn create() -> Result<RawTlsKey> {
        let mut key: libc::pthread_key_t = 0;
        match unsafe { libc::pthread_key_create(&mut key, None) } {
            0 => Ok(RawTlsKey { key }),
            libc::ENOMEM => Err(SyncError::OutOfMemory),
            // EAGAIN: the host ran out of keys.
            _ => Err(SyncError::Invalid),
        }
    }

    pub(crate) fn set(&self, value: *mut c_void) -> Result<()> {
        match unsafe { libc::pthread_setspecific(self.key, value) } {
            0 => Ok(()),
            libc::ENOMEM => Err(SyncError::OutOfMemory),
            _ => Err(SyncError::Invalid),
        }
    }

    pub(crate) fn get(&self) -> *mut c_void {
        unsafe { libc::pthread_getspecific(self.key) }
    }

    pub(crate) fn delete(&self) -> Result<()> {
        match unsafe { libc::pthread_key_delete(self.key) } {
            0 => Ok(()),
            _ => Err(SyncError::Invalid),
        }
    }
}

// ============================================================================
// Topology queries
// ============================================================================

fn sysconf_count(name: libc::c_int) -> Option<usize> {
    let result = unsafe { libc::sysconf(name) };
    if result > 0 {
        Some(result as usize)
    } else {
        None
    }
}

pub(crate) fn installed_core_count() -> Option<usize> {
    sysconf_count(libc::_SC_NPROCESSORS_CONF)
}

pub(crate) fn active_core_count() -> Option<usize> {
    sysconf_count(libc::_SC_NPROCESSORS_ONLN)
}

pub(crate) fn installed_hwthread_count() -> Option<usize> {
    // sysconf cannot tell hardware threads apart from cores.
    None
}

pub(crate) fn active_hwthread_count() -> Option<usize> {
    None
}
