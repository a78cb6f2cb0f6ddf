//! Condition variable for predicate waiting against a [`Mutex`].

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::alloc::AllocRef;
use crate::error::{Result, SyncError};
use crate::sync::mutex::MutexGuard;

#[cfg(unix)]
use crate::{alloc, host};
#[cfg(unix)]
use std::ptr::NonNull;
#[cfg(unix)]
use std::sync::Arc;

#[cfg(not(unix))]
use crate::sync::emulated::EmulatedCondVar;

/// A condition variable.
///
/// [`CondVar::wait`] consumes a lock guard, atomically releases the mutex and
/// suspends the calling thread; the guard handed back holds the re-acquired
/// lock. Wakeups may be spurious, so callers re-test their predicate in a
/// loop. [`CondVar::signal`] wakes at least one waiter, [`CondVar::broadcast`]
/// wakes every waiter registered at the moment of the call; both may be
/// issued with or without holding the mutex, and are lost when nobody waits.
///
/// While waiters exist, every wait must go through the same mutex; a wait
/// through a different one fails with
/// [`SyncError::Invalid`](crate::SyncError::Invalid). The association clears
/// once the last waiter leaves.
///
/// On hosts without a native condition variable the same contract is served
/// by the emulation in this crate built from a mutex, a counting semaphore,
/// and an auto-reset event.
pub struct CondVar {
    #[cfg(unix)]
    native: NativeCore,
    #[cfg(not(unix))]
    engine: EmulatedCondVar,
    bound_mutex: AtomicUsize,
    waiters: AtomicUsize,
}

unsafe impl Send for CondVar {}
unsafe impl Sync for CondVar {}

impl CondVar {
    /// Create a condition variable.
    ///
    /// # Errors
    /// [`SyncError::OutOfMemory`](crate::SyncError::OutOfMemory) or
    /// [`SyncError::Invalid`](crate::SyncError::Invalid); nothing is left
    /// allocated on failure.
    pub fn create(alloc: &AllocRef) -> Result<CondVar> {
        Ok(CondVar {
            #[cfg(unix)]
            native: NativeCore::create(alloc)?,
            #[cfg(not(unix))]
            engine: EmulatedCondVar::create(alloc)?,
            bound_mutex: AtomicUsize::new(0),
            waiters: AtomicUsize::new(0),
        })
    }

    /// Release the guard's mutex, suspend until woken, re-acquire the mutex.
    ///
    /// # Errors
    /// [`SyncError::Invalid`](crate::SyncError::Invalid) if the guard's mutex
    /// differs from the one concurrent waiters use, or on host failure.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> Result<MutexGuard<'a, T>> {
        self.bind_mutex(guard.mutex().raw_addr())?;
        self.waiters.fetch_add(1, Ordering::SeqCst);

        let result = self.wait_on_host(guard);

        if self.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.bound_mutex.store(0, Ordering::SeqCst);
        }
        result
    }

    /// Wake at least one waiter, if any.
    pub fn signal(&self) -> Result<()> {
        #[cfg(unix)]
        unsafe {
            self.native.raw.as_ref().signal()
        }
        #[cfg(not(unix))]
        self.engine.signal()
    }

    /// Wake every waiter registered at the moment of the call.
    pub fn broadcast(&self) -> Result<()> {
        #[cfg(unix)]
        unsafe {
            self.native.raw.as_ref().broadcast()
        }
        #[cfg(not(unix))]
        self.engine.broadcast()
    }

    #[cfg(unix)]
    fn wait_on_host<'a, T>(&self, guard: MutexGuard<'a, T>) -> Result<MutexGuard<'a, T>> {
        let mutex = guard.mutex();
        unsafe { self.native.raw.as_ref().wait(mutex.raw())? };
        Ok(guard)
    }

    #[cfg(not(unix))]
    fn wait_on_host<'a, T>(&self, guard: MutexGuard<'a, T>) -> Result<MutexGuard<'a, T>> {
        self.engine.wait(guard)
    }

    /// Associate this condition variable with the mutex at `addr`, or verify
    /// the existing association.
    fn bind_mutex(&self, addr: usize) -> Result<()> {
        match self
            .bound_mutex
            .compare_exchange(0, addr, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(()),
            Err(bound) if bound == addr => Ok(()),
            Err(_) => Err(SyncError::Invalid),
        }
    }
}

// ============================================================================
// Native path
// ============================================================================

#[cfg(unix)]
struct NativeCore {
    raw: NonNull<host::RawCondvar>,
    alloc: AllocRef,
}

#[cfg(unix)]
impl NativeCore {
    fn create(alloc: &AllocRef) -> Result<NativeCore> {
        let raw = alloc::alloc_pinned(alloc, host::RawCondvar::new())?;
        if let Err(error) = unsafe { raw.as_ref().init() } {
            let _ = unsafe { alloc::free_pinned(alloc, raw) };
            return Err(error);
        }
        Ok(NativeCore {
            raw,
            alloc: Arc::clone(alloc),
        })
    }
}

#[cfg(unix)]
impl Drop for NativeCore {
    fn drop(&mut self) {
        match unsafe { self.raw.as_ref().finalize() } {
            Ok(()) => {
                if let Err(error) = unsafe { alloc::free_pinned(&self.alloc, self.raw) } {
                    log::warn!("leaking condition variable storage, deallocation failed: {error}");
                }
            }
            Err(error) => {
                log::warn!("leaking condition variable, host finalization failed: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{system_allocator, CountingAlloc};
    use crate::sync::mutex::Mutex;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_until_signaled_predicate() {
        let alloc = system_allocator();
        let mutex = Arc::new(Mutex::create(&alloc, false).unwrap());
        let cond = Arc::new(CondVar::create(&alloc).unwrap());

        let mutex_waiter = Arc::clone(&mutex);
        let cond_waiter = Arc::clone(&cond);
        let waiter = thread::spawn(move || {
            let mut ready = mutex_waiter.lock().unwrap();
            while !*ready {
                ready = cond_waiter.wait(ready).unwrap();
            }
        });

        thread::sleep(Duration::from_millis(20));
        *mutex.lock().unwrap() = true;
        cond.signal().unwrap();

        waiter.join().expect("waiter should not panic");
    }

    #[test]
    fn test_broadcast_wakes_all_waiters() {
        let alloc = system_allocator();
        let mutex = Arc::new(Mutex::create(&alloc, 0u32).unwrap());
        let cond = Arc::new(CondVar::create(&alloc).unwrap());
        let waiters = 4;

        let handles: Vec<_> = (0..waiters)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                let cond = Arc::clone(&cond);
                thread::spawn(move || {
                    let mut state = mutex.lock().unwrap();
                    *state += 1;
                    while *state != 0 {
                        state = cond.wait(state).unwrap();
                    }
                })
            })
            .collect();

        // Every thread must be inside wait before the broadcast.
        loop {
            let state = mutex.lock().unwrap();
            if *state == waiters {
                break;
            }
            drop(state);
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(20));

        {
            let mut state = mutex.lock().unwrap();
            *state = 0;
            cond.broadcast().unwrap();
        }

        for handle in handles {
            handle.join().expect("waiter should not panic");
        }
    }

    #[test]
    fn test_signal_without_waiter_is_lost() {
        let alloc = system_allocator();
        let mutex = Arc::new(Mutex::create(&alloc, false).unwrap());
        let cond = Arc::new(CondVar::create(&alloc).unwrap());

        // Nobody is waiting; this wake must not be stored.
        cond.signal().unwrap();

        let woke = Arc::new(AtomicBool::new(false));
        let mutex_waiter = Arc::clone(&mutex);
        let cond_waiter = Arc::clone(&cond);
        let woke_waiter = Arc::clone(&woke);
        let waiter = thread::spawn(move || {
            let mut done = mutex_waiter.lock().unwrap();
            while !*done {
                done = cond_waiter.wait(done).unwrap();
            }
            woke_waiter.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(
            !woke.load(Ordering::SeqCst),
            "waiter must still block after a pre-wait signal"
        );

        *mutex.lock().unwrap() = true;
        cond.signal().unwrap();
        waiter.join().expect("waiter should not panic");
        assert!(woke.load(Ordering::SeqCst));
    }

    #[test]
    fn test_second_mutex_rejected_while_waiters_exist() {
        let alloc = system_allocator();
        let first = Arc::new(Mutex::create(&alloc, false).unwrap());
        let second = Mutex::create(&alloc, false).unwrap();
        let cond = Arc::new(CondVar::create(&alloc).unwrap());

        let first_waiter = Arc::clone(&first);
        let cond_waiter = Arc::clone(&cond);
        let waiter = thread::spawn(move || {
            let mut done = first_waiter.lock().unwrap();
            while !*done {
                done = cond_waiter.wait(done).unwrap();
            }
        });

        thread::sleep(Duration::from_millis(20));

        let guard = second.lock().unwrap();
        let result = cond.wait(guard);
        assert_eq!(result.err(), Some(SyncError::Invalid));

        *first.lock().unwrap() = true;
        cond.broadcast().unwrap();
        waiter.join().expect("waiter should not panic");
    }

    #[test]
    fn test_create_destroy_balances_allocations() {
        let counting = Arc::new(CountingAlloc::new());
        let alloc: AllocRef = counting.clone() as AllocRef;

        let cond = CondVar::create(&alloc).unwrap();
        assert!(counting.outstanding() > 0);
        drop(cond);
        assert_eq!(counting.outstanding(), 0);
    }
}
