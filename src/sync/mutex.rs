//! Non-recursive mutual exclusion lock owning the data it protects.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::alloc::{self, AllocRef};
use crate::error::Result;
use crate::host;

/// A mutual exclusion lock protecting a value of type `T`.
///
/// The host lock lives in allocator-pinned storage, so the handle itself can
/// move freely. Locking returns a [`MutexGuard`] that releases the lock when
/// dropped; unlocking by a thread that does not hold the lock is therefore
/// unrepresentable. The lock is non-recursive: a second `lock` from the
/// holding thread deadlocks in release builds and returns
/// [`SyncError::Invalid`](crate::SyncError::Invalid) in debug builds, where
/// the host mutex is created with error checking.
///
/// A successful unlock happens-before the next successful lock of the same
/// mutex on any thread. There is no fairness guarantee and no poisoning; a
/// panicking holder simply releases the lock on unwind.
pub struct Mutex<T> {
    raw: NonNull<host::RawMutex>,
    alloc: AllocRef,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create a mutex protecting `value`.
    ///
    /// # Errors
    /// [`SyncError::OutOfMemory`](crate::SyncError::OutOfMemory) if the
    /// allocator or the host cannot service the request;
    /// [`SyncError::Invalid`](crate::SyncError::Invalid) on host failure.
    /// Nothing is left allocated on failure.
    pub fn create(alloc: &AllocRef, value: T) -> Result<Mutex<T>> {
        let raw = alloc::alloc_pinned(alloc, host::RawMutex::new())?;
        if let Err(error) = unsafe { raw.as_ref().init() } {
            let _ = unsafe { alloc::free_pinned(alloc, raw) };
            return Err(error);
        }
        Ok(Mutex {
            raw,
            alloc: Arc::clone(alloc),
            data: UnsafeCell::new(value),
        })
    }

    /// Acquire the lock, blocking until it is available.
    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        unsafe { self.raw.as_ref().lock()? };
        Ok(MutexGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Acquire the lock only if it is free.
    ///
    /// # Errors
    /// [`SyncError::Busy`](crate::SyncError::Busy) when another thread holds
    /// the lock.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>> {
        unsafe { self.raw.as_ref().try_lock()? };
        Ok(MutexGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Mutable access without locking; safe because `&mut self` proves no
    /// guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub(crate) fn raw(&self) -> &host::RawMutex {
        unsafe { self.raw.as_ref() }
    }

    /// Stable identity of the host lock, used to enforce the one-mutex rule
    /// of condition variables.
    pub(crate) fn raw_addr(&self) -> usize {
        self.raw.as_ptr() as usize
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        // A held or waited-on mutex cannot reach this point through safe
        // code; a finalize failure still must not free the host state.
        match unsafe { self.raw.as_ref().finalize() } {
            Ok(()) => {
                if let Err(error) = unsafe { alloc::free_pinned(&self.alloc, self.raw) } {
                    log::warn!("leaking mutex storage, deallocation failed: {error}");
                }
            }
            Err(error) => {
                log::warn!("leaking mutex, host finalization failed: {error}");
            }
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("Mutex");
        match self.try_lock() {
            Ok(guard) => out.field("data", &*guard).finish(),
            Err(_) => out.field("data", &"<locked>").finish(),
        }
    }
}

// ============================================================================
// Guard
// ============================================================================

/// Scoped proof of lock ownership; dereferences to the protected value.
///
/// The lock is released when the guard drops. Guards stay on the locking
/// thread (they are not `Send`) because the host requires unlock and lock to
/// happen on the same thread.
pub struct MutexGuard<'a, T> {
    lock: &'a Mutex<T>,
    _not_send: PhantomData<*mut ()>,
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T> MutexGuard<'a, T> {
    /// The mutex this guard locks, with the borrow's full lifetime.
    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.lock
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(error) = unsafe { self.lock.raw.as_ref().unlock() } {
            log::warn!("mutex unlock failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{system_allocator, CountingAlloc};
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lock_unlock() {
        let alloc = system_allocator();
        let mutex = Mutex::create(&alloc, 42i32).expect("create should succeed");

        {
            let guard = mutex.lock().expect("lock should succeed");
            assert_eq!(*guard, 42);
        }

        // Lock again to verify the guard released it.
        let guard = mutex.lock().expect("second lock should succeed");
        assert_eq!(*guard, 42);
    }

    #[test]
    fn test_try_lock_reports_busy() {
        let alloc = system_allocator();
        let mutex = Arc::new(Mutex::create(&alloc, 0i32).unwrap());
        let mutex_for_thread = Arc::clone(&mutex);

        let guard = mutex.lock().expect("lock should succeed");

        let observed = thread::spawn(move || mutex_for_thread.try_lock().err())
            .join()
            .expect("thread should not panic");
        assert_eq!(observed, Some(SyncError::Busy));

        drop(guard);
        assert!(mutex.try_lock().is_ok());
    }

    #[test]
    fn test_contended_increments() {
        let alloc = system_allocator();
        let mutex = Arc::new(Mutex::create(&alloc, 0usize).unwrap());
        let threads = 4;
        let iterations = 1000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    for _ in 0..iterations {
                        let mut guard = mutex.lock().expect("lock should succeed");
                        *guard += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("thread should not panic");
        }

        assert_eq!(*mutex.lock().unwrap(), threads * iterations);
    }

    #[test]
    fn test_unlock_synchronizes_with_lock() {
        let alloc = system_allocator();
        let mutex = Arc::new(Mutex::create(&alloc, Vec::<u32>::new()).unwrap());
        let mutex_for_thread = Arc::clone(&mutex);
        let started = Arc::new(AtomicBool::new(false));
        let started_for_thread = Arc::clone(&started);

        let writer = thread::spawn(move || {
            let mut guard = mutex_for_thread.lock().unwrap();
            guard.push(7);
            started_for_thread.store(true, Ordering::SeqCst);
            // Keep the lock briefly so the reader contends.
            thread::sleep(Duration::from_millis(10));
        });

        while !started.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        let guard = mutex.lock().unwrap();
        assert_eq!(*guard, vec![7]);
        drop(guard);

        writer.join().expect("writer should not panic");
    }

    #[test]
    fn test_create_destroy_balances_allocations() {
        let counting = Arc::new(CountingAlloc::new());
        let alloc: AllocRef = counting.clone() as AllocRef;

        let mutex = Mutex::create(&alloc, 5u8).unwrap();
        assert!(counting.outstanding() > 0);
        drop(mutex);
        assert_eq!(counting.outstanding(), 0);
    }

    #[cfg(all(unix, debug_assertions))]
    #[test]
    fn test_recursive_lock_detected_in_debug() {
        let alloc = system_allocator();
        let mutex = Mutex::create(&alloc, ()).unwrap();

        let _guard = mutex.lock().expect("first lock should succeed");
        // The error-checking host mutex refuses the relock instead of
        // deadlocking.
        assert_eq!(mutex.lock().err(), Some(SyncError::Invalid));
    }

    #[test]
    fn test_get_mut_without_locking() {
        let alloc = system_allocator();
        let mut mutex = Mutex::create(&alloc, String::from("a")).unwrap();
        mutex.get_mut().push('b');
        assert_eq!(&*mutex.lock().unwrap(), "ab");
    }
}
