//! Counting semaphore with a host-bounded maximum count.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::alloc::{self, AllocRef};
use crate::error::{Result, SyncError};
use crate::host;

/// Largest count a [`Semaphore`] can hold, as bounded by the host.
pub const SEMAPHORE_COUNT_MAX: u32 = host::SEMAPHORE_COUNT_MAX;

/// A counting semaphore.
///
/// [`Semaphore::wait`] takes a permit, blocking while the count is zero;
/// [`Semaphore::signal`] adds one, waking a waiter. A signal issued before
/// anyone waits is not lost: the count holds the permit until consumed. Each
/// consumed permit synchronizes-with the signal that produced it. Fairness
/// among blocked waiters is unspecified.
pub struct Semaphore {
    raw: NonNull<host::RawSemaphore>,
    alloc: AllocRef,
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Create a semaphore holding `init_count` permits.
    ///
    /// # Errors
    /// [`SyncError::Invalid`](crate::SyncError::Invalid) if `init_count`
    /// exceeds [`SEMAPHORE_COUNT_MAX`];
    /// [`SyncError::OutOfMemory`](crate::SyncError::OutOfMemory) when the
    /// allocator or host cannot service the request. Nothing is left
    /// allocated on failure.
    pub fn create(alloc: &AllocRef, init_count: u32) -> Result<Semaphore> {
        if init_count > SEMAPHORE_COUNT_MAX {
            return Err(SyncError::Invalid);
        }

        let raw = alloc::alloc_pinned(alloc, host::RawSemaphore::new())?;
        if let Err(error) = unsafe { raw.as_ref().init(init_count) } {
            let _ = unsafe { alloc::free_pinned(alloc, raw) };
            return Err(error);
        }
        Ok(Semaphore {
            raw,
            alloc: Arc::clone(alloc),
        })
    }

    /// Take one permit, blocking while none is available.
    pub fn wait(&self) -> Result<()> {
        unsafe { self.raw.as_ref().wait() }
    }

    /// Add one permit, waking one waiter if any.
    ///
    /// # Errors
    /// [`SyncError::Invalid`](crate::SyncError::Invalid) if the count already
    /// holds [`SEMAPHORE_COUNT_MAX`] permits.
    pub fn signal(&self) -> Result<()> {
        unsafe { self.raw.as_ref().signal() }
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        match unsafe { self.raw.as_ref().finalize() } {
            Ok(()) => {
                if let Err(error) = unsafe { alloc::free_pinned(&self.alloc, self.raw) } {
                    log::warn!("leaking semaphore storage, deallocation failed: {error}");
                }
            }
            Err(error) => {
                log::warn!("leaking semaphore, host finalization failed: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{system_allocator, CountingAlloc};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_init_count_above_max_rejected() {
        let alloc = system_allocator();
        let full = Semaphore::create(&alloc, SEMAPHORE_COUNT_MAX).unwrap();
        assert_eq!(full.signal().err(), Some(SyncError::Invalid));

        // The handle stays uninitialized: create returns only the error.
        let result = Semaphore::create(&alloc, SEMAPHORE_COUNT_MAX.wrapping_add(1));
        assert_eq!(result.err(), Some(SyncError::Invalid));
    }

    #[test]
    fn test_wait_blocks_at_zero_until_signal() {
        let alloc = system_allocator();
        let sem = Arc::new(Semaphore::create(&alloc, 0).unwrap());
        let passed = Arc::new(AtomicBool::new(false));

        let sem_waiter = Arc::clone(&sem);
        let passed_waiter = Arc::clone(&passed);
        let waiter = thread::spawn(move || {
            sem_waiter.wait().unwrap();
            passed_waiter.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(
            !passed.load(Ordering::SeqCst),
            "wait on a zero-count semaphore must block"
        );

        sem.signal().unwrap();
        waiter.join().expect("waiter should not panic");
        assert!(passed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_signal_before_wait_is_kept() {
        let alloc = system_allocator();
        let sem = Semaphore::create(&alloc, 0).unwrap();

        sem.signal().unwrap();
        // The permit is banked; this wait consumes it without blocking.
        sem.wait().unwrap();
    }

    #[test]
    fn test_permits_bound_concurrency() {
        let alloc = system_allocator();
        let sem = Arc::new(Semaphore::create(&alloc, 2).unwrap());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sem = Arc::clone(&sem);
                let inside = Arc::clone(&inside);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    sem.wait().unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    sem.signal().unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker should not panic");
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_create_destroy_balances_allocations() {
        let counting = Arc::new(CountingAlloc::new());
        let alloc: AllocRef = counting.clone() as AllocRef;

        let sem = Semaphore::create(&alloc, 1).unwrap();
        assert!(counting.outstanding() > 0);
        drop(sem);
        assert_eq!(counting.outstanding(), 0);
    }

    proptest! {
        /// For any operation sequence kept within bounds, the counting
        /// identity holds: the permits left to drain at the end equal
        /// `init + signals - waits`, and no in-bounds wait ever blocks.
        #[test]
        fn counting_identity_holds(
            init in 0u32..8,
            ops in proptest::collection::vec(any::<bool>(), 0..64),
        ) {
            let alloc = system_allocator();
            let sem = Semaphore::create(&alloc, init).unwrap();

            let mut available = init as i64;
            let mut signals = 0i64;
            let mut waits = 0i64;

            for take in ops {
                if take && available > 0 {
                    sem.wait().unwrap();
                    available -= 1;
                    waits += 1;
                } else {
                    sem.signal().unwrap();
                    available += 1;
                    signals += 1;
                }
            }

            prop_assert_eq!(available, init as i64 + signals - waits);
            for _ in 0..available {
                // Draining the modelled remainder must never block.
                sem.wait().unwrap();
            }
        }
    }
}
