//! Condition variable emulation for hosts without a native one.
//!
//! Built from host primitives only: two raw mutexes used as critical
//! sections, a counting semaphore carrying wake permits, and an auto-reset
//! event carrying the waiters' acknowledgement back to the waker.
//!
//! The `wake` critical section serializes wait registration against signal
//! and broadcast, and is held by a waker across the release-permits /
//! await-acknowledgement pair. A thread calling `wait` therefore either
//! registered before the waker snapshotted the waiting count, or blocks at
//! registration until the waking phase has fully drained. A late arriver can
//! never steal a permit released for an earlier waiter, and the permit
//! balance of the semaphore returns to zero at steady state.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::alloc::{self, AllocRef};
use crate::error::{Result, SyncError};
use crate::host;
use crate::sync::mutex::MutexGuard;

/// Shared engine state, pinned in allocator storage.
///
/// `waiting` is only modified under `wake_cs` (registration) or `count_cs`
/// (deregistration); `broadcast_in_progress` only under `wake_cs`. Both are
/// atomics because a draining broadcast reads them concurrently with
/// deregistering waiters.
struct WakeState {
    wake_cs: host::RawMutex,
    count_cs: host::RawMutex,
    wake_sem: host::RawSemaphore,
    done_event: host::AutoResetEvent,
    waiting: AtomicUsize,
    broadcast_in_progress: AtomicBool,
}

impl WakeState {
    fn new() -> WakeState {
        WakeState {
            wake_cs: host::RawMutex::new(),
            count_cs: host::RawMutex::new(),
            wake_sem: host::RawSemaphore::new(),
            done_event: host::AutoResetEvent::new(),
            waiting: AtomicUsize::new(0),
            broadcast_in_progress: AtomicBool::new(false),
        }
    }
}

/// Condition variable over mutex + semaphore + auto-reset event.
pub(crate) struct EmulatedCondVar {
    state: NonNull<WakeState>,
    alloc: AllocRef,
}

unsafe impl Send for EmulatedCondVar {}
unsafe impl Sync for EmulatedCondVar {}

impl EmulatedCondVar {
    pub(crate) fn create(alloc: &AllocRef) -> Result<EmulatedCondVar> {
        let state = alloc::alloc_pinned(alloc, WakeState::new())?;

        let release = |error| {
            let _ = unsafe { alloc::free_pinned(alloc, state) };
            Err(error)
        };

        unsafe {
            if let Err(error) = state.as_ref().wake_cs.init() {
                return release(error);
            }
            if let Err(error) = state.as_ref().count_cs.init() {
                let _ = state.as_ref().wake_cs.finalize();
                return release(error);
            }
            if let Err(error) = state.as_ref().wake_sem.init(0) {
                let _ = state.as_ref().count_cs.finalize();
                let _ = state.as_ref().wake_cs.finalize();
                return release(error);
            }
            if let Err(error) = state.as_ref().done_event.init() {
                let _ = state.as_ref().wake_sem.finalize();
                let _ = state.as_ref().count_cs.finalize();
                let _ = state.as_ref().wake_cs.finalize();
                return release(error);
            }
        }

        Ok(EmulatedCondVar {
            state,
            alloc: Arc::clone(alloc),
        })
    }

    fn state(&self) -> &WakeState {
        unsafe { self.state.as_ref() }
    }

    /// Release the guard's mutex, suspend until woken, re-acquire it.
    ///
    /// On an error after the registration step the caller's mutex is not
    /// held when this returns.
    pub(crate) fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> Result<MutexGuard<'a, T>> {
        let mutex = guard.mutex();
        let state = self.state();

        // Registration: only possible while no waking phase is in progress.
        unsafe { state.wake_cs.lock()? };
        state.waiting.fetch_add(1, Ordering::SeqCst);

        // The caller's mutex must be released before blocking on the permit
        // semaphore, and while registration is still serialized, so a waker
        // holding that mutex can enter its waking phase.
        drop(guard);

        if let Err(error) = unsafe { state.wake_cs.unlock() } {
            state.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(error);
        }

        if let Err(error) = unsafe { state.wake_sem.wait() } {
            // Deregister so a later waking phase does not count this thread.
            unsafe {
                let _ = state.wake_cs.lock();
                let _ = state.count_cs.lock();
                state.waiting.fetch_sub(1, Ordering::SeqCst);
                let _ = state.count_cs.unlock();
                let _ = state.wake_cs.unlock();
            }
            return Err(error);
        }

        unsafe { state.count_cs.lock()? };
        let broadcast_in_progress = state.broadcast_in_progress.load(Ordering::SeqCst);
        let remaining = state.waiting.fetch_sub(1, Ordering::SeqCst) - 1;
        unsafe { state.count_cs.unlock()? };

        // A single signalled waiter always acknowledges; during a broadcast
        // only the waiter that drains the count does.
        if !broadcast_in_progress || remaining == 0 {
            unsafe { state.done_event.signal()? };
        }

        mutex.lock()
    }

    /// Wake one registered waiter, if any, and await its acknowledgement.
    pub(crate) fn signal(&self) -> Result<()> {
        let state = self.state();

        unsafe { state.wake_cs.lock()? };

        if state.waiting.load(Ordering::SeqCst) > 0 {
            if let Err(error) = unsafe { state.wake_sem.signal() } {
                let _ = unsafe { state.wake_cs.unlock() };
                return Err(error);
            }
            if let Err(error) = unsafe { state.done_event.wait() } {
                // The permit is already out; the engine cannot return to a
                // valid state. The wake section stays held so later callers
                // fail fast instead of corrupting the permit balance.
                log::error!("condition variable unrecoverable after lost acknowledgement");
                return Err(error);
            }
        }

        unsafe { state.wake_cs.unlock() }
    }

    /// Wake every waiter registered at the time of the call and await the
    /// last one's acknowledgement.
    pub(crate) fn broadcast(&self) -> Result<()> {
        let state = self.state();

        unsafe { state.wake_cs.lock()? };

        let snapshot = state.waiting.load(Ordering::SeqCst);
        if snapshot > 0 {
            let permits = match u32::try_from(snapshot) {
                Ok(permits) => permits,
                Err(_) => {
                    let _ = unsafe { state.wake_cs.unlock() };
                    return Err(SyncError::Invalid);
                }
            };

            state.broadcast_in_progress.store(true, Ordering::SeqCst);

            if let Err(error) = unsafe { state.wake_sem.signal_many(permits) } {
                state.broadcast_in_progress.store(false, Ordering::SeqCst);
                let _ = unsafe { state.wake_cs.unlock() };
                return Err(error);
            }
            if let Err(error) = unsafe { state.done_event.wait() } {
                log::error!("condition variable unrecoverable after lost acknowledgement");
                return Err(error);
            }

            state.broadcast_in_progress.store(false, Ordering::SeqCst);
        }

        unsafe { state.wake_cs.unlock() }
    }

    #[cfg(test)]
    fn waiting_count(&self) -> usize {
        self.state().waiting.load(Ordering::SeqCst)
    }
}

impl Drop for EmulatedCondVar {
    fn drop(&mut self) {
        let finalized = unsafe {
            let state = self.state.as_ref();
            state
                .done_event
                .finalize()
                .and(state.wake_sem.finalize())
                .and(state.count_cs.finalize())
                .and(state.wake_cs.finalize())
        };
        match finalized {
            Ok(()) => {
                if let Err(error) = unsafe { alloc::free_pinned(&self.alloc, self.state) } {
                    log::warn!("leaking condition variable storage, deallocation failed: {error}");
                }
            }
            Err(error) => {
                log::warn!("leaking condition variable, host finalization failed: {error}");
            }
        }
    }
}
