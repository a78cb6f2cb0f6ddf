//! Reusable N-party rendezvous point.

use crate::alloc::AllocRef;
use crate::error::{Result, SyncError};
use crate::sync::condvar::CondVar;
use crate::sync::mutex::Mutex;

/// Outcome of [`Barrier::wait`].
///
/// Exactly one arriver per cycle, the one whose arrival fulfilled the
/// barrier, observes [`BarrierWaitOutcome::Serial`]; every other member of
/// that cycle observes [`BarrierWaitOutcome::Member`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierWaitOutcome {
    /// This arrival drove the count to zero and released the cycle.
    Serial,
    /// A regular member of the fulfilled cycle.
    Member,
}

impl BarrierWaitOutcome {
    pub fn is_serial(&self) -> bool {
        matches!(self, BarrierWaitOutcome::Serial)
    }
}

struct CycleState {
    /// Arrivals still missing in the current cycle, in `[1, init_count]`.
    count: u32,
    init_count: u32,
    /// Cycle generation; strictly increases on each fulfilment.
    period: u64,
}

/// A reusable barrier for a fixed party of threads.
///
/// Each cycle admits exactly `init_count` arrivals; the cycle's members leave
/// together once the last one arrives, and the barrier is immediately ready
/// for the next cycle. Arrivals for cycle `k + 1` never release threads still
/// leaving cycle `k`: a waiter only leaves once the generation has advanced
/// past the one it entered with.
///
/// Writes made by any member before its wait are visible to every member
/// after the wait returns.
pub struct Barrier {
    sync_point: Mutex<CycleState>,
    waking: CondVar,
}

impl Barrier {
    /// Create a barrier for `init_count` threads.
    ///
    /// # Errors
    /// [`SyncError::Invalid`](crate::SyncError::Invalid) if `init_count` is
    /// zero; allocation and host failures as usual. Nothing is left
    /// allocated on failure.
    pub fn create(alloc: &AllocRef, init_count: u32) -> Result<Barrier> {
        if init_count == 0 {
            return Err(SyncError::Invalid);
        }

        let sync_point = Mutex::create(
            alloc,
            CycleState {
                count: init_count,
                init_count,
                period: 0,
            },
        )?;
        let waking = CondVar::create(alloc)?;

        Ok(Barrier { sync_point, waking })
    }

    /// Arrive at the barrier and block until the current cycle is fulfilled.
    pub fn wait(&self) -> Result<BarrierWaitOutcome> {
        let mut state = self.sync_point.lock()?;

        debug_assert!(state.count > 0, "barrier count underflow imminent");
        state.count -= 1;

        if state.count == 0 {
            state.period = state.period.wrapping_add(1);
            state.count = state.init_count;
            self.waking.broadcast()?;
            return Ok(BarrierWaitOutcome::Serial);
        }

        let arrival_period = state.period;
        while state.period == arrival_period {
            state = self.waking.wait(state)?;
        }
        Ok(BarrierWaitOutcome::Member)
    }
}

impl Drop for Barrier {
    fn drop(&mut self) {
        let state = self.sync_point.get_mut();
        if state.count != state.init_count {
            log::warn!(
                "barrier dropped while {} arrivals are outstanding",
                state.init_count - state.count
            );
            debug_assert_eq!(state.count, state.init_count);
        }
    }
}
