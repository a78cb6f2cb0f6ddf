//! Hardware-topology queries.
//!
//! Read-only counts of the cores and hardware threads the host reports. Not
//! every host can answer every question: a query the adapter cannot answer
//! returns [`SyncError::Unsupported`](crate::SyncError::Unsupported), and an
//! answer of `n` does not promise that `n` threads can run unhindered.

use crate::error::{Result, SyncError};
use crate::host;

/// Number of processor cores installed in the machine.
pub fn installed_core_count() -> Result<usize> {
    host::installed_core_count().ok_or(SyncError::Unsupported)
}

/// Number of processor cores currently online.
pub fn active_core_count() -> Result<usize> {
    host::active_core_count().ok_or(SyncError::Unsupported)
}

/// Number of hardware threads installed in the machine.
pub fn installed_hwthread_count() -> Result<usize> {
    host::installed_hwthread_count().ok_or(SyncError::Unsupported)
}

/// Number of hardware threads currently online.
pub fn active_hwthread_count() -> Result<usize> {
    host::active_hwthread_count().ok_or(SyncError::Unsupported)
}
