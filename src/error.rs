//! Error type shared by every operation in the crate.
//!
//! The set of outcomes is closed: an operation either succeeds or reports
//! exactly one of the variants below. Errors are always returned, never
//! panicked, so a caller that unwinds on the first failure does not leak
//! library resources.

/// Error for threading and synchronization operations.
///
/// Constructors that fail release everything they acquired before returning,
/// leaving the caller's state untouched. Destruction paths that cannot
/// finalize a host resource log the problem and leak rather than free memory
/// in an undefined state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Memory, or a bounded kernel resource behaving like memory, is
    /// exhausted. No state was changed.
    #[error("out of memory")]
    OutOfMemory,

    /// The operation would have violated a "not in use" precondition, such
    /// as acquiring a held lock without blocking or reconfiguring launched
    /// threads.
    #[error("resource is busy or still in use")]
    Busy,

    /// Reserved for timed wait variants; no current operation produces it.
    #[error("timed out waiting on a busy resource")]
    Timeout,

    /// The host adapter does not implement the query.
    #[error("operation not supported by this host")]
    Unsupported,

    /// Catch-all for contract violations: invalid handle, invalid argument,
    /// wrong lifecycle state, or a host-level failure. No state change is
    /// expected.
    #[error("invalid argument, handle state, or host failure")]
    Invalid,
}

pub type Result<T> = std::result::Result<T, SyncError>;
