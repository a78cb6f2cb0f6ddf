//! Memory allocation seam used by every primitive constructor and destructor.
//!
//! All host-pinned primitive state (a pthread mutex must never move once
//! initialized) is placed through an [`Allocator`], so callers can account
//! for, replace, or instrument every byte the library acquires. The
//! process-wide default wraps the host's general allocator; custom allocators
//! are either Rust types implementing [`Allocator`] or a C-style capability
//! bundle of three function pointers and an opaque context
//! ([`RawAllocator`]).
//!
//! The deallocation function of an allocator must be able to release any
//! pointer returned by the same allocator's allocation functions; the
//! allocator must outlive every primitive created through it, which the
//! shared [`AllocRef`] handle enforces by reference counting.

use std::alloc::Layout;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use crate::error::{Result, SyncError};

/// Alignment every C-style allocation function is assumed to provide.
///
/// Matches the fundamental alignment of the host's general allocator; layout
/// requests above it are rejected rather than silently under-aligned.
const FUNDAMENTAL_ALIGN: usize = 16;

/// Allocation capability bundle.
///
/// Implementations must be safe to call from multiple threads concurrently
/// if primitives are created or destroyed concurrently.
pub trait Allocator: Send + Sync {
    /// Allocate `layout.size()` bytes at `layout.align()`.
    ///
    /// # Errors
    /// Returns [`SyncError::OutOfMemory`] when the request cannot be
    /// serviced and [`SyncError::Invalid`] for requests the allocator cannot
    /// express (zero size, unsupported alignment).
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>>;

    /// Allocate a zero-initialized contiguous chunk holding `count` elements
    /// of layout `elem`.
    fn zero_alloc(&self, count: usize, elem: Layout) -> Result<NonNull<u8>>;

    /// Release memory previously returned by [`Allocator::alloc`] or
    /// [`Allocator::zero_alloc`] on this allocator.
    ///
    /// # Safety
    /// `ptr` must have been returned by this allocator for an equal `layout`
    /// and must not be used afterwards.
    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) -> Result<()>;
}

/// Shared allocator handle threaded through `create`/`destroy` pairs.
pub type AllocRef = Arc<dyn Allocator>;

/// The process-wide default allocator.
///
/// Static, never torn down. Every clone refers to the same instance, so a
/// `destroy` through any clone is compatible with a `create` through any
/// other.
pub fn system_allocator() -> AllocRef {
    static SYSTEM: OnceLock<AllocRef> = OnceLock::new();
    Arc::clone(SYSTEM.get_or_init(|| Arc::new(SystemAlloc)))
}

// ============================================================================
// System allocator
// ============================================================================

/// Shallow wrapper around the host's general allocator.
///
/// As thread-safe as the host allocator itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAlloc;

impl Allocator for SystemAlloc {
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(SyncError::Invalid);
        }
        // Layout invariants are upheld by the Layout type itself.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(SyncError::OutOfMemory)
    }

    fn zero_alloc(&self, count: usize, elem: Layout) -> Result<NonNull<u8>> {
        let layout = array_layout(count, elem)?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or(SyncError::OutOfMemory)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) -> Result<()> {
        std::alloc::dealloc(ptr.as_ptr(), layout);
        Ok(())
    }
}

fn array_layout(count: usize, elem: Layout) -> Result<Layout> {
    let size = elem
        .size()
        .checked_mul(count)
        .filter(|size| *size > 0)
        .ok_or(SyncError::Invalid)?;
    Layout::from_size_align(size, elem.align()).map_err(|_| SyncError::Invalid)
}

// ============================================================================
// Raw capability bundle
// ============================================================================

/// C-style allocation function: `(context, size) -> pointer or null`.
pub type RawAllocFn = unsafe extern "C" fn(context: *mut c_void, size: usize) -> *mut c_void;

/// C-style zeroing allocation function:
/// `(context, count, elem_size) -> pointer or null`.
pub type RawZeroAllocFn =
    unsafe extern "C" fn(context: *mut c_void, count: usize, elem_size: usize) -> *mut c_void;

/// C-style deallocation function: `(context, pointer) -> 0 on success`.
pub type RawDeallocFn = unsafe extern "C" fn(context: *mut c_void, pointer: *mut c_void) -> i32;

/// Allocator built from three function pointers and an opaque context.
///
/// Intended for callers that bridge a foreign allocator into this library.
/// The bundle is used verbatim: the deallocation function is called with
/// exactly the pointers the allocation functions returned, paired with the
/// same context.
pub struct RawAllocator {
    alloc_fn: RawAllocFn,
    zero_alloc_fn: RawZeroAllocFn,
    dealloc_fn: RawDeallocFn,
    context: *mut c_void,
}

// The constructor contract makes the caller vouch for cross-thread use of
// the context pointer.
unsafe impl Send for RawAllocator {}
unsafe impl Sync for RawAllocator {}

impl RawAllocator {
    /// Bundle three allocation functions and their shared context.
    ///
    /// # Safety
    /// The functions must be callable from any thread, must tolerate
    /// concurrent calls, and the deallocation function must release exactly
    /// the pointers produced by the two allocation functions for the same
    /// `context`. All returned memory must be aligned to at least the host
    /// allocator's fundamental alignment.
    pub unsafe fn new(
        alloc_fn: RawAllocFn,
        zero_alloc_fn: RawZeroAllocFn,
        dealloc_fn: RawDeallocFn,
        context: *mut c_void,
    ) -> RawAllocator {
        RawAllocator {
            alloc_fn,
            zero_alloc_fn,
            dealloc_fn,
            context,
        }
    }
}

impl Allocator for RawAllocator {
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>> {
        if layout.size() == 0 || layout.align() > FUNDAMENTAL_ALIGN {
            return Err(SyncError::Invalid);
        }
        let ptr = unsafe { (self.alloc_fn)(self.context, layout.size()) };
        NonNull::new(ptr.cast()).ok_or(SyncError::OutOfMemory)
    }

    fn zero_alloc(&self, count: usize, elem: Layout) -> Result<NonNull<u8>> {
        let layout = array_layout(count, elem)?;
        if layout.align() > FUNDAMENTAL_ALIGN {
            return Err(SyncError::Invalid);
        }
        let ptr = unsafe { (self.zero_alloc_fn)(self.context, count, elem.size()) };
        NonNull::new(ptr.cast()).ok_or(SyncError::OutOfMemory)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, _layout: Layout) -> Result<()> {
        match (self.dealloc_fn)(self.context, ptr.as_ptr().cast()) {
            0 => Ok(()),
            _ => Err(SyncError::Invalid),
        }
    }
}

// ============================================================================
// Counting allocator
// ============================================================================

/// Allocator that tracks its net outstanding allocation count.
///
/// Delegates to the system allocator. Useful in tests and leak diagnosis: a
/// balanced `create`/`destroy` sequence leaves [`CountingAlloc::outstanding`]
/// unchanged.
#[derive(Debug, Default)]
pub struct CountingAlloc {
    live: std::sync::atomic::AtomicIsize,
}

impl CountingAlloc {
    pub fn new() -> CountingAlloc {
        CountingAlloc::default()
    }

    /// Number of allocations not yet released.
    pub fn outstanding(&self) -> isize {
        self.live.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Allocator for CountingAlloc {
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>> {
        let ptr = SystemAlloc.alloc(layout)?;
        self.live.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(ptr)
    }

    fn zero_alloc(&self, count: usize, elem: Layout) -> Result<NonNull<u8>> {
        let ptr = SystemAlloc.zero_alloc(count, elem)?;
        self.live.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) -> Result<()> {
        SystemAlloc.dealloc(ptr, layout)?;
        self.live.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Pinned placement helpers
// ============================================================================

/// Place `value` in allocator-owned storage at a stable address.
pub(crate) fn alloc_pinned<T>(alloc: &AllocRef, value: T) -> Result<NonNull<T>> {
    let ptr = alloc.alloc(Layout::new::<T>())?.cast::<T>();
    unsafe { ptr.as_ptr().write(value) };
    Ok(ptr)
}

/// Drop and release storage obtained from [`alloc_pinned`].
///
/// # Safety
/// `ptr` must come from [`alloc_pinned`] on the same allocator and must not
/// be used afterwards.
pub(crate) unsafe fn free_pinned<T>(alloc: &AllocRef, ptr: NonNull<T>) -> Result<()> {
    ptr.as_ptr().drop_in_place();
    alloc.dealloc(ptr.cast::<u8>(), Layout::new::<T>())
}
