#![no_std]

//! A two-tier memory allocator for frequent small, same-sized allocations.
//!
//! The crate provides two allocators layered on top of each other:
//!
//! - [`SystemAlloc`](allocators/struct.SystemAlloc.html) is a thin
//!   pass-through over the system heap (`malloc`/`realloc`/`free` behind the
//!   [`SystemHeap`](allocators/trait.SystemHeap.html) trait), extended with a
//!   retry protocol for out-of-memory conditions driven by a replaceable
//!   handler.
//! - [`SegregatedAlloc`](allocators/struct.SegregatedAlloc.html) serves
//!   requests up to 128 bytes from per-size free lists refilled in batches
//!   from a bump-pointer memory pool, and routes anything larger straight to
//!   the system tier.
//!
//! The design is explicitly single-threaded: an allocator is an ordinary
//! value, and callers needing concurrent use must serialize access
//! externally or keep one instance per thread.
//!
//! ```
//! use segalloc::{LibcHeap, SegregatedAlloc};
//!
//! let mut alloc = SegregatedAlloc::<LibcHeap>::default();
//! let p = alloc.allocate(24).unwrap();
//! // The caller keeps track of the size; the allocator does not.
//! unsafe { alloc.deallocate(p, 24).unwrap() };
//! ```

use core::fmt;

#[cfg(test)]
extern crate std;

pub mod allocators;
pub mod classes;
pub mod freelist;
pub mod pool;

pub use allocators::{
    LibcHeap, OomHandler, SegregatedAlloc, Stats, SystemAlloc, SystemHeap, ToyHeap,
};
pub use classes::{GRANULARITY, MAX_BLOCK_SIZE, NUM_CLASSES};

/// Errors surfaced by the allocator.
///
/// Everything recoverable is handled internally (pool exhaustion is absorbed
/// by donation, scavenging and expansion), so this enum is deliberately
/// small.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// A zero-size request was made. Zero bytes map to no size class, so
    /// this is reported immediately rather than silently rounded up.
    ZeroSize,
    /// The system heap could not satisfy a request and no registered handler
    /// recovered. This is not a transient condition: the caller should log
    /// and abort rather than retry.
    OutOfMemory,
    /// Reallocation was requested for a block managed by the pool tier,
    /// which does not support it. Only blocks above
    /// [`MAX_BLOCK_SIZE`](constant.MAX_BLOCK_SIZE.html) can be reallocated.
    ReallocUnsupported,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::ZeroSize => write!(f, "zero-size allocation request"),
            AllocError::OutOfMemory => {
                write!(f, "system heap exhausted and no handler recovered")
            }
            AllocError::ReallocUnsupported => {
                write!(f, "reallocation is not supported for pool-managed blocks")
            }
        }
    }
}
