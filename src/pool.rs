//! The bump-pointer memory pool feeding the free-list refill path.
//!
//! A [`Pool`](struct.Pool.html) owns one contiguous region `[head, tail)` of
//! raw bytes obtained in bulk from the system tier. Claiming memory only
//! ever advances `head`; freed blocks go back to a free list, never back to
//! the region. When the region runs dry it is replaced wholesale with a new,
//! larger one - the old bytes have all been handed out or donated by then,
//! so nothing is lost and nothing is ever returned to the operating system.

use core::ptr::{null_mut, NonNull};

use crate::classes::GRANULARITY;

/// A bump-allocated arena of unclaimed pool storage.
///
/// Invariants:
///
/// - `head <= tail`; the bytes in `[head, tail)` are owned by the pool and
///   reachable from nowhere else.
/// - `head` is always aligned to `GRANULARITY`, because the region starts
///   aligned and is only ever advanced by multiples of the granularity.
/// - `total_from_system` never decreases.
pub struct Pool {
    head: *mut u8,
    tail: *mut u8,
    total_from_system: usize,
}

// A Pool is sendable: the whole region moves with it. Not Sync.
unsafe impl Send for Pool {}

impl Default for Pool {
    fn default() -> Self {
        Pool::new()
    }
}

impl Pool {
    /// Create an empty pool. The first claim will force an expansion.
    pub const fn new() -> Self {
        Pool {
            head: null_mut(),
            tail: null_mut(),
            total_from_system: 0,
        }
    }

    /// Unclaimed bytes left in the current region.
    pub fn remaining(&self) -> usize {
        self.tail as usize - self.head as usize
    }

    /// Running total of bytes ever obtained from the system for this pool.
    /// Used to size future expansions.
    pub fn total_from_system(&self) -> usize {
        self.total_from_system
    }

    /// Record that `bytes` were obtained from the system for this pool.
    pub fn record_from_system(&mut self, bytes: usize) {
        self.total_from_system += bytes;
    }

    /// Claim `bytes` from the front of the region, advancing `head`.
    ///
    /// # Safety
    ///
    /// `bytes` must be a nonzero multiple of `GRANULARITY` no greater than
    /// `remaining()`. The returned memory leaves the pool for good; the
    /// caller owns it from here on.
    pub unsafe fn bump(&mut self, bytes: usize) -> NonNull<u8> {
        debug_assert!(bytes > 0 && bytes <= self.remaining());
        debug_assert!(bytes % GRANULARITY == 0);

        let claimed = NonNull::new_unchecked(self.head);
        self.head = self.head.add(bytes);
        claimed
    }

    /// Install a new region, discarding the old cursors.
    ///
    /// # Safety
    ///
    /// `region` must reference `len` bytes aligned to `GRANULARITY`, owned
    /// by nothing else, and `len` must be a multiple of `GRANULARITY`. The
    /// previous region must already be empty or fully donated; its bytes are
    /// unreachable from the pool afterwards.
    pub unsafe fn replace(&mut self, region: NonNull<u8>, len: usize) {
        debug_assert!(len % GRANULARITY == 0);

        self.head = region.as_ptr();
        self.tail = region.as_ptr().add(len);
    }
}
