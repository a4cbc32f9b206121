//! Size classes: the fixed partition of small request sizes into buckets.
//!
//! Small requests are rounded up to the next multiple of
//! [`GRANULARITY`](constant.GRANULARITY.html) and served from a bucket of
//! free blocks of exactly that size. Class `i` covers block size
//! `(i + 1) * GRANULARITY`, up to
//! [`MAX_BLOCK_SIZE`](constant.MAX_BLOCK_SIZE.html); anything larger
//! bypasses the table entirely.

use static_assertions::const_assert;

use crate::freelist::FreeList;
use crate::AllocError;

/// Block size increment, and the alignment of every block the pool tier
/// hands out. Must be a power of two for `round_up` to be a bitmask.
pub const GRANULARITY: usize = 8;

/// Largest block size served from a free list; bigger requests go straight
/// to the system tier.
pub const MAX_BLOCK_SIZE: usize = 128;

/// Number of size classes.
pub const NUM_CLASSES: usize = MAX_BLOCK_SIZE / GRANULARITY;

const_assert!(GRANULARITY.is_power_of_two());
const_assert!(MAX_BLOCK_SIZE % GRANULARITY == 0);

/// Round `size` up to the next multiple of the granularity.
///
/// Correct only because `GRANULARITY` is a power of two, which the constant
/// assertion above pins down.
pub const fn round_up(size: usize) -> usize {
    (size + GRANULARITY - 1) & !(GRANULARITY - 1)
}

/// Map a strictly positive size to its class index.
///
/// Zero is an error, not a rounding case: zero bytes belong to no class,
/// and silently serving such a request would hide a caller bug.
pub fn class_index(size: usize) -> Result<usize, AllocError> {
    if size == 0 {
        return Err(AllocError::ZeroSize);
    }
    Ok((size - 1) / GRANULARITY)
}

/// The block size covered by class `index`.
pub const fn block_size(index: usize) -> usize {
    (index + 1) * GRANULARITY
}

/// The table of free lists, one per size class, all initially empty.
pub struct ClassTable {
    lists: [FreeList; NUM_CLASSES],
}

impl Default for ClassTable {
    fn default() -> Self {
        ClassTable::new()
    }
}

impl ClassTable {
    pub const fn new() -> Self {
        ClassTable {
            lists: [
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
                FreeList::new(),
            ],
        }
    }

    pub fn list(&self, index: usize) -> &FreeList {
        &self.lists[index]
    }

    pub fn list_mut(&mut self, index: usize) -> &mut FreeList {
        &mut self.lists[index]
    }

    /// Total number of blocks across all lists. Walks every chain.
    pub fn free_blocks(&self) -> usize {
        self.lists.iter().map(FreeList::len).sum()
    }

    /// Total bytes held across all lists.
    pub fn free_bytes(&self) -> usize {
        self.lists
            .iter()
            .enumerate()
            .map(|(i, list)| list.len() * block_size(i))
            .sum()
    }

    /// Per-class block counts, mostly useful in tests.
    pub fn census(&self) -> [usize; NUM_CLASSES] {
        let mut counts = [0; NUM_CLASSES];
        for (i, list) in self.lists.iter().enumerate() {
            counts[i] = list.len();
        }
        counts
    }
}
