//! Intrusive singly linked lists of free blocks.
//!
//! A [`FreeList`](struct.FreeList.html) chains equal-sized free blocks
//! through their own storage: while a block is free, its first machine word
//! holds a typed [`FreeNode`](struct.FreeNode.html) written with
//! `ptr::write`, and that word is read back only while the block stays free.
//! The moment a block is popped and handed to a caller, the allocator never
//! touches the link again.
//!
//! Unlike a general free-block list, this list never splits, merges or
//! orders its blocks: all blocks on one list have the same size, and reuse
//! is strictly LIFO so the most recently freed block is the next one
//! returned. That is a cache-locality choice, not an accident.

use core::fmt;
use core::mem;
use core::ptr::NonNull;

use static_assertions::const_assert;

use crate::classes::GRANULARITY;

/// The in-place representation of a free block: a link to the next free
/// block of the same size, or `None` at the end of the chain.
///
/// The node is written into the block's first bytes only while the block is
/// free. It carries no size field; the owning list knows the size of every
/// block it holds.
#[repr(C)]
pub struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

// A node must fit into the smallest block we ever hand out, and the
// granularity must cover its alignment.
const_assert!(mem::size_of::<FreeNode>() <= GRANULARITY);
const_assert!(mem::align_of::<FreeNode>() <= GRANULARITY);

/// A LIFO list of equal-sized free blocks.
///
/// Invariants:
///
/// - Every block on the list is at least `GRANULARITY` bytes and aligned to
///   `GRANULARITY`.
/// - Every block is reachable from exactly one list, exactly once.
/// - Links are followed only while the block is on the list.
pub struct FreeList {
    head: Option<NonNull<FreeNode>>,
}

// A FreeList is sendable - as long as the whole chain moves across threads
// together, its fine. It is not Sync; the design is single-threaded.
unsafe impl Send for FreeList {}

impl Default for FreeList {
    fn default() -> Self {
        FreeList::new()
    }
}

impl FreeList {
    pub const fn new() -> Self {
        FreeList { head: None }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Number of blocks on the list. Walks the whole chain.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Push a free block onto the front of the list.
    ///
    /// # Safety
    ///
    /// `ptr` must reference at least `GRANULARITY` bytes of memory aligned
    /// to `GRANULARITY`, not in use by or reachable from any other code, and
    /// ownership of that memory must transfer to the list. The block must be
    /// the same size as every other block on this list; the list cannot
    /// check that.
    pub unsafe fn push(&mut self, ptr: NonNull<u8>) {
        let node: NonNull<FreeNode> = ptr.cast();
        core::ptr::write(node.as_ptr(), FreeNode { next: self.head });
        self.head = Some(node);
    }

    /// Pop the most recently pushed block, surrendering ownership of its
    /// bytes to the caller.
    pub fn pop(&mut self) -> Option<NonNull<u8>> {
        let node = self.head.take()?;
        // The block is still free here, so the link is valid to read.
        self.head = unsafe { node.as_ref().next };
        Some(node.cast())
    }

    /// Iterate over the blocks currently on the list, front to back.
    pub fn iter(&self) -> FreeListIter<'_> {
        FreeListIter {
            next: self.head,
            _list: core::marker::PhantomData,
        }
    }
}

pub struct FreeListIter<'list> {
    next: Option<NonNull<FreeNode>>,
    _list: core::marker::PhantomData<&'list FreeList>,
}

impl<'list> Iterator for FreeListIter<'list> {
    type Item = NonNull<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next.take()?;
        // Borrowing the list guarantees the chain is not mutated under us.
        self.next = unsafe { node.as_ref().next };
        Some(node.cast())
    }
}

impl fmt::Display for FreeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FreeList(")?;
        let mut start = true;
        for block in self.iter() {
            if !start {
                write!(f, ", ")?;
            } else {
                start = false;
            }
            write!(f, "{:?}", block)?;
        }
        write!(f, ")")
    }
}
