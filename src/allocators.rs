//! The two allocator tiers, and the heap primitives underneath them.
//!
//! ## Basic Types
//!
//! ### [`SystemHeap`](trait.SystemHeap.html)
//!
//! `SystemHeap` is a simple trait interface meant to abstract over the raw,
//! fallible allocate/reallocate/free primitives of the underlying system
//! heap. [`LibcHeap`](struct.LibcHeap.html) implements it over
//! `malloc`/`realloc`/`free`.
//!
//! ### [`SystemAlloc`](struct.SystemAlloc.html)
//!
//! A `SystemAlloc` is a thin pass-through over a `SystemHeap` that never
//! silently returns null: when a raw call fails, it invokes a registered
//! out-of-memory handler (expected to release memory elsewhere) and retries,
//! for as long as a handler is registered.
//!
//! ### [`SegregatedAlloc`](struct.SegregatedAlloc.html)
//!
//! A `SegregatedAlloc` routes small requests (up to
//! [`MAX_BLOCK_SIZE`](../classes/constant.MAX_BLOCK_SIZE.html) bytes) through
//! per-size free lists refilled in batches from a bump-pointer
//! [`Pool`](../pool/struct.Pool.html), and delegates everything larger to the
//! `SystemAlloc` tier. It is single-threaded by design.
//!
//! ### [`ToyHeap`](struct.ToyHeap.html)
//!
//! `ToyHeap` is a fixed array that can pretend to be a system heap, with a
//! fault-injection knob to make raw calls fail on demand. It is mainly
//! useful for testing.

use core::ptr::NonNull;

use log::{debug, trace};

use crate::classes::{class_index, round_up, ClassTable};
use crate::classes::{GRANULARITY, MAX_BLOCK_SIZE, NUM_CLASSES};
use crate::pool::Pool;
use crate::AllocError;

/// How many blocks a refill asks the pool for. The pool may deliver fewer.
pub const DEFAULT_BATCH: usize = 20;

/// An out-of-memory handler: invoked when the system heap fails a raw call,
/// and expected to release memory elsewhere (drop a cache, say) before the
/// call is retried.
pub type OomHandler = fn();

/// The raw, fallible primitives of a system heap.
pub trait SystemHeap {
    /// Allocate `size` bytes, aligned to at least `GRANULARITY`. Returns
    /// null on failure.
    ///
    /// # Safety
    ///
    /// On success the returned memory must be untracked by any other code,
    /// including the allocator itself.
    unsafe fn raw_allocate(&mut self, size: usize) -> *mut u8;

    /// Resize the allocation at `ptr` from `old_size` to `new_size` bytes,
    /// possibly moving it. Returns null on failure, in which case `ptr`
    /// remains valid.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `raw_allocate` or `raw_reallocate` on this
    /// heap, with `old_size` matching the size it was last given.
    unsafe fn raw_reallocate(&mut self, ptr: *mut u8, old_size: usize, new_size: usize)
        -> *mut u8;

    /// Release the allocation at `ptr`. Always succeeds.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `raw_allocate` or `raw_reallocate` on this
    /// heap and must not be used afterwards.
    unsafe fn raw_deallocate(&mut self, ptr: *mut u8, size: usize);
}

/// The process heap, via libc's `malloc`, `realloc` and `free`.
#[derive(Default)]
pub struct LibcHeap;

impl SystemHeap for LibcHeap {
    unsafe fn raw_allocate(&mut self, size: usize) -> *mut u8 {
        libc::malloc(size) as *mut u8
    }

    unsafe fn raw_reallocate(
        &mut self,
        ptr: *mut u8,
        _old_size: usize,
        new_size: usize,
    ) -> *mut u8 {
        libc::realloc(ptr as *mut libc::c_void, new_size) as *mut u8
    }

    unsafe fn raw_deallocate(&mut self, ptr: *mut u8, _size: usize) {
        libc::free(ptr as *mut libc::c_void)
    }
}

const TOY_HEAP_SIZE: usize = 256 * 1024;

// Keeps the toy heap's carving granularity-aligned no matter where the
// struct lands.
#[repr(C, align(16))]
struct ToyStorage([u8; TOY_HEAP_SIZE]);

/// A fixed-size array that can pretend to be a system heap.
///
/// Freed memory is never reclaimed - a deallocation is a leak - which is
/// fine for its purpose: exercising the allocators above it in tests and
/// demos. Setting `fail_next` makes the next raw calls report exhaustion,
/// for driving the out-of-memory paths deterministically.
pub struct ToyHeap {
    /// Bytes handed out so far.
    pub size: usize,
    /// Number of upcoming raw allocations to fail on purpose.
    pub fail_next: usize,
    heap: ToyStorage,
}

impl Default for ToyHeap {
    fn default() -> Self {
        ToyHeap {
            size: 0,
            fail_next: 0,
            heap: ToyStorage([0; TOY_HEAP_SIZE]),
        }
    }
}

impl ToyHeap {
    pub const fn capacity() -> usize {
        TOY_HEAP_SIZE
    }
}

impl SystemHeap for ToyHeap {
    unsafe fn raw_allocate(&mut self, size: usize) -> *mut u8 {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return core::ptr::null_mut();
        }

        // Carve on granularity boundaries so every pointer is well aligned.
        let take = round_up(size);
        if self.size + take > TOY_HEAP_SIZE {
            return core::ptr::null_mut();
        }

        let ptr = self.heap.0.as_mut_ptr().add(self.size);
        self.size += take;
        ptr
    }

    unsafe fn raw_reallocate(&mut self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        let fresh = self.raw_allocate(new_size);
        if fresh.is_null() {
            return fresh;
        }
        core::ptr::copy_nonoverlapping(ptr, fresh, old_size.min(new_size));
        // The old block leaks; a toy heap cannot reclaim.
        fresh
    }

    unsafe fn raw_deallocate(&mut self, _ptr: *mut u8, _size: usize) {}
}

/// A pass-through allocator over a [`SystemHeap`](trait.SystemHeap.html),
/// with a retry protocol for out-of-memory conditions.
///
/// When a raw call fails and a handler is registered, the handler is given a
/// chance to free memory and the call is retried, indefinitely. With no
/// handler registered the failure is final:
/// [`AllocError::OutOfMemory`](../enum.AllocError.html) is explicitly
/// unrecoverable, and the caller should log and abort rather than retry.
pub struct SystemAlloc<H> {
    pub heap: H,
    /// Successful raw allocations so far. Just for tracking, but tests lean
    /// on it to prove the scavenging path never touches the system.
    pub allocations: usize,
    handler: Option<OomHandler>,
}

impl<H: SystemHeap + Default> Default for SystemAlloc<H> {
    fn default() -> Self {
        SystemAlloc::new(H::default())
    }
}

impl<H: SystemHeap> SystemAlloc<H> {
    pub fn new(heap: H) -> Self {
        SystemAlloc {
            heap,
            allocations: 0,
            handler: None,
        }
    }

    /// Install a new out-of-memory handler (or remove one with `None`),
    /// returning the previous handler so callers can compose or restore it.
    pub fn set_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        core::mem::replace(&mut self.handler, handler)
    }

    /// One raw allocation attempt, with no handler involvement. The pool
    /// uses this before falling back to scavenging.
    pub fn try_allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let ptr = NonNull::new(unsafe { self.heap.raw_allocate(size) })?;
        self.allocations += 1;
        Some(ptr)
    }

    /// Allocate `size` bytes, retrying through the handler on exhaustion.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        // malloc(0) may legally return null, which the retry loop below
        // would misread as exhaustion.
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        loop {
            if let Some(ptr) = self.try_allocate(size) {
                return Ok(ptr);
            }
            // Re-read the handler every round; a handler may be swapped out
            // between retries.
            let handler = self.handler.ok_or(AllocError::OutOfMemory)?;
            debug!("raw allocation of {} bytes failed, invoking handler", size);
            handler();
        }
    }

    /// Release `size` bytes at `ptr`. Always succeeds.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator with this size, and must not
    /// be used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
        self.heap.raw_deallocate(ptr.as_ptr(), size);
    }

    /// Resize the allocation at `ptr`, retrying through the handler on
    /// exhaustion, exactly like `allocate`.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator with size `old_size`. On
    /// success the old pointer must not be used again.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if new_size == 0 {
            return Err(AllocError::ZeroSize);
        }

        loop {
            let fresh = self.heap.raw_reallocate(ptr.as_ptr(), old_size, new_size);
            if let Some(fresh) = NonNull::new(fresh) {
                self.allocations += 1;
                return Ok(fresh);
            }
            let handler = self.handler.ok_or(AllocError::OutOfMemory)?;
            debug!(
                "raw reallocation to {} bytes failed, invoking handler",
                new_size
            );
            handler();
        }
    }
}

/// A point-in-time census of a [`SegregatedAlloc`](struct.SegregatedAlloc.html).
#[derive(Default, Debug)]
pub struct Stats {
    /// Blocks currently on free lists.
    pub free_blocks: usize,
    /// Bytes currently on free lists.
    pub free_bytes: usize,
    /// Unclaimed bytes left in the pool region.
    pub pool_remaining: usize,
    /// Bytes ever obtained from the system for the pool. Non-decreasing.
    pub total_from_system: usize,
    /// Successful raw system allocations, pool chunks and large requests
    /// alike.
    pub system_allocations: usize,
}

/// The segregated free-list allocator: per-size LIFO free lists over a
/// bump-pointer pool, with the system tier behind both.
///
/// Requests whose rounded size exceeds `MAX_BLOCK_SIZE` bypass the pool and
/// go straight to the [`SystemAlloc`](struct.SystemAlloc.html); everything
/// else is served from its size class in O(1), refilling from the pool in
/// batches when a list runs dry.
///
/// All state lives in the value itself. Instances are independent, and none
/// of this is thread-safe; callers needing concurrency must serialize
/// externally or keep an instance per thread.
///
/// Note: there is no pool teardown. Dropping the allocator abandons the
/// region and any free-listed blocks; memory obtained from the system for
/// the pool is never handed back.
pub struct SegregatedAlloc<H> {
    pub system: SystemAlloc<H>,
    classes: ClassTable,
    pool: Pool,
}

impl<H: SystemHeap + Default> Default for SegregatedAlloc<H> {
    fn default() -> Self {
        SegregatedAlloc::new(H::default())
    }
}

impl<H: SystemHeap> SegregatedAlloc<H> {
    pub fn new(heap: H) -> Self {
        SegregatedAlloc {
            system: SystemAlloc::new(heap),
            classes: ClassTable::new(),
            pool: Pool::new(),
        }
    }

    /// Install a new out-of-memory handler, returning the previous one.
    pub fn set_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        self.system.set_handler(handler)
    }

    /// Get statistics on this allocator.
    pub fn stats(&self) -> Stats {
        Stats {
            free_blocks: self.classes.free_blocks(),
            free_bytes: self.classes.free_bytes(),
            pool_remaining: self.pool.remaining(),
            total_from_system: self.pool.total_from_system(),
            system_allocations: self.system.allocations,
        }
    }

    /// Per-class free-block counts.
    pub fn class_census(&self) -> [usize; NUM_CLASSES] {
        self.classes.census()
    }

    /// Allocate `size` bytes.
    ///
    /// Small requests come back rounded up to the granularity, aligned to
    /// it, and reused LIFO within their size class. Zero-size requests are
    /// an error.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if round_up(size) > MAX_BLOCK_SIZE {
            return self.system.allocate(size);
        }

        let index = class_index(size)?;
        if let Some(block) = self.classes.list_mut(index).pop() {
            trace!("class {} served {:?} from its free list", index, block);
            return Ok(block);
        }

        self.refill(round_up(size))
    }

    /// Deallocate (or "free") a block of `size` bytes.
    ///
    /// Small blocks are pushed onto their class's free list; there is no
    /// coalescing, and no validation that `ptr` and `size` were ever issued
    /// together - that is the caller's contract.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator for a request of
    /// `size` bytes, and must not be used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), AllocError> {
        if round_up(size) > MAX_BLOCK_SIZE {
            self.system.deallocate(ptr, size);
            return Ok(());
        }

        let index = class_index(size)?;
        self.classes.list_mut(index).push(ptr);
        Ok(())
    }

    /// Resize a block. Only blocks above `MAX_BLOCK_SIZE` support this: the
    /// pool tier has no growth path for its blocks, so resizing one returns
    /// [`AllocError::ReallocUnsupported`](../enum.AllocError.html) and the
    /// caller should allocate-copy-free instead.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator for a request of
    /// `old_size` bytes. On success the old pointer must not be used again.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if round_up(old_size) > MAX_BLOCK_SIZE && round_up(new_size) > MAX_BLOCK_SIZE {
            return self.system.reallocate(ptr, old_size, new_size);
        }
        Err(AllocError::ReallocUnsupported)
    }

    /// Replenish the free list for `size`-byte blocks and return one of
    /// them.
    ///
    /// Asks the pool for a batch; if only one block was obtainable it goes
    /// straight to the caller, otherwise the surplus is chained into the
    /// class's free list.
    fn refill(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(size % GRANULARITY == 0 && size <= MAX_BLOCK_SIZE);

        let index = class_index(size)?;
        let (chunk, obtained) = self.pool_allocate(size, DEFAULT_BATCH)?;
        debug!(
            "refilled class {} with {} block(s) of {} bytes",
            index, obtained, size
        );

        if obtained == 1 {
            return Ok(chunk);
        }

        let list = self.classes.list_mut(index);
        for i in 1..obtained {
            // Each block past the first becomes a free-list node.
            let block = unsafe { NonNull::new_unchecked(chunk.as_ptr().add(i * size)) };
            unsafe { list.push(block) };
        }

        Ok(chunk)
    }

    /// Claim up to `requested` blocks of `size` bytes from the pool,
    /// returning a pointer to the first and the count actually delivered.
    ///
    /// Never returns a partial block. On exhaustion the pool escalates:
    /// donate any sub-block remainder to its exact size class, then grow
    /// from the system, then scavenge a spare block from a larger class,
    /// then fall back to the system tier's full out-of-memory protocol.
    fn pool_allocate(
        &mut self,
        size: usize,
        mut requested: usize,
    ) -> Result<(NonNull<u8>, usize), AllocError> {
        let needed = size * requested;
        let remaining = self.pool.remaining();

        if remaining >= needed {
            let chunk = unsafe { self.pool.bump(needed) };
            return Ok((chunk, requested));
        }

        if remaining >= size {
            // Deliver as many whole blocks as fit.
            requested = remaining / size;
            let chunk = unsafe { self.pool.bump(requested * size) };
            return Ok((chunk, requested));
        }

        // Less than one block left. Whatever remains is an exact multiple of
        // the granularity, so it fits some class exactly; donate it rather
        // than leak it.
        if remaining > 0 {
            let leftover = unsafe { self.pool.bump(remaining) };
            let index = class_index(remaining)?;
            trace!(
                "donating {} leftover pool bytes to class {}",
                remaining,
                index
            );
            unsafe { self.classes.list_mut(index).push(leftover) };
        }

        // Twice the immediate need, plus a share that grows with cumulative
        // consumption. The same shape as geometric growth in a dynamic
        // array; the constants are tunable.
        let chunk_size = 2 * needed + round_up(self.pool.total_from_system() / 16);

        if let Some(region) = self.system.try_allocate(chunk_size) {
            debug!("pool expanded by {} bytes from the system", chunk_size);
            self.pool.record_from_system(chunk_size);
            unsafe { self.pool.replace(region, chunk_size) };
            return self.pool_allocate(size, requested);
        }

        // The system is out of easy memory. Before invoking the heavy
        // protocol, repurpose a spare block from a larger class as the new
        // pool region; this reclaims fragmented free memory first.
        let mut scavenge = size + GRANULARITY;
        while scavenge <= MAX_BLOCK_SIZE {
            let index = class_index(scavenge)?;
            if let Some(block) = self.classes.list_mut(index).pop() {
                debug!(
                    "scavenged a {}-byte block from class {} as new pool region",
                    scavenge, index
                );
                unsafe { self.pool.replace(block, scavenge) };
                return self.pool_allocate(size, requested);
            }
            scavenge += GRANULARITY;
        }

        // Nothing to scavenge either; let the system tier run its handler
        // loop. Either it delivers, or the failure is final.
        let region = self.system.allocate(chunk_size)?;
        self.pool.record_from_system(chunk_size);
        unsafe { self.pool.replace(region, chunk_size) };
        self.pool_allocate(size, requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::vec::Vec;

    use test_log::test;

    use crate::classes;

    #[test]
    fn batch_refill_end_to_end() {
        let mut alloc = SegregatedAlloc::<ToyHeap>::default();

        let mut pointers = Vec::new();
        for _ in 0..25 {
            pointers.push(alloc.allocate(8).unwrap());
        }

        // One pool chunk covered everything: 2 * 8 * 20 = 320 bytes, with a
        // zero growth share on a virgin allocator.
        let stats = alloc.stats();
        assert_eq!(stats.system_allocations, 1);
        assert_eq!(stats.total_from_system, 320);
        assert_eq!(stats.pool_remaining, 0);
        // Two refills of 20, minus 25 live blocks.
        assert_eq!(alloc.class_census()[0], 15);

        for p in &pointers {
            assert_eq!(p.as_ptr() as usize % GRANULARITY, 0);
        }

        let mut addresses: Vec<usize> = pointers.iter().map(|p| p.as_ptr() as usize).collect();
        addresses.sort_unstable();
        for pair in addresses.windows(2) {
            // Distinct and non-overlapping byte ranges.
            assert!(pair[1] - pair[0] >= 8);
        }
    }

    #[test]
    fn same_class_allocations_are_disjoint() {
        let mut alloc = SegregatedAlloc::<ToyHeap>::default();

        for size in 1..=MAX_BLOCK_SIZE {
            let rounded = classes::round_up(size);
            let a = alloc.allocate(size).unwrap();
            let b = alloc.allocate(size).unwrap();

            let (low, high) = if a < b { (a, b) } else { (b, a) };
            assert!(high.as_ptr() as usize - (low.as_ptr() as usize) >= rounded);

            unsafe {
                alloc.deallocate(a, size).unwrap();
                alloc.deallocate(b, size).unwrap();
            }
        }
    }

    #[test]
    fn freed_blocks_come_back_lifo() {
        let mut alloc = SegregatedAlloc::<ToyHeap>::default();

        let a = alloc.allocate(24).unwrap();
        let b = alloc.allocate(24).unwrap();

        unsafe { alloc.deallocate(b, 24).unwrap() };
        assert_eq!(alloc.allocate(24).unwrap(), b);

        unsafe { alloc.deallocate(a, 24).unwrap() };
        assert_eq!(alloc.allocate(24).unwrap(), a);
    }

    #[test]
    fn large_requests_bypass_the_pool() {
        let mut alloc = SegregatedAlloc::<ToyHeap>::default();

        let p = alloc.allocate(256).unwrap();
        let stats = alloc.stats();
        assert_eq!(stats.system_allocations, 1);
        // No pool or free-list state was touched.
        assert_eq!(stats.free_blocks, 0);
        assert_eq!(stats.pool_remaining, 0);
        assert_eq!(stats.total_from_system, 0);

        unsafe { alloc.deallocate(p, 256).unwrap() };
        let stats = alloc.stats();
        assert_eq!(stats.free_blocks, 0);

        // 129 rounds to 136, just past the largest class.
        let q = alloc.allocate(129).unwrap();
        assert_eq!(alloc.stats().system_allocations, 2);
        unsafe { alloc.deallocate(q, 129).unwrap() };
    }

    #[test]
    fn zero_size_requests_are_rejected() {
        let mut alloc = SegregatedAlloc::<ToyHeap>::default();
        assert_eq!(alloc.allocate(0), Err(AllocError::ZeroSize));
        // The table was not consulted and nothing changed.
        assert_eq!(alloc.stats().system_allocations, 0);
    }

    #[test]
    fn pool_growth_is_monotonic() {
        let mut alloc = SegregatedAlloc::<ToyHeap>::default();

        let mut last_total = 0;
        for _ in 0..100 {
            alloc.allocate(16).unwrap();
            let stats = alloc.stats();
            assert!(stats.total_from_system >= last_total);
            last_total = stats.total_from_system;
        }
    }

    #[test]
    fn scavenging_reclaims_a_larger_class() {
        let mut alloc = SegregatedAlloc::<ToyHeap>::default();

        // One 128-byte allocation: the pool grows by 2 * 128 * 20 = 5120
        // bytes and hands out 20 blocks, leaving 2560 in the pool.
        let big = alloc.allocate(128).unwrap();
        assert_eq!(alloc.stats().pool_remaining, 2560);

        // Drain the pool exactly with two 20-block refills of class 7.
        let mut held = Vec::new();
        for _ in 0..40 {
            held.push(alloc.allocate(64).unwrap());
        }
        assert_eq!(alloc.stats().pool_remaining, 0);
        assert_eq!(alloc.class_census()[7], 0);

        // Put the big block back; class 15 now holds the only spare memory.
        unsafe { alloc.deallocate(big, 128).unwrap() };
        let before = alloc.stats().system_allocations;

        // With the system refusing, the next class-0 allocation must come
        // out of class 15's spare block, not a new chunk.
        alloc.system.heap.fail_next = 1;
        let small = alloc.allocate(8).unwrap();

        assert_eq!(alloc.stats().system_allocations, before);
        assert_eq!(alloc.system.heap.fail_next, 0);
        // The scavenged region was the freed 128-byte block itself: 16
        // class-0 blocks, one returned and 15 left on the list.
        assert_eq!(small, big);
        assert_eq!(alloc.class_census()[0], 15);
        assert_eq!(alloc.class_census()[15], 19);
    }

    #[test]
    fn handler_runs_once_before_a_successful_retry() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        fn release_something() {
            HITS.fetch_add(1, Ordering::SeqCst);
        }

        let mut alloc = SegregatedAlloc::<ToyHeap>::default();
        assert!(alloc.set_handler(Some(release_something)).is_none());

        // First failure is eaten by try_allocate, the second by the full
        // protocol, whose handler-then-retry succeeds.
        alloc.system.heap.fail_next = 2;
        let p = alloc.allocate(8).unwrap();
        assert_eq!(p.as_ptr() as usize % GRANULARITY, 0);
        assert_eq!(HITS.load(Ordering::SeqCst), 1);

        // The previous handler comes back out, for restoration.
        assert_eq!(alloc.set_handler(None), Some(release_something as fn()));
    }

    #[test]
    fn no_handler_means_out_of_memory_is_final() {
        let mut alloc = SegregatedAlloc::<ToyHeap>::default();
        alloc.system.heap.fail_next = 2;
        assert_eq!(alloc.allocate(8), Err(AllocError::OutOfMemory));
    }

    #[test]
    fn realloc_only_works_above_the_pool_threshold() {
        let mut alloc = SegregatedAlloc::<ToyHeap>::default();

        let p = alloc.allocate(200).unwrap();
        unsafe {
            core::ptr::write_bytes(p.as_ptr(), 0xAB, 200);
            let q = alloc.reallocate(p, 200, 400).unwrap();
            for i in 0..200 {
                assert_eq!(*q.as_ptr().add(i), 0xAB);
            }
            alloc.deallocate(q, 400).unwrap();
        }

        let small = alloc.allocate(32).unwrap();
        let err = unsafe { alloc.reallocate(small, 32, 64) };
        assert_eq!(err, Err(AllocError::ReallocUnsupported));
        // Shrinking into the pool range is just as unsupported.
        let big = alloc.allocate(300).unwrap();
        let err = unsafe { alloc.reallocate(big, 300, 64) };
        assert_eq!(err, Err(AllocError::ReallocUnsupported));
    }

    #[test]
    fn system_tier_reallocate_retries_through_the_handler() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        fn release_something() {
            HITS.fetch_add(1, Ordering::SeqCst);
        }

        let mut system = SystemAlloc::<ToyHeap>::default();
        system.set_handler(Some(release_something));

        let p = system.allocate(64).unwrap();
        system.heap.fail_next = 1;
        let q = unsafe { system.reallocate(p, 64, 128).unwrap() };
        assert_ne!(p, q);
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn donated_remainders_are_not_leaked() {
        let mut alloc = SegregatedAlloc::<ToyHeap>::default();

        // Fill class 2 (24-byte blocks): chunk is 2 * 24 * 20 = 960 bytes,
        // the batch takes 480, leaving 480 = 20 * 24 in the pool.
        let p = alloc.allocate(24).unwrap();
        assert_eq!(alloc.stats().pool_remaining, 480);

        // 39 more class-2 allocations drain the 19 list blocks and then a
        // second full refill, consuming the 480 pool bytes exactly.
        for _ in 0..39 {
            alloc.allocate(24).unwrap();
        }
        assert_eq!(alloc.stats().pool_remaining, 0);

        // Now force a remainder: grow the pool via class 0, then leave 8
        // bytes behind by draining with class 2 again.
        let stats_before = alloc.stats();
        let total = stats_before.total_from_system;
        assert_eq!(total, 960);

        // chunk = 2*8*20 + round_up(960/16) = 320 + 64 = 384 bytes.
        alloc.allocate(8).unwrap();
        assert_eq!(alloc.stats().pool_remaining, 384 - 160);

        // 224 remaining: 9 whole 24-byte blocks with 8 left over. A class-2
        // refill takes the nine, and the next one donates the tail.
        let census_before = alloc.class_census();
        assert_eq!(census_before[0], 19);
        for _ in 0..9 {
            alloc.allocate(24).unwrap();
        }
        assert_eq!(alloc.stats().pool_remaining, 8);

        alloc.allocate(24).unwrap();
        // The 8-byte tail landed on class 0's list instead of leaking, and
        // the forced expansion restocked class 2.
        let census = alloc.class_census();
        assert_eq!(census[0], census_before[0] + 1);
        assert_eq!(census[2], 19);

        let _ = p;
    }
}
