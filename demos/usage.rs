//! A minimal tour of the segregated allocator: batch refills, LIFO reuse,
//! and the large-request bypass.

use segalloc::{LibcHeap, SegregatedAlloc};

fn main() {
    let mut alloc = SegregatedAlloc::<LibcHeap>::default();

    // The first small allocation pulls a whole batch from the pool and
    // stocks the size class's free list.
    let p = alloc.allocate(24).unwrap();
    println!("allocated 24 bytes at {:p}", p.as_ptr());
    println!("stats after one allocation: {:?}", alloc.stats());

    // Freed blocks come back LIFO.
    unsafe { alloc.deallocate(p, 24).unwrap() };
    let q = alloc.allocate(24).unwrap();
    println!("freed and re-allocated: {:p} (same block: {})", q.as_ptr(), q == p);

    // Large requests skip the pool entirely.
    let big = alloc.allocate(4096).unwrap();
    println!("4096-byte request went to the system tier: {:p}", big.as_ptr());
    unsafe { alloc.deallocate(big, 4096).unwrap() };

    println!("final stats: {:?}", alloc.stats());
}
