//! Shows the out-of-memory handler protocol: a toy heap is told to fail its
//! next raw calls, and a registered handler gets a chance to run before the
//! retry.

use std::sync::atomic::{AtomicUsize, Ordering};

use segalloc::{AllocError, SegregatedAlloc, ToyHeap};

static HANDLER_RUNS: AtomicUsize = AtomicUsize::new(0);

fn drop_caches() {
    // A real handler would release application caches here.
    HANDLER_RUNS.fetch_add(1, Ordering::SeqCst);
    println!("handler invoked: pretending to release memory elsewhere");
}

fn main() {
    let mut alloc = SegregatedAlloc::new(ToyHeap::default());

    // Without a handler, exhaustion is final.
    alloc.system.heap.fail_next = 2;
    assert_eq!(alloc.allocate(8), Err(AllocError::OutOfMemory));
    println!("no handler: allocation failed for good");

    // With one, the allocator retries after the handler runs.
    let previous = alloc.set_handler(Some(drop_caches));
    assert!(previous.is_none());

    alloc.system.heap.fail_next = 2;
    let p = alloc.allocate(8).unwrap();
    println!(
        "with handler: got {:p} after {} handler run(s)",
        p.as_ptr(),
        HANDLER_RUNS.load(Ordering::SeqCst)
    );

    // The setter hands back the previous handler for restoration.
    let restored = alloc.set_handler(previous);
    assert_eq!(restored, Some(drop_caches as fn()));
}
