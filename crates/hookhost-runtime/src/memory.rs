//! Per-thread allocation counter used for hook memory profiling.
//!
//! Install [`TrackingAllocator`] as the global allocator in the host
//! binary; without it [`thread_allocated`] stays at zero and memory
//! deltas read as zero.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

thread_local! {
    static ALLOCATED: Cell<u64> = const { Cell::new(0) };
}

/// System allocator wrapper counting bytes allocated per thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackingAllocator;

fn bump(bytes: usize) {
    // try_with: the slot may already be gone during thread teardown.
    let _ = ALLOCATED.try_with(|total| total.set(total.get().wrapping_add(bytes as u64)));
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        bump(layout.size());
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        bump(layout.size());
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        bump(new_size.saturating_sub(layout.size()));
        unsafe { System.realloc(ptr, layout, new_size) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

/// Bytes allocated on the current thread so far.
pub fn thread_allocated() -> u64 {
    ALLOCATED.try_with(Cell::get).unwrap_or(0)
}
