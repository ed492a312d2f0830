//! Allocation counting global allocator.
//!
//! Install it in a binary to give [`AllocationCounters`] something to read:
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: spanreport::CountingAllocator = spanreport::CountingAllocator::system();
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::{ReportError, ReportResult, StatSnapshot, StatSource};

static ALLOCATED: AtomicI64 = AtomicI64::new(0);
static FREED: AtomicI64 = AtomicI64::new(0);
static LIVE_BYTES: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Default)]
pub struct CountingAllocator<A = System> {
    inner: A,
}

impl CountingAllocator<System> {
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A> CountingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

// SAFETY: every call is forwarded to `inner` unchanged; the counters are
// plain atomics and never allocate.
unsafe impl<A: GlobalAlloc> GlobalAlloc for CountingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: same contract as the caller's.
        let ptr = unsafe { self.inner.alloc(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: same contract as the caller's.
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: same contract as the caller's.
        unsafe { self.inner.dealloc(ptr, layout) };
        FREED.fetch_add(1, Ordering::Relaxed);
        LIVE_BYTES.fetch_sub(layout.size() as i64, Ordering::Relaxed);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: same contract as the caller's.
        let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            LIVE_BYTES.fetch_add(new_size as i64 - layout.size() as i64, Ordering::Relaxed);
        }
        new_ptr
    }
}

fn record_alloc(size: usize) {
    ALLOCATED.fetch_add(1, Ordering::Relaxed);
    LIVE_BYTES.fetch_add(size as i64, Ordering::Relaxed);
}

/// Reads the counters kept by [`CountingAllocator`].
///
/// The process has no generational heap, so `old_objects` is always 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationCounters {
    collect_mem_size: bool,
}

impl AllocationCounters {
    pub fn new(collect_mem_size: bool) -> Self {
        Self { collect_mem_size }
    }
}

impl StatSource for AllocationCounters {
    fn capture(&self) -> ReportResult<StatSnapshot> {
        let allocated = ALLOCATED.load(Ordering::Relaxed);
        if allocated == 0 {
            return Err(ReportError::Stat(
                "no allocations counted; CountingAllocator is not the global allocator"
                    .to_string(),
            ));
        }
        Ok(StatSnapshot {
            total_allocated_objects: allocated,
            total_freed_objects: FREED.load(Ordering::Relaxed),
            old_objects: 0,
            mem_size: self
                .collect_mem_size
                .then(|| LIVE_BYTES.load(Ordering::Relaxed)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_allocator_counts_alloc_and_free() {
        let allocator = CountingAllocator::system();
        let layout = Layout::from_size_align(64, 8).expect("layout");
        let before_alloc = ALLOCATED.load(Ordering::Relaxed);
        let before_free = FREED.load(Ordering::Relaxed);

        // SAFETY: layout is non-zero sized and the pointer is freed with it.
        unsafe {
            let ptr = allocator.alloc(layout);
            assert!(!ptr.is_null());
            allocator.dealloc(ptr, layout);
        }

        assert!(ALLOCATED.load(Ordering::Relaxed) > before_alloc);
        assert!(FREED.load(Ordering::Relaxed) > before_free);

        let snapshot = AllocationCounters::new(true).capture().expect("capture");
        assert_eq!(snapshot.old_objects, 0);
        assert!(snapshot.mem_size.is_some());
        assert!(AllocationCounters::new(false).capture().expect("capture").mem_size.is_none());
    }
}
