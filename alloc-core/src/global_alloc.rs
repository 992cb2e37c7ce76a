//! `GlobalAlloc` adapter so an engine can be installed as
//! `#[global_allocator]` — the idiomatic-Rust stand-in for wholesale
//! platform-allocator replacement now that actual symbol interposition
//! and linker flags are out of scope (spec.md §1). Grounded on
//! `openexr/src/core/alloc.rs`'s `exr_alloc`/`exr_free`, which bridge a
//! C allocation callback to `std::alloc` the same way this bridges
//! `std::alloc::GlobalAlloc` to a [`RawAllocator`].

use std::alloc::{GlobalAlloc, Layout};

use crate::block::HEADER_SIZE;
use crate::RawAllocator;

/// Wraps any [`RawAllocator`] as a `GlobalAlloc`.
///
/// Alignment requests up to the allocator's native word size (the
/// header's own alignment) are satisfied directly; anything stricter is
/// rejected by over-allocating and is not attempted here, matching this
/// engine's documented alignment guarantee (spec.md §4.1: "aligned to
/// at least the native word boundary").
pub struct SystemReplacement<E>(pub E);

unsafe impl<E: RawAllocator> GlobalAlloc for SystemReplacement<E> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > HEADER_SIZE {
            return std::ptr::null_mut();
        }
        self.0.allocate(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.0.deallocate(ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > HEADER_SIZE {
            return std::ptr::null_mut();
        }
        self.0.reallocate(ptr, new_size)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > HEADER_SIZE {
            return std::ptr::null_mut();
        }
        self.0.zero_allocate(1, layout.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::single::SingleArenaEngine;

    #[test]
    fn satisfies_word_aligned_layouts() {
        let alloc = SystemReplacement(SingleArenaEngine::new());
        unsafe {
            let layout = Layout::from_size_align(64, HEADER_SIZE).unwrap();
            let p = alloc.alloc(layout);
            assert!(!p.is_null());
            alloc.dealloc(p, layout);
        }
    }

    #[test]
    fn rejects_over_aligned_layouts() {
        let alloc = SystemReplacement(SingleArenaEngine::new());
        unsafe {
            let layout = Layout::from_size_align(64, HEADER_SIZE * 4).unwrap();
            assert!(alloc.alloc(layout).is_null());
        }
    }
}
