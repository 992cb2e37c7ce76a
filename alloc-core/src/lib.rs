//! A user-space free-list allocator engine (spec.md §4.1/§4.2).
//!
//! Two independent engines implement the same [`RawAllocator`] contract:
//! [`single::SingleArenaEngine`] (the default) and, behind
//! `feature = "multi-arena"`, [`multi::MultiArenaEngine`]. Pick one via
//! [`Engine`], which is just a type alias selected by that feature so
//! downstream code (notably the `replay` harness) can stay generic over
//! `RawAllocator` without caring which variant it links against.

pub mod block;
pub mod config;
pub mod describe;
mod error;
mod freelist;
mod heap;
mod os;
pub mod spinlock;

pub mod single;
#[cfg(feature = "multi-arena")]
pub mod multi;

mod global_alloc;
pub use global_alloc::SystemReplacement;

/// The four standard allocator operations plus the two diagnostic
/// operations named in spec.md §6.
///
/// # Safety
/// Implementors may assume pointers passed to `reallocate`/`deallocate`
/// were previously returned by this same engine instance and have not
/// already been freed (spec.md §9: double-free is undefined, not
/// detected).
pub unsafe trait RawAllocator: Send + Sync {
    /// Returns a pointer to at least `n` usable bytes, or null if
    /// `n == 0` or the OS refuses more memory.
    unsafe fn allocate(&self, n: usize) -> *mut u8;

    /// `p` null is equivalent to `allocate(n)`. `n == 0` deallocates `p`
    /// and returns null. Otherwise resizes in place when possible.
    unsafe fn reallocate(&self, p: *mut u8, n: usize) -> *mut u8;

    /// Null pointer is a no-op.
    unsafe fn deallocate(&self, p: *mut u8);

    /// `allocate(nmemb * size)` with the result zero-filled.
    unsafe fn zero_allocate(&self, nmemb: usize, size: usize) -> *mut u8;

    /// Logs the header and immediate neighbors of the block under `p`.
    fn describe(&self, p: *mut u8);

    /// Logs heap/mmap totals and each free list's chain.
    fn describe_freelist(&self);
}

#[cfg(not(feature = "multi-arena"))]
pub type Engine = single::SingleArenaEngine;

#[cfg(feature = "multi-arena")]
pub type Engine = multi::MultiArenaEngine;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::ptr;

    fn roundtrip<E: RawAllocator>(engine: &E) {
        unsafe {
            assert!(engine.allocate(0).is_null());

            let a = engine.allocate(100);
            assert!(!a.is_null());
            ptr::write_bytes(a, 0x42, 100);

            let b = engine.reallocate(a, 200);
            assert!(!b.is_null());
            let mut buf = vec![0u8; 100];
            ptr::copy_nonoverlapping(b, buf.as_mut_ptr(), 100);
            assert!(buf.iter().all(|&byte| byte == 0x42));

            assert!(engine.reallocate(b, 0).is_null());
            engine.deallocate(ptr::null_mut());

            let z = engine.zero_allocate(16, 4);
            assert!(!z.is_null());
            let mut zero_buf = vec![0xFFu8; 64];
            ptr::copy_nonoverlapping(z, zero_buf.as_mut_ptr(), 64);
            assert!(zero_buf.iter().all(|&byte| byte == 0));
            engine.deallocate(z);
        }
    }

    #[test]
    fn single_arena_contract() {
        let engine = single::SingleArenaEngine::new();
        roundtrip(&engine);
    }

    #[cfg(feature = "multi-arena")]
    #[test]
    fn multi_arena_contract() {
        let engine = multi::MultiArenaEngine::new();
        roundtrip(&engine);
    }
}
