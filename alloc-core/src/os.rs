//! OS-primitive wrappers (spec.md §6 "OS interfaces consumed").
//!
//! The reference implementation calls the platform's `sbrk(2)` directly,
//! which is inherently a single, process-wide resource — there is only
//! ever one program break per process, so two independently-constructed
//! engines (as this crate needs, one per `Engine::new()` call, so tests
//! can run against isolated heaps) cannot each have their own.
//!
//! [`ProgramBreak`] reproduces the same externally-visible contract —
//! `grow`/`shrink` a single contiguous range anchored at the lowest
//! address ever reached, returning a sentinel on failure — on top of a
//! private anonymous mapping reserved once per instance: growth commits
//! (`mprotect` to `PROT_READ|PROT_WRITE`) pages within the reservation,
//! give-back decommits them (`PROT_NONE` + `MADV_DONTNEED`) rather than
//! unmapping, so the reserved address range itself never moves. This is
//! the same trick production allocators use to emulate `sbrk` on
//! platforms where it does not exist; here it buys per-instance
//! isolation instead of portability.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

/// Upper bound on how large one heap may grow. Chosen far larger than
/// any test or realistic replay workload will reach; reserving it costs
/// only address space (the mapping starts out `PROT_NONE`), not memory.
const RESERVATION_SIZE: usize = 1usize << 34; // 16 GiB of address space

pub struct ProgramBreak {
    base: AtomicUsize, // 0 until first growth
    committed: AtomicUsize,
}

impl ProgramBreak {
    pub const fn new() -> ProgramBreak {
        ProgramBreak { base: AtomicUsize::new(0), committed: AtomicUsize::new(0) }
    }

    fn base_ptr(&self) -> Option<*mut u8> {
        let base = self.base.load(Ordering::Acquire);
        if base == 0 {
            None
        } else {
            Some(base as *mut u8)
        }
    }

    fn reserve(&self) -> Result<*mut u8> {
        if let Some(p) = self.base_ptr() {
            return Ok(p);
        }
        let m = unsafe {
            libc::mmap(
                ptr::null_mut(),
                RESERVATION_SIZE,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if m == libc::MAP_FAILED {
            return Err(Error::from_errno());
        }
        self.base.store(m as usize, Ordering::Release);
        Ok(m as *mut u8)
    }

    /// Returns the current heap start address, if the heap has grown at
    /// least once.
    pub fn start(&self) -> Option<*mut u8> {
        self.base_ptr()
    }

    /// Grows the heap by `delta` bytes, returning a pointer to the
    /// beginning of the newly-available range (the previous break).
    pub fn grow(&self, delta: usize) -> Result<*mut u8> {
        let base = self.reserve()?;
        let committed = self.committed.load(Ordering::Acquire);
        let new_committed = committed
            .checked_add(delta)
            .filter(|&n| n <= RESERVATION_SIZE)
            .ok_or_else(|| Error::message("program break reservation exhausted"))?;
        let region = unsafe { base.add(committed) };
        let rc = unsafe { libc::mprotect(region as *mut libc::c_void, delta, libc::PROT_READ | libc::PROT_WRITE) };
        if rc != 0 {
            return Err(Error::from_errno());
        }
        self.committed.store(new_committed, Ordering::Release);
        Ok(region)
    }

    /// Shrinks the heap by `delta` bytes from the end, decommitting
    /// those pages back to the OS.
    pub fn shrink(&self, delta: usize) -> Result<()> {
        let base = self.reserve()?;
        let committed = self.committed.load(Ordering::Acquire);
        let new_committed = committed
            .checked_sub(delta)
            .ok_or_else(|| Error::message("program break underflow"))?;
        let region = unsafe { base.add(new_committed) };
        unsafe {
            libc::mprotect(region as *mut libc::c_void, delta, libc::PROT_NONE);
            libc::madvise(region as *mut libc::c_void, delta, libc::MADV_DONTNEED);
        }
        self.committed.store(new_committed, Ordering::Release);
        Ok(())
    }

    pub fn committed_size(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }
}

/// Creates a fresh anonymous private mapping for a large (oversized)
/// block.
pub fn map_large(size: usize) -> Result<*mut u8> {
    let m = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if m == libc::MAP_FAILED {
        Err(Error::from_errno())
    } else {
        Ok(m as *mut u8)
    }
}

/// Unmaps a large block's full extent.
///
/// # Safety
/// `ptr`/`size` must describe a mapping created by [`map_large`] or
/// [`remap_large`], not currently referenced elsewhere.
pub unsafe fn unmap_large(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

/// Resizes a large block in place or by moving it, per `mremap(2)`.
///
/// # Safety
/// `ptr`/`old_size` must describe a live mapping created by
/// [`map_large`] or a prior call to this function.
pub unsafe fn remap_large(ptr: *mut u8, old_size: usize, new_size: usize) -> Result<*mut u8> {
    let m = libc::mremap(ptr as *mut libc::c_void, old_size, new_size, libc::MREMAP_MAYMOVE);
    if m == libc::MAP_FAILED {
        Err(Error::from_errno())
    } else {
        Ok(m as *mut u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_then_shrink_round_trips_committed_size() {
        let pb = ProgramBreak::new();
        let page = 4096;
        let a = pb.grow(page).unwrap();
        assert_eq!(pb.committed_size(), page);
        let b = pb.grow(page).unwrap();
        assert_eq!(unsafe { a.add(page) }, b);
        pb.shrink(page).unwrap();
        assert_eq!(pb.committed_size(), page);
    }

    #[test]
    fn map_and_unmap_large_block() {
        let size = 2 * 1024 * 1024;
        let p = map_large(size).unwrap();
        unsafe {
            ptr::write_bytes(p, 0xAB, size);
            unmap_large(p, size);
        }
    }
}
