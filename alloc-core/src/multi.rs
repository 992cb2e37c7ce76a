//! Multi-arena engine: `FREELIST_SIZE` independent free lists, each
//! under its own spinlock, plus one global spinlock over the heap
//! bounds (spec.md §4.2).
//!
//! Known limitation, carried over from spec.md §4.2/§9: a free block's
//! arena is decided at *deallocate* time by whichever arena a caller
//! manages to lock first, so two physically adjacent free blocks can
//! end up on different arenas and never coalesce. This implementation
//! does not attempt the address-range-routing alternative spec.md
//! mentions as an option — it is left as the accepted tradeoff the spec
//! describes.

use std::ptr;

use crate::block::{block_end, data_of, header_of, optimal_block_size, BlockHeader, HEADER_SIZE};
use crate::config::{FREELIST_SIZE, GIVE_BACK_SIZE, MIN_BLOCK_SIZE, MMAP_SIZE};
use crate::describe;
use crate::freelist::FreeList;
use crate::heap::{self, HeapBounds};
use crate::spinlock::{Spinlock, SpinlockGuard};
use crate::RawAllocator;

pub struct MultiArenaEngine {
    global: Spinlock<HeapBounds>,
    arenas: [Spinlock<FreeList>; FREELIST_SIZE],
}

/// Locks some arena other than the ones in `excluded`, spinning across
/// the whole set until one is free (spec.md §4.2 "try-locked scan").
fn lock_any_excluding<'a>(
    arenas: &'a [Spinlock<FreeList>; FREELIST_SIZE],
    excluded: &[usize],
) -> (usize, SpinlockGuard<'a, FreeList>) {
    let mut spins = 0u32;
    loop {
        for (i, arena) in arenas.iter().enumerate() {
            if excluded.contains(&i) {
                continue;
            }
            if let Some(guard) = arena.try_lock() {
                return (i, guard);
            }
        }
        spins += 1;
        if spins >= crate::config::SPIN_BOUND {
            spins = 0;
            std::thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

fn lock_any(arenas: &[Spinlock<FreeList>; FREELIST_SIZE]) -> (usize, SpinlockGuard<'_, FreeList>) {
    lock_any_excluding(arenas, &[])
}

impl MultiArenaEngine {
    pub fn new() -> MultiArenaEngine {
        MultiArenaEngine {
            global: Spinlock::new(HeapBounds::new()),
            arenas: std::array::from_fn(|_| Spinlock::new(FreeList::new())),
        }
    }

    unsafe fn allocate_large(&self, n: usize) -> *mut u8 {
        let size = n + HEADER_SIZE;
        match heap::map_large(size) {
            Ok(p) => {
                let block = p as *mut BlockHeader;
                (*block).size = size;
                self.global.lock().mmap_size += size;
                data_of(block)
            }
            Err(e) => {
                log::warn!("large allocation of {size} bytes failed: {e}");
                ptr::null_mut()
            }
        }
    }

    /// Runs the give-back-to-OS check after a deallocation has inserted
    /// a freed block into the arena at `arena`. Per spec.md §9's first
    /// open question, this only ever observes that one arena's own last
    /// free block, not the union of all arenas — a concurrent free in
    /// another arena that also abuts `heap_end` may race this check and
    /// be missed until its own next deallocation. The spec leaves the
    /// resolution to the implementation; this one accepts that narrower
    /// race in exchange for never holding more than one lock at a time.
    ///
    /// Locks `global` and `arena` one at a time, never together — in
    /// particular the OS shrink syscall in [`HeapBounds::give_back`]
    /// runs with neither lock held (spec.md §5: "avoid holding both
    /// across operations whose duration is unbounded"). The candidate
    /// block is
    /// unlinked from `arena` before that syscall, not after, since the
    /// syscall decommits its trailing bytes: leaving it reachable via
    /// `take_first_fit` at its old (pre-shrink) size while that is in
    /// flight would hand out memory that is no longer backed.
    fn maybe_give_back(global: &Spinlock<HeapBounds>, arena: &Spinlock<FreeList>) {
        let mut guard = arena.lock();
        let Some(last) = guard.last() else { return };
        let size = unsafe { (*last).size };
        let (heap_end, heap_start) = {
            let bounds = global.lock();
            (bounds.heap_end(), bounds.heap_start())
        };
        if unsafe { block_end(last) as usize } != heap_end || size < GIVE_BACK_SIZE {
            return;
        }

        let whole_heap = last as usize == heap_start;
        if whole_heap && size == GIVE_BACK_SIZE {
            return;
        }

        unsafe { guard.remove(last) };
        drop(guard);

        let give_back_amount = if whole_heap { size - GIVE_BACK_SIZE } else { size };
        let result = global.lock().give_back(give_back_amount);

        let mut guard = arena.lock();
        match result {
            Ok(()) => {
                if whole_heap {
                    unsafe {
                        (*last).size = GIVE_BACK_SIZE;
                        guard.insert_coalesce(last);
                    }
                }
                // Otherwise the block was given back to the OS in full.
            }
            Err(_) => unsafe { guard.insert_coalesce(last) },
        }
    }
}

impl Default for MultiArenaEngine {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawAllocator for MultiArenaEngine {
    unsafe fn allocate(&self, n: usize) -> *mut u8 {
        if n == 0 {
            return ptr::null_mut();
        }
        let ns = optimal_block_size(n);
        if ns >= MMAP_SIZE {
            return self.allocate_large(n);
        }

        let mut tried = Vec::with_capacity(FREELIST_SIZE);
        for _ in 0..FREELIST_SIZE {
            let (idx, mut arena) = lock_any_excluding(&self.arenas, &tried);
            if let Some(block) = arena.take_first_fit(ns) {
                return data_of(block);
            }
            tried.push(idx);
        }

        let mut global = self.global.lock();
        let grown = global.grow(ns);
        drop(global);
        match grown {
            Ok((p, remainder)) => {
                let block = p as *mut BlockHeader;
                (*block).size = ns;
                if remainder >= MIN_BLOCK_SIZE {
                    let free_block = p.add(ns) as *mut BlockHeader;
                    (*free_block).size = remainder;
                    let (_, mut arena) = lock_any(&self.arenas);
                    arena.insert_coalesce(free_block);
                }
                log::debug!("heap grew to {} bytes", self.global.lock().heap_size());
                data_of(block)
            }
            Err(e) => {
                log::warn!("heap growth for {ns} bytes failed: {e}");
                ptr::null_mut()
            }
        }
    }

    unsafe fn reallocate(&self, p: *mut u8, n: usize) -> *mut u8 {
        if p.is_null() {
            return self.allocate(n);
        }
        if n == 0 {
            self.deallocate(p);
            return ptr::null_mut();
        }

        let header = header_of(p);
        let addr = header as usize;
        let target_size = n + HEADER_SIZE;
        let ns = optimal_block_size(n);

        {
            let mut global = self.global.lock();
            if global.is_large(addr) {
                let old_size = (*header).size;
                global.mmap_size = global.mmap_size - old_size + target_size;
                drop(global);
                return match crate::os::remap_large(header as *mut u8, old_size, target_size) {
                    Ok(newp) => {
                        let nb = newp as *mut BlockHeader;
                        (*nb).size = target_size;
                        data_of(nb)
                    }
                    Err(e) => {
                        log::warn!("mremap to {target_size} bytes failed: {e}");
                        ptr::null_mut()
                    }
                };
            }
        }

        if (*header).size >= ns {
            return p;
        }

        if ns < MMAP_SIZE {
            let payload_len = (*header).size - HEADER_SIZE;
            let (_, mut arena) = lock_any(&self.arenas);
            if let Some(nb) = arena.merge_adjacent(header, ns, payload_len) {
                return data_of(nb);
            }
        }

        let new_p = self.allocate(n);
        if !new_p.is_null() {
            let old_payload = (*header).size - HEADER_SIZE;
            ptr::copy_nonoverlapping(p, new_p, old_payload.min(n));
            self.deallocate(p);
        }
        new_p
    }

    unsafe fn deallocate(&self, p: *mut u8) {
        if p.is_null() {
            return;
        }
        let header = header_of(p);
        let addr = header as usize;

        {
            let mut global = self.global.lock();
            if global.is_large(addr) {
                let size = (*header).size;
                global.mmap_size -= size;
                drop(global);
                crate::os::unmap_large(header as *mut u8, size);
                return;
            }
        }

        let arena_idx = {
            let (idx, mut arena) = lock_any(&self.arenas);
            arena.insert_coalesce(header);
            idx
        };
        Self::maybe_give_back(&self.global, &self.arenas[arena_idx]);
    }

    unsafe fn zero_allocate(&self, nmemb: usize, size: usize) -> *mut u8 {
        let total = nmemb * size;
        let p = self.allocate(total);
        if !p.is_null() {
            ptr::write_bytes(p, 0, total);
        }
        p
    }

    fn describe(&self, p: *mut u8) {
        let global = self.global.lock();
        unsafe { describe::describe_block(&global, header_of(p)) };
    }

    fn describe_freelist(&self) {
        let global = self.global.lock();
        let guards: Vec<_> = self.arenas.iter().map(|a| a.lock()).collect();
        let refs: Vec<&FreeList> = guards.iter().map(|g| &**g).collect();
        describe::describe_freelist(&global, &refs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_split_and_coalesce() {
        let engine = MultiArenaEngine::new();
        unsafe {
            let a = engine.allocate(100);
            let b = engine.allocate(100);
            assert!(!a.is_null() && !b.is_null());
            engine.deallocate(a);
            engine.deallocate(b);
        }
    }

    #[test]
    fn realloc_in_place_grow_returns_same_pointer() {
        let engine = MultiArenaEngine::new();
        unsafe {
            let a = engine.allocate(32);
            let b = engine.reallocate(a, 200);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn arena_independence_allows_concurrent_allocation() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(MultiArenaEngine::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || unsafe {
                let mut ptrs = Vec::new();
                for i in 0..200 {
                    ptrs.push(engine.allocate(32 + (i % 64)));
                }
                for p in ptrs {
                    engine.deallocate(p);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn large_block_path_used_above_threshold() {
        let engine = MultiArenaEngine::new();
        unsafe {
            let p = engine.allocate(2_000_000);
            assert!(!p.is_null());
            assert!(engine.global.lock().is_large(header_of(p) as usize));
            engine.deallocate(p);
        }
    }
}
