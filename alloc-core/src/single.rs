//! Single-arena engine: one process-wide spinlock guards both the heap
//! bounds and the sole free list (spec.md §4.1, §5 "Single-arena
//! variant").

use std::ptr;

use crate::block::{block_end, data_of, header_of, optimal_block_size, BlockHeader, HEADER_SIZE};
use crate::config::{GIVE_BACK_SIZE, MIN_BLOCK_SIZE, MMAP_SIZE};
use crate::describe;
use crate::freelist::FreeList;
use crate::heap::{self, HeapBounds};
use crate::spinlock::Spinlock;
use crate::RawAllocator;

struct State {
    bounds: HeapBounds,
    free_list: FreeList,
}

pub struct SingleArenaEngine {
    state: Spinlock<State>,
}

impl SingleArenaEngine {
    pub fn new() -> SingleArenaEngine {
        SingleArenaEngine {
            state: Spinlock::new(State { bounds: HeapBounds::new(), free_list: FreeList::new() }),
        }
    }

    unsafe fn allocate_large(&self, n: usize) -> *mut u8 {
        let size = n + HEADER_SIZE;
        match heap::map_large(size) {
            Ok(p) => {
                let block = p as *mut BlockHeader;
                (*block).size = size;
                self.state.lock().bounds.mmap_size += size;
                data_of(block)
            }
            Err(e) => {
                log::warn!("large allocation of {size} bytes failed: {e}");
                ptr::null_mut()
            }
        }
    }

    /// After inserting a freed block, checks whether the trailing free
    /// region at the end of the heap is large enough to hand back to
    /// the OS (spec.md §4.1 "Heap path — deallocation").
    fn maybe_give_back(state: &mut State) {
        let Some(last) = state.free_list.last() else { return };
        let heap_end = state.bounds.heap_end();
        unsafe {
            if block_end(last) as usize != heap_end {
                return;
            }
            let size = (*last).size;
            if size < GIVE_BACK_SIZE {
                return;
            }
            if last as usize == state.bounds.heap_start() {
                if size > GIVE_BACK_SIZE {
                    let excess = size - GIVE_BACK_SIZE;
                    if state.bounds.give_back(excess).is_ok() {
                        (*last).size = GIVE_BACK_SIZE;
                    }
                }
            } else {
                state.free_list.remove(last);
                if state.bounds.give_back(size).is_err() {
                    // Give-back failed; put the block back rather than leak it.
                    state.free_list.insert_coalesce(last);
                }
            }
        }
    }
}

impl Default for SingleArenaEngine {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawAllocator for SingleArenaEngine {
    unsafe fn allocate(&self, n: usize) -> *mut u8 {
        if n == 0 {
            return ptr::null_mut();
        }
        let ns = optimal_block_size(n);
        if ns >= MMAP_SIZE {
            return self.allocate_large(n);
        }

        let mut state = self.state.lock();
        if let Some(block) = state.free_list.take_first_fit(ns) {
            return data_of(block);
        }

        match state.bounds.grow(ns) {
            Ok((p, remainder)) => {
                let block = p as *mut BlockHeader;
                (*block).size = ns;
                if remainder >= MIN_BLOCK_SIZE {
                    let free_block = p.add(ns) as *mut BlockHeader;
                    (*free_block).size = remainder;
                    state.free_list.insert_coalesce(free_block);
                }
                log::debug!("heap grew to {} bytes", state.bounds.heap_size());
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

        let mut state = self.state.lock();
        if state.bounds.is_large(addr) {
            let old_size = (*header).size;
            state.bounds.mmap_size = state.bounds.mmap_size - old_size + target_size;
            drop(state);
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

        if (*header).size >= ns {
            return p;
        }

        if ns < MMAP_SIZE {
            let payload_len = (*header).size - HEADER_SIZE;
            if let Some(nb) = state.free_list.merge_adjacent(header, ns, payload_len) {
                return data_of(nb);
            }
        }
        drop(state);

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

        let mut state = self.state.lock();
        if state.bounds.is_large(addr) {
            let size = (*header).size;
            state.bounds.mmap_size -= size;
            drop(state);
            crate::os::unmap_large(header as *mut u8, size);
            return;
        }

        state.free_list.insert_coalesce(header);
        Self::maybe_give_back(&mut state);
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
        let state = self.state.lock();
        unsafe { describe::describe_block(&state.bounds, header_of(p)) };
    }

    fn describe_freelist(&self) {
        let state = self.state.lock();
        describe::describe_freelist(&state.bounds, &[&state.free_list]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn basic_split_and_coalesce() {
        let engine = SingleArenaEngine::new();
        unsafe {
            let a = engine.allocate(100);
            let b = engine.allocate(100);
            assert!(!a.is_null() && !b.is_null());
            assert_eq!((*header_of(a)).size, 128);
            assert_eq!((*header_of(b)).size, 128);
            engine.deallocate(a);
            engine.deallocate(b);
            let state = engine.state.lock();
            assert_eq!(state.free_list.iter().count(), 1);
        }
    }

    #[test]
    fn realloc_in_place_grow_returns_same_pointer() {
        let engine = SingleArenaEngine::new();
        unsafe {
            let a = engine.allocate(32);
            let b = engine.reallocate(a, 200);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn realloc_must_move_when_neighbor_occupied() {
        let engine = SingleArenaEngine::new();
        unsafe {
            let a = engine.allocate(32);
            let _b = engine.allocate(32);
            let c = engine.reallocate(a, 2000);
            assert_ne!(a, c);
            assert!(!c.is_null());
        }
    }

    #[test]
    fn large_block_path_used_above_threshold() {
        let engine = SingleArenaEngine::new();
        unsafe {
            let before = engine.state.lock().bounds.heap_size();
            let p = engine.allocate(2_000_000);
            assert!(!p.is_null());
            assert!(engine.state.lock().bounds.is_large(header_of(p) as usize));
            engine.deallocate(p);
            assert_eq!(engine.state.lock().bounds.heap_size(), before);
        }
    }

    #[test]
    fn give_back_only_past_threshold() {
        let engine = SingleArenaEngine::new();
        unsafe {
            let p = engine.allocate(100);
            let heap_size_before = engine.state.lock().bounds.heap_size();
            engine.deallocate(p);
            let heap_size_after = engine.state.lock().bounds.heap_size();
            // ALLOC_SIZE == GIVE_BACK_SIZE (both 32 MiB), so the single
            // initial heap growth leaves exactly one free block of
            // exactly GIVE_BACK_SIZE once this allocation is freed. The
            // whole-heap-is-one-free-block branch only shrinks when size
            // is strictly greater than GIVE_BACK_SIZE, so this exact
            // match skips give-back by a hair, not by a wide margin.
            assert_eq!(heap_size_before, heap_size_after);
        }
    }

    #[test]
    fn null_propagation() {
        let engine = SingleArenaEngine::new();
        unsafe {
            assert!(engine.allocate(0).is_null());
            engine.deallocate(ptr::null_mut());
            assert_eq!(engine.reallocate(ptr::null_mut(), 0), ptr::null_mut());
            let a = engine.allocate(64);
            assert_eq!(engine.reallocate(a, 0), ptr::null_mut());
        }
    }
}
