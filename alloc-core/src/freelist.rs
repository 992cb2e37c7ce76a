//! Sentinel-bounded, address-sorted doubly-linked free list (spec.md §3
//! "Free list", §9 "Sentinel-bounded doubly-linked lists").
//!
//! This is the narrowly-scoped unsafe boundary spec.md §9 calls for:
//! every raw-pointer block operation (insert, split, coalesce,
//! adjacency scan for realloc) lives here. Callers above this module
//! only ever see `*mut BlockHeader`.

use std::ptr;

use crate::block::{block_end, BlockHeader, HEADER_SIZE};
use crate::config::MIN_BLOCK_SIZE;

/// A free block, overlaid on the same memory as a `BlockHeader` — `size`
/// occupies the same offset in both, so a block can be reinterpreted
/// between the two views depending on whether it is allocated or free.
#[repr(C)]
struct FreeNode {
    size: usize,
    prev: *mut FreeNode,
    next: *mut FreeNode,
}

#[inline]
unsafe fn link(left: *mut FreeNode, right: *mut FreeNode) {
    (*right).prev = left;
    (*left).next = right;
}

#[inline]
unsafe fn link_left(new: *mut FreeNode, at: *mut FreeNode) {
    link((*at).prev, new);
    link(new, at);
}

#[inline]
unsafe fn link_right(at: *mut FreeNode, new: *mut FreeNode) {
    link(new, (*at).next);
    link(at, new);
}

#[inline]
unsafe fn unlink(node: *mut FreeNode) {
    link((*node).prev, (*node).next);
}

#[inline]
unsafe fn replace(old: *mut FreeNode, new: *mut FreeNode) {
    link((*old).prev, new);
    link(new, (*old).next);
}

#[inline]
unsafe fn node_end(node: *mut FreeNode) -> *mut u8 {
    block_end(node as *mut BlockHeader)
}

/// Two heap-boxed sentinels so every insertion/removal is branch-free at
/// the ends of the list (spec.md §9). The boxes are never reallocated
/// after construction, so `FreeList` itself may move freely (e.g. inside
/// an array of arenas) without invalidating the sentinel addresses the
/// list's interior pointers hold.
pub struct FreeList {
    begin: Box<FreeNode>,
    end: Box<FreeNode>,
}

// `FreeNode`'s raw pointers make `FreeList` `!Send` under the normal
// auto-trait rules, but a `FreeList` only ever addresses memory owned by
// its own sentinels and the blocks inserted into it — nothing it points
// to is shared with another `FreeList` — so it is sound to move between
// threads. Needed for `Spinlock<FreeList>: Sync` (spinlock.rs requires
// `T: Send`), which `single::State` and `multi::MultiArenaEngine`'s
// arena array both rely on.
unsafe impl Send for FreeList {}

impl FreeList {
    pub fn new() -> FreeList {
        let mut begin = Box::new(FreeNode { size: 0, prev: ptr::null_mut(), next: ptr::null_mut() });
        let mut end = Box::new(FreeNode { size: 0, prev: ptr::null_mut(), next: ptr::null_mut() });
        let begin_ptr: *mut FreeNode = begin.as_mut();
        let end_ptr: *mut FreeNode = end.as_mut();
        begin.next = end_ptr;
        end.prev = begin_ptr;
        FreeList { begin, end }
    }

    #[inline]
    fn begin_ptr(&self) -> *mut FreeNode {
        self.begin.as_ref() as *const FreeNode as *mut FreeNode
    }

    #[inline]
    fn end_ptr(&self) -> *mut FreeNode {
        self.end.as_ref() as *const FreeNode as *mut FreeNode
    }

    pub fn is_empty(&self) -> bool {
        self.begin.next == self.end_ptr()
    }

    /// Inserts `block` (a `BlockHeader` whose `size` is already set) at
    /// its address-sorted position, then coalesces repeatedly with
    /// immediate neighbors on both sides until none remain.
    ///
    /// # Safety
    /// `block` must not already be on any free list and must describe a
    /// live, unshared region of at least `MIN_BLOCK_SIZE` bytes.
    pub unsafe fn insert_coalesce(&mut self, block: *mut BlockHeader) {
        let block = block as *mut FreeNode;
        let end = self.end_ptr();
        if self.begin.next != end {
            let mut b = self.begin.next;
            loop {
                if b > block {
                    link_left(block, b);
                    break;
                }
                if (*b).next == end {
                    link_right(b, block);
                    break;
                }
                b = (*b).next;
            }
        } else {
            link_right(self.begin_ptr(), block);
        }

        let mut block = block;
        loop {
            if node_end(block) == (*block).next as *mut u8 {
                let right = (*block).next;
                (*block).size += (*right).size;
                unlink(right);
                continue;
            }
            let left = (*block).prev;
            if left != self.begin_ptr() && node_end(left) == block as *mut u8 {
                (*left).size += (*block).size;
                unlink(block);
                block = left;
                continue;
            }
            break;
        }
    }

    /// First-fit search; on hit, removes (splitting off a trailing
    /// remainder when it would be large enough to stand alone) and
    /// returns the located block, resized to exactly `ns`.
    ///
    /// # Safety
    /// The list must be well-formed (sentinels linked, sizes accurate).
    pub unsafe fn take_first_fit(&mut self, ns: usize) -> Option<*mut BlockHeader> {
        let end = self.end_ptr();
        let mut b = self.begin.next;
        while b != end {
            if (*b).size >= ns {
                return Some(self.split_off(b, ns));
            }
            b = (*b).next;
        }
        None
    }

    unsafe fn split_off(&mut self, b: *mut FreeNode, s: usize) -> *mut BlockHeader {
        let remainder = (*b).size - s;
        if remainder >= MIN_BLOCK_SIZE {
            let nb = (b as *mut u8).add(s) as *mut FreeNode;
            (*nb).size = remainder;
            replace(b, nb);
            (*b).size = s;
        } else {
            unlink(b);
        }
        b as *mut BlockHeader
    }

    /// Attempts to extend `block` (not currently on this list) to at
    /// least `target_size` by merging with a free neighbor immediately
    /// to its left or right (spec.md §4.1 "Heap path — reallocation").
    ///
    /// On a right-adjacent merge the block extends in place and the
    /// same pointer is returned. On a left-adjacent merge the payload is
    /// copied (`payload_len` bytes) into the neighbor's position and
    /// that pointer is returned.
    ///
    /// # Safety
    /// `block` must describe a live region not on this free list, with
    /// at least `payload_len` readable bytes following its header.
    pub unsafe fn merge_adjacent(
        &mut self,
        block: *mut BlockHeader,
        target_size: usize,
        payload_len: usize,
    ) -> Option<*mut BlockHeader> {
        if self.is_empty() {
            return None;
        }
        let block_end_addr = block_end(block);
        let block = block as *mut FreeNode;
        let end = self.end_ptr();
        let mut c = self.begin.next;
        while c != end {
            let c_start = c as *mut u8;
            if node_end(c) == block as *mut u8 {
                // Left-adjacent: c ends exactly where block begins.
                if (*c).size + (*block).size >= target_size {
                    let remainder = (*c).size + (*block).size - target_size;
                    let prev = (*c).prev;
                    let next = (*c).next;
                    ptr::copy(
                        (block as *mut u8).add(HEADER_SIZE),
                        (c as *mut u8).add(HEADER_SIZE),
                        payload_len,
                    );
                    if remainder >= MIN_BLOCK_SIZE {
                        (*c).size = target_size;
                        let nb = (c as *mut u8).add(target_size) as *mut FreeNode;
                        (*nb).size = remainder;
                        link(prev, nb);
                        link(nb, next);
                    } else {
                        link(prev, next);
                    }
                    return Some(c as *mut BlockHeader);
                }
            }
            if c_start as *mut u8 == block_end_addr {
                // Right-adjacent: c begins exactly where block ends.
                if (*block).size + (*c).size >= target_size {
                    let remainder = (*block).size + (*c).size - target_size;
                    if remainder >= MIN_BLOCK_SIZE {
                        let nb = (block as *mut u8).add(target_size) as *mut FreeNode;
                        (*nb).size = remainder;
                        replace(c, nb);
                        (*block).size = target_size;
                    } else {
                        unlink(c);
                        (*block).size += (*c).size;
                    }
                    return Some(block as *mut BlockHeader);
                }
                // No other free block can be adjacent past this point.
                break;
            }
            if c_start > block_end_addr {
                break;
            }
            c = (*c).next;
        }
        None
    }

    /// Removes and returns the last (highest-address) free block on the
    /// list, if any, without unlinking it — used by the give-back check,
    /// which may decide to shrink the block in place instead of
    /// unlinking it entirely.
    pub fn last(&self) -> Option<*mut BlockHeader> {
        let end = self.end_ptr();
        let last = unsafe { (*end).prev };
        if last == self.begin_ptr() {
            None
        } else {
            Some(last as *mut BlockHeader)
        }
    }

    /// Unlinks a specific node (e.g. the one returned by [`Self::last`]).
    ///
    /// # Safety
    /// `node` must currently be linked into this list.
    pub unsafe fn remove(&mut self, node: *mut BlockHeader) {
        unlink(node as *mut FreeNode);
    }

    /// Iterates free blocks in ascending address order, for diagnostics.
    pub fn iter(&self) -> FreeListIter<'_> {
        FreeListIter { cur: self.begin.next, end: self.end_ptr(), _marker: std::marker::PhantomData }
    }
}

pub struct FreeListIter<'a> {
    cur: *mut FreeNode,
    end: *mut FreeNode,
    _marker: std::marker::PhantomData<&'a FreeList>,
}

impl<'a> Iterator for FreeListIter<'a> {
    type Item = (*mut BlockHeader, usize, *mut BlockHeader, *mut BlockHeader);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == self.end {
            return None;
        }
        unsafe {
            let node = self.cur;
            let item = (
                node as *mut BlockHeader,
                (*node).size,
                (*node).prev as *mut BlockHeader,
                (*node).next as *mut BlockHeader,
            );
            self.cur = (*node).next;
            Some(item)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc, dealloc, Layout};

    struct Arena {
        ptr: *mut u8,
        layout: Layout,
    }

    impl Arena {
        fn new(size: usize) -> Arena {
            let layout = Layout::from_size_align(size, 64).unwrap();
            let ptr = unsafe { alloc(layout) };
            Arena { ptr, layout }
        }

        unsafe fn block_at(&self, offset: usize, size: usize) -> *mut BlockHeader {
            let b = self.ptr.add(offset) as *mut BlockHeader;
            (*b).size = size;
            b
        }
    }

    impl Drop for Arena {
        fn drop(&mut self) {
            unsafe { dealloc(self.ptr, self.layout) }
        }
    }

    #[test]
    fn insert_then_take_first_fit_round_trips() {
        let arena = Arena::new(256);
        let mut list = FreeList::new();
        unsafe {
            let b = arena.block_at(0, 64);
            list.insert_coalesce(b);
            assert!(!list.is_empty());
            let found = list.take_first_fit(64).unwrap();
            assert_eq!(found, b);
            assert!(list.is_empty());
        }
    }

    #[test]
    fn adjacent_blocks_coalesce_into_one() {
        let arena = Arena::new(256);
        let mut list = FreeList::new();
        unsafe {
            let a = arena.block_at(0, 64);
            let b = arena.block_at(64, 64);
            list.insert_coalesce(a);
            list.insert_coalesce(b);
            let entries: Vec<_> = list.iter().collect();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].1, 128);
        }
    }

    #[test]
    fn split_leaves_remainder_on_list() {
        let arena = Arena::new(256);
        let mut list = FreeList::new();
        unsafe {
            let b = arena.block_at(0, 128);
            list.insert_coalesce(b);
            let found = list.take_first_fit(64).unwrap();
            assert_eq!(found, b);
            assert_eq!((*found).size, 64);
            let entries: Vec<_> = list.iter().collect();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].1, 64);
        }
    }

    #[test]
    fn right_adjacent_merge_extends_in_place() {
        let arena = Arena::new(256);
        let mut list = FreeList::new();
        unsafe {
            let allocated = arena.block_at(0, 64);
            let free = arena.block_at(64, 192);
            list.insert_coalesce(free);
            let merged = list.merge_adjacent(allocated, 256, 64 - HEADER_SIZE).unwrap();
            assert_eq!(merged, allocated);
            assert_eq!((*merged).size, 256);
            assert!(list.is_empty());
        }
    }
}
