//! Diagnostic operations (spec.md §6: `describe`, `describe_freelist`).
//!
//! "Diagnostic printing formats... for human consumption" are out of
//! scope per spec.md §1, so these emit structured `log` events rather
//! than formatted stdout — the operations themselves are named
//! [MODULE] entries and are implemented in full.

use crate::block::{block_end, BlockHeader};
use crate::freelist::FreeList;
use crate::heap::HeapBounds;

/// Logs `header`'s own size plus its left and right memory-adjacent
/// neighbors (found by walking from `heap_start`, since the header
/// format carries no back-link — spec.md §9: "the header stores only
/// size").
pub fn describe_block(bounds: &HeapBounds, header: *mut BlockHeader) {
    let addr = header as usize;
    let size = unsafe { (*header).size };
    log::info!("block {:#x} size={}", addr, size);

    if bounds.is_large(addr) {
        log::info!("  (large block, no heap neighbors)");
        return;
    }

    let mut cursor = bounds.heap_start() as *mut BlockHeader;
    let mut left: Option<(usize, usize)> = None;
    while (cursor as usize) < bounds.heap_end() {
        let cur_size = unsafe { (*cursor).size };
        if cursor as usize == addr {
            break;
        }
        left = Some((cursor as usize, cur_size));
        cursor = unsafe { block_end(cursor) } as *mut BlockHeader;
    }
    match left {
        Some((a, s)) => log::info!("  left neighbor: {:#x} size={}", a, s),
        None => log::info!("  left neighbor: none (first block on heap)"),
    }

    let right = unsafe { block_end(header) } as *mut BlockHeader;
    if (right as usize) < bounds.heap_end() {
        log::info!("  right neighbor: {:#x} size={}", right as usize, unsafe { (*right).size });
    } else {
        log::info!("  right neighbor: none (last block on heap)");
    }
}

/// Logs heap/mmap totals and each free list's ascending chain of
/// `(address, size, prev, next)`.
pub fn describe_freelist(bounds: &HeapBounds, lists: &[&FreeList]) {
    log::info!(
        "heap size {} MiB, mmap total {} MiB, {} free list(s)",
        bounds.heap_size() / (1024 * 1024),
        bounds.mmap_size / (1024 * 1024),
        lists.len()
    );
    for (i, list) in lists.iter().enumerate() {
        log::info!("free list {i} {{");
        for (addr, size, prev, next) in list.iter() {
            log::info!("  {:#x}[{}|{:#x}|{:#x}]", addr as usize, size, prev as usize, next as usize);
        }
        log::info!("}}");
    }
}
