//! Heap bounds bookkeeping shared by the single- and multi-arena
//! engines: the program break, the running mmap total, and the
//! large-block address test (spec.md §3 "Heap", "Large block").

use crate::config::ALLOC_SIZE;
use crate::error::Result;
use crate::os::{self, ProgramBreak};

fn page_size() -> usize {
    // sysconf(_SC_PAGESIZE) never changes at runtime; the syscall itself
    // is cheap enough on Linux that caching it would only add a OnceLock
    // for no measurable benefit here.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

pub struct HeapBounds {
    program_break: ProgramBreak,
    pub(crate) mmap_size: usize,
}

impl HeapBounds {
    pub const fn new() -> HeapBounds {
        HeapBounds { program_break: ProgramBreak::new(), mmap_size: 0 }
    }

    pub fn heap_start(&self) -> usize {
        self.program_break.start().map_or(0, |p| p as usize)
    }

    pub fn heap_end(&self) -> usize {
        self.heap_start() + self.program_break.committed_size()
    }

    pub fn heap_size(&self) -> usize {
        self.program_break.committed_size()
    }

    /// True when `addr` falls outside the managed heap range, i.e. it
    /// must be a large (directly mapped) block.
    pub fn is_large(&self, addr: usize) -> bool {
        let start = self.heap_start();
        !(start != 0 && start <= addr && addr < self.heap_end())
    }

    /// Grows the heap enough to satisfy an `ns`-byte request; returns
    /// the pointer to the new block and the size of the trailing
    /// remainder (possibly 0, possibly below `MIN_BLOCK_SIZE`).
    pub fn grow(&mut self, ns: usize) -> Result<(*mut u8, usize)> {
        let page = page_size();
        let mut pages_size = (ns / page + 1) * page;
        if pages_size < ALLOC_SIZE {
            pages_size = ALLOC_SIZE;
        }
        let p = self.program_break.grow(pages_size)?;
        Ok((p, pages_size - ns))
    }

    /// Returns `bytes` at the end of the heap back to the OS.
    pub fn give_back(&mut self, bytes: usize) -> Result<()> {
        self.program_break.shrink(bytes)
    }
}

/// Obtains a fresh large mapping sized for `n` usable bytes plus header.
pub fn map_large(size: usize) -> Result<*mut u8> {
    os::map_large(size)
}
