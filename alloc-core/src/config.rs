//! Fixed tunables. All reference values from the original implementation;
//! none of these are meant to be runtime- or environment-configurable.

/// Smallest block ever placed on a free list, header included.
pub const MIN_BLOCK_SIZE: usize = 32;

/// Heap growth request floor, in bytes, when no free block satisfies a request.
pub const ALLOC_SIZE: usize = 32 * 1024 * 1024;

/// Trailing free region size (at the end of the heap) that triggers give-back.
pub const GIVE_BACK_SIZE: usize = 32 * 1024 * 1024;

/// Requests whose optimal block size reaches this threshold take the large-block path.
pub const MMAP_SIZE: usize = 1024 * 1024;

/// Number of independent arenas in the multi-arena engine.
pub const FREELIST_SIZE: usize = 4;

/// Spin iterations before a lock falls back to yielding the scheduler.
pub const SPIN_BOUND: u32 = 10;
