//! Fixed-size pointer table mapping script slot indices to live
//! allocations (spec.md §4.3 "Pointer table").

use std::ptr;

/// Number of addressable slots. The original harness sizes its pointer
/// table to a fixed constant rather than growing it dynamically; scripts
/// that reference an index at or beyond this bound are out of range and
/// the caller is told so rather than silently wrapping or panicking.
pub const SLOTS: usize = 4096;

pub struct PointerTable {
    slots: Box<[*mut u8; SLOTS]>,
}

impl PointerTable {
    pub fn new() -> PointerTable {
        PointerTable { slots: Box::new([ptr::null_mut(); SLOTS]) }
    }

    /// Current contents of `index`, or `None` if out of range.
    pub fn get(&self, index: usize) -> Option<*mut u8> {
        self.slots.get(index).copied()
    }

    /// Records `ptr` at `index`, returning the previous occupant (if any)
    /// so the caller can free it first when reusing a slot. Returns
    /// `Err(())` if `index` is out of range.
    pub fn set(&mut self, index: usize, ptr: *mut u8) -> Result<*mut u8, ()> {
        match self.slots.get_mut(index) {
            Some(slot) => {
                let old = *slot;
                *slot = ptr;
                Ok(old)
            }
            None => Err(()),
        }
    }

    /// Clears `index`, returning what was there. Returns `Err(())` if
    /// `index` is out of range.
    pub fn clear(&mut self, index: usize) -> Result<*mut u8, ()> {
        self.set(index, ptr::null_mut())
    }

    /// All currently-live (non-null) pointers, for teardown at the end
    /// of a replay run.
    pub fn live(&self) -> impl Iterator<Item = *mut u8> + '_ {
        self.slots.iter().copied().filter(|p| !p.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_has_no_live_pointers() {
        let table = PointerTable::new();
        assert_eq!(table.live().count(), 0);
    }

    #[test]
    fn set_returns_previous_occupant() {
        let mut table = PointerTable::new();
        let a = 1 as *mut u8;
        let b = 2 as *mut u8;
        assert_eq!(table.set(0, a).unwrap(), ptr::null_mut());
        assert_eq!(table.set(0, b).unwrap(), a);
        assert_eq!(table.get(0), Some(b));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut table = PointerTable::new();
        assert!(table.set(SLOTS, 1 as *mut u8).is_err());
        assert!(table.get(SLOTS).is_none());
    }
}
