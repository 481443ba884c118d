//! Variable handles.
//!
//! A [`VarId`] is a plain integer whose numeric range says where the slot
//! lives:
//!
//! | range                          | location                               |
//! |--------------------------------|----------------------------------------|
//! | `1 .. STACK_BASE`              | global slot `raw - 1`                  |
//! | `STACK_BASE .. HEAP_BASE`      | stack slot `base + (raw - STACK_ORIGIN)` |
//! | `HEAP_BASE ..`                 | heap slot `raw - HEAP_BASE`            |
//!
//! Stack handles are relative to the current base pointer, so the same
//! handle names a different slot once a frame is entered. Offsets below the
//! origin address slots beneath the base, which is where a caller leaves
//! parameters.

use std::{fmt, num::NonZeroU32};

pub const STACK_BASE: u32 = 0x0100_0000;
pub const STACK_ORIGIN: u32 = 0x2000_0000;
pub const HEAP_BASE: u32 = 0x4000_0000;

/// Largest number of global slots addressable by a handle.
pub const MAX_GLOBALS: usize = (STACK_BASE - 1) as usize;
/// Largest number of heap slots addressable by a handle.
pub const MAX_HEAP: usize = (u32::MAX - HEAP_BASE) as usize;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(NonZeroU32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Location {
    Global(usize),
    /// Offset from the base pointer.
    Stack(i64),
    Heap(usize),
}

impl VarId {
    /// Rebuilds a handle from its raw value. Zero is never a handle.
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0.get()
    }

    /// Handle of the stack slot `offset` places above the current base.
    /// Negative offsets reach below the base.
    pub fn local(offset: i32) -> Self {
        let raw = STACK_ORIGIN.wrapping_add_signed(offset);
        debug_assert!((STACK_BASE..HEAP_BASE).contains(&raw));
        Self::from_raw(raw).unwrap_or(Self(NonZeroU32::MIN))
    }

    pub(crate) fn global(index: usize) -> Self {
        debug_assert!(index < MAX_GLOBALS);
        Self::from_raw(index as u32 + 1).unwrap_or(Self(NonZeroU32::MIN))
    }

    pub(crate) fn heap(index: usize) -> Self {
        debug_assert!(index < MAX_HEAP);
        Self::from_raw(HEAP_BASE + index as u32).unwrap_or(Self(NonZeroU32::MIN))
    }

    pub(crate) fn location(self) -> Location {
        let raw = self.raw();
        if raw < STACK_BASE {
            Location::Global(raw as usize - 1)
        } else if raw < HEAP_BASE {
            Location::Stack(raw as i64 - STACK_ORIGIN as i64)
        } else {
            Location::Heap((raw - HEAP_BASE) as usize)
        }
    }

    pub fn is_global(self) -> bool {
        self.raw() < STACK_BASE
    }

    pub fn is_stack(self) -> bool {
        (STACK_BASE..HEAP_BASE).contains(&self.raw())
    }

    pub fn is_heap(self) -> bool {
        self.raw() >= HEAP_BASE
    }

    /// Handle `n` slots further on in the same region.
    pub fn offset(self, n: u32) -> Self {
        self.raw().checked_add(n).and_then(Self::from_raw).unwrap_or(self)
    }
}

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            Location::Global(i) => write!(f, "VarId(global {i})"),
            Location::Stack(i) => write!(f, "VarId(local {i})"),
            Location::Heap(i) => write!(f, "VarId(heap {i})"),
        }
    }
}

/// Identity of an object backing inside one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Function a function record is bound to. Opaque to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FunctionId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_are_disjoint() {
        let g = VarId::global(0);
        let s = VarId::local(0);
        let h = VarId::heap(0);
        assert!(g.is_global() && !g.is_stack() && !g.is_heap());
        assert!(s.is_stack() && !s.is_global() && !s.is_heap());
        assert!(h.is_heap() && !h.is_global() && !h.is_stack());
        assert_eq!(g.raw(), 1, "global 0 must skip the reserved handle");
    }

    #[test]
    fn test_location_round_trip() {
        assert_eq!(VarId::global(41).location(), Location::Global(41));
        assert_eq!(VarId::local(-2).location(), Location::Stack(-2));
        assert_eq!(VarId::local(7).location(), Location::Stack(7));
        assert_eq!(VarId::heap(1234).location(), Location::Heap(1234));
    }

    #[test]
    fn test_zero_is_not_a_handle() {
        assert!(VarId::from_raw(0).is_none());
    }

    #[test]
    fn test_offset_stays_in_region() {
        let first = VarId::local(0);
        assert_eq!(first.offset(2), VarId::local(2));
        assert_eq!(VarId::heap(3).offset(1), VarId::heap(4));
    }
}
