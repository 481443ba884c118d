//! Raw slot storage: the stack, the heap and the global blocks.
//!
//! Nothing here knows about arena blocks or objects. Removing a slot hands
//! its contents back to the caller, who is responsible for tearing them
//! down.

use std::{collections::BTreeMap, mem};

use crate::{
    Result, StoreError,
    handle::{Location, MAX_GLOBALS, MAX_HEAP, VarId},
    value::Slot,
};

const NO_SLOT: u32 = u32::MAX;

#[derive(Debug)]
pub(crate) enum HeapCell {
    Used(Slot),
    Free { next: u32 },
}

#[derive(Debug)]
pub(crate) struct Vars {
    pub(crate) stack: Vec<Slot>,
    pub(crate) base: usize,
    max_stack: usize,

    pub(crate) heap: Vec<HeapCell>,
    free_head: u32,
    heap_used: usize,
    heap_chunk: usize,

    pub(crate) globals: Vec<Option<Slot>>,
    /// start -> length of every allocated block
    global_blocks: BTreeMap<usize, usize>,
    /// released ranges, kept sorted by start
    global_free: Vec<(usize, usize)>,

    /// Bumped whenever a slot is given contents that may reach an object.
    object_writes: u64,
}

impl Vars {
    pub(crate) fn new(initial_stack: usize, max_stack: usize, heap_chunk: usize) -> Self {
        Self {
            stack: Vec::with_capacity(initial_stack),
            base: 0,
            max_stack,
            heap: Vec::new(),
            free_head: NO_SLOT,
            heap_used: 0,
            heap_chunk,
            globals: Vec::new(),
            global_blocks: BTreeMap::new(),
            global_free: Vec::new(),
            object_writes: 0,
        }
    }

    // ── Lookup ────────────────────────────────────────────────────────

    fn stack_index(&self, offset: i64, h: VarId) -> Result<usize> {
        let index = self.base as i64 + offset;
        if index < 0 || index as usize >= self.stack.len() {
            return Err(StoreError::InvalidHandle(h.raw()));
        }
        Ok(index as usize)
    }

    pub(crate) fn get(&self, h: VarId) -> Result<&Slot> {
        let invalid = StoreError::InvalidHandle(h.raw());
        match h.location() {
            Location::Global(i) => {
                self.globals.get(i).and_then(Option::as_ref).ok_or(invalid)
            }
            Location::Stack(offset) => Ok(&self.stack[self.stack_index(offset, h)?]),
            Location::Heap(i) => match self.heap.get(i) {
                Some(HeapCell::Used(slot)) => Ok(slot),
                _ => Err(invalid),
            },
        }
    }

    pub(crate) fn get_mut(&mut self, h: VarId) -> Result<&mut Slot> {
        let invalid = StoreError::InvalidHandle(h.raw());
        match h.location() {
            Location::Global(i) => {
                self.globals.get_mut(i).and_then(Option::as_mut).ok_or(invalid)
            }
            Location::Stack(offset) => {
                let index = self.stack_index(offset, h)?;
                Ok(&mut self.stack[index])
            }
            Location::Heap(i) => match self.heap.get_mut(i) {
                Some(HeapCell::Used(slot)) => Ok(slot),
                _ => Err(invalid),
            },
        }
    }

    /// Stores `slot` in `h` and returns what was there.
    pub(crate) fn put(&mut self, h: VarId, slot: Slot) -> Result<Slot> {
        let place = self.get_mut(h)?;
        let holds_objects = slot.may_hold_objects();
        let old = mem::replace(place, slot);
        if holds_objects {
            self.object_writes += 1;
        }
        Ok(old)
    }

    /// Empties `h` and returns what was there.
    pub(crate) fn take(&mut self, h: VarId) -> Result<Slot> {
        self.put(h, Slot::Uninit)
    }

    /// Count of writes that may have stored an object reference.
    pub(crate) fn object_writes(&self) -> u64 {
        self.object_writes
    }

    // ── Heap ──────────────────────────────────────────────────────────

    pub(crate) fn heap_alloc(&mut self, slot: Slot) -> Result<VarId> {
        if self.free_head == NO_SLOT {
            self.grow_heap()?;
        }
        let index = self.free_head as usize;
        let HeapCell::Free { next } = self.heap[index] else {
            return Err(StoreError::Internal("heap free list points at a used slot"));
        };
        self.free_head = next;
        if slot.may_hold_objects() {
            self.object_writes += 1;
        }
        self.heap[index] = HeapCell::Used(slot);
        self.heap_used += 1;
        Ok(VarId::heap(index))
    }

    fn grow_heap(&mut self) -> Result<()> {
        let start = self.heap.len();
        let end = (start + self.heap_chunk).min(MAX_HEAP);
        if end == start {
            return Err(StoreError::Internal("heap handle space exhausted"));
        }
        self.heap.reserve(end - start);
        for index in start..end {
            let next = if index + 1 < end { index as u32 + 1 } else { NO_SLOT };
            self.heap.push(HeapCell::Free { next });
        }
        self.free_head = start as u32;
        log::trace!("vars: heap grown to {end} slots");
        Ok(())
    }

    /// Returns the heap slot to the free list and hands back its contents.
    pub(crate) fn heap_free(&mut self, index: usize) -> Result<Slot> {
        let cell = self
            .heap
            .get_mut(index)
            .ok_or(StoreError::Internal("heap index out of range"))?;
        let freed = mem::replace(cell, HeapCell::Free { next: self.free_head });
        match freed {
            HeapCell::Used(slot) => {
                self.free_head = index as u32;
                self.heap_used -= 1;
                Ok(slot)
            }
            HeapCell::Free { next } => {
                *cell = HeapCell::Free { next };
                Err(StoreError::Internal("double free of a heap slot"))
            }
        }
    }

    pub(crate) fn heap_used(&self) -> usize {
        self.heap_used
    }

    pub(crate) fn heap_capacity(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn heap_slot(&self, index: usize) -> Option<&Slot> {
        match self.heap.get(index) {
            Some(HeapCell::Used(slot)) => Some(slot),
            _ => None,
        }
    }

    // ── Stack ─────────────────────────────────────────────────────────

    pub(crate) fn frame_len(&self) -> usize {
        self.stack.len() - self.base
    }

    pub(crate) fn reserve_stack(&self, n: usize) -> Result<()> {
        match self.stack.len().checked_add(n) {
            Some(depth) if depth <= self.max_stack => Ok(()),
            _ => Err(StoreError::StackOverflow),
        }
    }

    /// Pushes `n` empty slots and returns the handle of the first.
    pub(crate) fn push(&mut self, n: usize) -> Result<VarId> {
        self.reserve_stack(n)?;
        let first = VarId::local(self.frame_len() as i32);
        self.stack.resize_with(self.stack.len() + n, || Slot::Uninit);
        Ok(first)
    }

    /// Removes the top `n` slots of the current frame.
    pub(crate) fn pop(&mut self, n: usize) -> Result<Vec<Slot>> {
        if n > self.frame_len() {
            return Err(StoreError::StackUnderflow);
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    // ── Globals ───────────────────────────────────────────────────────

    /// Allocates a block of `n` global slots, first-fit over released ranges.
    pub(crate) fn alloc_globals(&mut self, n: usize) -> Result<usize> {
        if n == 0 {
            return Err(StoreError::Internal("empty global block"));
        }
        let start = match self.global_free.iter().position(|&(_, len)| len >= n) {
            Some(pos) => {
                let (start, len) = self.global_free[pos];
                if len == n {
                    self.global_free.remove(pos);
                } else {
                    self.global_free[pos] = (start + n, len - n);
                }
                start
            }
            None => {
                let start = self.globals.len();
                if start + n > MAX_GLOBALS {
                    return Err(StoreError::Internal("global handle space exhausted"));
                }
                self.globals.resize_with(start + n, || None);
                start
            }
        };
        for slot in &mut self.globals[start..start + n] {
            *slot = Some(Slot::Uninit);
        }
        self.global_blocks.insert(start, n);
        Ok(start)
    }

    /// Releases the block starting at `start` and returns its slots.
    pub(crate) fn free_globals(&mut self, start: usize) -> Result<Vec<Slot>> {
        let len = self
            .global_blocks
            .remove(&start)
            .ok_or(StoreError::InvalidHandle(VarId::global(start).raw()))?;
        let slots = self.globals[start..start + len]
            .iter_mut()
            .filter_map(Option::take)
            .collect();

        let pos = self.global_free.partition_point(|&(s, _)| s < start);
        self.global_free.insert(pos, (start, len));
        if pos + 1 < self.global_free.len() {
            let (next_start, next_len) = self.global_free[pos + 1];
            if start + len == next_start {
                self.global_free[pos].1 += next_len;
                self.global_free.remove(pos + 1);
            }
        }
        if pos > 0 {
            let (prev_start, prev_len) = self.global_free[pos - 1];
            if prev_start + prev_len == start {
                self.global_free[pos - 1].1 += self.global_free[pos].1;
                self.global_free.remove(pos);
            }
        }
        Ok(slots)
    }

    pub(crate) fn global_count(&self) -> usize {
        self.global_blocks.values().sum()
    }

    pub(crate) fn global_slots(&self) -> impl Iterator<Item = &Slot> {
        self.globals.iter().filter_map(Option::as_ref)
    }
}
