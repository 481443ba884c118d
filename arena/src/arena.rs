//! Block arena with segregated free lists.
//!
//! Every block, used or free, sits in a doubly linked list in address order
//! so neighbours can be merged in O(1). Free blocks are additionally linked
//! into one list per size class. When several free blocks share the exact
//! same capacity only the first one sits in the class list; the others hang
//! off it in a same-size chain, so a class walk visits each distinct size
//! once.

use thiserror::Error;

use crate::size_class::{CLASS_COUNT, class_of};

/// Granularity of block capacities in bytes.
pub const ALIGN: usize = 8;

const NIL: u32 = u32::MAX;
const MAX_BLOCK: usize = u32::MAX as usize;

// ── Errors ────────────────────────────────────────────────────────────

/// Allocator invariant violations. These are defects in the caller, never
/// recoverable conditions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArenaError {
    #[error("allocation {0} is past the end of the arena")]
    InvalidAllocation(u32),
    #[error("allocation {0} refers to a block that is not in use")]
    FreedAllocation(u32),
    #[error("reference count of allocation {0} overflowed")]
    RefcountOverflow(u32),
    #[error("requested {requested} bytes, more than a single block can hold")]
    TooLarge { requested: usize },
}

// ── Settings ──────────────────────────────────────────────────────────

/// When adjacent free blocks are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoalescePolicy {
    /// Merge with free physical neighbours on every free.
    #[default]
    Immediate,
    /// Only insert freed blocks; merge in a full pass right before the arena
    /// would have to grow, or when [`Arena::coalesce`] is called.
    Deferred,
}

#[derive(Debug, Clone)]
pub struct ArenaSettings {
    /// Bytes reserved up front for the backing buffer.
    pub initial_capacity: usize,
    /// Smallest remainder worth splitting off into its own free block.
    /// Must be a multiple of [`ALIGN`].
    pub min_split: usize,
    /// A private block shrunk to `capacity / shrink_divisor` or less gives its
    /// tail back to the free lists.
    pub shrink_divisor: usize,
    /// Upper bound on the slack added when a block has to be regrown.
    pub grow_cap: usize,
    pub coalesce: CoalescePolicy,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            initial_capacity: 64 * 1024,
            min_split: 16,
            shrink_divisor: 4,
            grow_cap: 64 * 1024,
            coalesce: CoalescePolicy::Immediate,
        }
    }
}

impl ArenaSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.min_split == 0 || self.min_split % ALIGN != 0 {
            return Err("min_split must be a non-zero multiple of ALIGN");
        }
        if self.shrink_divisor < 2 {
            return Err("shrink_divisor must be at least 2");
        }
        if self.grow_cap == 0 {
            return Err("grow_cap must be > 0");
        }
        if self.initial_capacity > MAX_BLOCK {
            return Err("initial_capacity too large");
        }
        Ok(())
    }
}

// ── Handles ───────────────────────────────────────────────────────────

/// One counted reference to an arena block.
///
/// Not `Clone`: a second reference only comes from
/// [`Arena::duplicate_reference`], and giving one up goes through
/// [`Arena::release_reference`], which consumes it.
#[must_use = "dropping an Allocation leaks its reference"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Allocation(u32);

impl Allocation {
    #[inline]
    pub fn id(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Used,
    Free,
    /// Header absorbed by a merge, waiting to be reused.
    Retired,
}

#[derive(Debug, Clone)]
struct Block {
    offset: usize,
    capacity: usize,
    size: usize,
    refcount: u32,
    state: BlockState,
    prev_phys: u32,
    next_phys: u32,
    // class list links, only set on the first block of a size
    prev_free: u32,
    next_free: u32,
    // same-size chain links
    prev_same: u32,
    next_same: u32,
}

impl Block {
    fn new(offset: usize, capacity: usize) -> Self {
        Self {
            offset,
            capacity,
            size: 0,
            refcount: 0,
            state: BlockState::Free,
            prev_phys: NIL,
            next_phys: NIL,
            prev_free: NIL,
            next_free: NIL,
            prev_same: NIL,
            next_same: NIL,
        }
    }
}

/// Snapshot of arena occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub capacity: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub blocks: usize,
    pub free_blocks: usize,
}

// ── Arena ─────────────────────────────────────────────────────────────

/// Single-threaded block arena. Callers serialise access; one arena belongs
/// to exactly one store.
#[derive(Debug)]
pub struct Arena {
    settings: ArenaSettings,
    bytes: Vec<u8>,
    blocks: Vec<Block>,
    retired: Vec<u32>,
    classes: [u32; CLASS_COUNT],
    first: u32,
    last: u32,
    used_blocks: usize,
    free_blocks: usize,
    free_bytes: usize,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(ArenaSettings::default())
    }
}

impl Arena {
    #[must_use]
    pub fn new(settings: ArenaSettings) -> Self {
        settings.validate().expect("Invalid Arena Settings");
        Self {
            bytes: Vec::with_capacity(settings.initial_capacity),
            settings,
            blocks: Vec::new(),
            retired: Vec::new(),
            classes: [NIL; CLASS_COUNT],
            first: NIL,
            last: NIL,
            used_blocks: 0,
            free_blocks: 0,
            free_bytes: 0,
        }
    }

    pub fn settings(&self) -> &ArenaSettings {
        &self.settings
    }

    /// Total bytes covered by blocks, free or used.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.bytes.len(),
            used_bytes: self.bytes.len() - self.free_bytes,
            free_bytes: self.free_bytes,
            blocks: self.used_blocks,
            free_blocks: self.free_blocks,
        }
    }

    // ── Public block API ──────────────────────────────────────────────

    /// Returns a block with refcount 1, logical size `size` and capacity of
    /// at least `reserve`. The first `size` bytes are zeroed.
    ///
    /// Free blocks are searched first-fit, starting at the request's class
    /// and escalating; the arena only grows when nothing fits.
    pub fn allocate(
        &mut self,
        size: usize,
        reserve: usize,
    ) -> Result<Allocation, ArenaError> {
        let capacity = Self::block_capacity(size.max(reserve))?;

        let id = match self.take_free(capacity) {
            Some(id) => id,
            None => {
                let merged = match self.settings.coalesce {
                    CoalescePolicy::Deferred => self.coalesce(),
                    CoalescePolicy::Immediate => 0,
                };
                match (merged > 0).then(|| self.take_free(capacity)).flatten()
                {
                    Some(id) => id,
                    None => self.grow(capacity),
                }
            }
        };

        self.claim(id, capacity, size);
        Ok(Allocation(id))
    }

    pub fn duplicate_reference(
        &mut self,
        alloc: &Allocation,
    ) -> Result<Allocation, ArenaError> {
        let block = self.used_mut(alloc.0)?;
        block.refcount = block
            .refcount
            .checked_add(1)
            .ok_or(ArenaError::RefcountOverflow(alloc.0))?;
        Ok(Allocation(alloc.0))
    }

    /// Gives up one reference; the block is destroyed when the count reaches 0.
    pub fn release_reference(
        &mut self,
        alloc: Allocation,
    ) -> Result<(), ArenaError> {
        let id = alloc.0;
        let block = self.used_mut(id)?;
        block.refcount -= 1;
        if block.refcount == 0 {
            self.destroy_block(id);
        }
        Ok(())
    }

    pub fn is_shared(&self, alloc: &Allocation) -> Result<bool, ArenaError> {
        Ok(self.used(alloc.0)?.refcount > 1)
    }

    pub fn refcount(&self, alloc: &Allocation) -> Result<u32, ArenaError> {
        Ok(self.used(alloc.0)?.refcount)
    }

    /// Declared logical size of the block.
    pub fn get_buffer_size(
        &self,
        alloc: &Allocation,
    ) -> Result<usize, ArenaError> {
        Ok(self.used(alloc.0)?.size)
    }

    pub fn block_capacity_of(
        &self,
        alloc: &Allocation,
    ) -> Result<usize, ArenaError> {
        Ok(self.used(alloc.0)?.capacity)
    }

    /// Bytes of the block's logical size.
    pub fn read(&self, alloc: &Allocation) -> Result<&[u8], ArenaError> {
        let block = self.used(alloc.0)?;
        Ok(&self.bytes[block.offset..block.offset + block.size])
    }

    /// Mutable bytes of the block's logical size. Copy-on-write is the
    /// caller's business: this does not check [`Arena::is_shared`].
    pub fn write(
        &mut self,
        alloc: &Allocation,
    ) -> Result<&mut [u8], ArenaError> {
        let block = self.used(alloc.0)?;
        let range = block.offset..block.offset + block.size;
        Ok(&mut self.bytes[range])
    }

    /// Returns a block with refcount exactly 1 and logical size `new_size`.
    ///
    /// An unshared block is reused in place when it fits: shrinking at or
    /// below `capacity / shrink_divisor` hands the tail back to the free
    /// lists, and growing first tries to absorb a free physical successor or
    /// extend the arena when the block is last. Otherwise a new block with
    /// geometric slack is allocated, `alloc` is released, and the old bytes
    /// are copied over when `preserve` is set. Bytes past the old size are
    /// zeroed.
    pub fn make_private(
        &mut self,
        alloc: Allocation,
        new_size: usize,
        preserve: bool,
    ) -> Result<Allocation, ArenaError> {
        let id = alloc.0;
        let block = self.used(id)?;
        let (refcount, capacity, old_size) =
            (block.refcount, block.capacity, block.size);

        if refcount == 1 {
            if new_size <= capacity {
                let shrinks = new_size
                    .checked_mul(self.settings.shrink_divisor)
                    .is_some_and(|scaled| scaled <= capacity);
                if shrinks {
                    let keep = Self::block_capacity(new_size)?;
                    self.trim(id, keep);
                }
                self.resize_in_place(id, old_size, new_size, preserve);
                return Ok(alloc);
            }
            let wanted = Self::block_capacity(self.grow_reserve(new_size))?;
            if self.extend_in_place(id, wanted) {
                self.resize_in_place(id, old_size, new_size, preserve);
                return Ok(alloc);
            }
        }

        let reserve = if new_size > old_size {
            self.grow_reserve(new_size)
        } else {
            new_size
        };
        let fresh = self.allocate(new_size, reserve)?;
        if preserve {
            let src = self.blocks[id as usize].offset;
            let dst = self.blocks[fresh.0 as usize].offset;
            let count = old_size.min(new_size);
            self.bytes.copy_within(src..src + count, dst);
        }
        self.release_reference(alloc)?;
        Ok(fresh)
    }

    /// [`Arena::make_private`] for a reference held in place. On error `alloc`
    /// is left untouched and still valid.
    pub fn reshape(
        &mut self,
        alloc: &mut Allocation,
        new_size: usize,
        preserve: bool,
    ) -> Result<(), ArenaError> {
        let fresh = self.make_private(Allocation(alloc.0), new_size, preserve)?;
        alloc.0 = fresh.0;
        Ok(())
    }

    /// Merges every run of adjacent free blocks. Returns the number of
    /// merges performed.
    pub fn coalesce(&mut self) -> usize {
        let mut merges = 0usize;
        let mut cur = self.first;
        while cur != NIL {
            let next = self.blocks[cur as usize].next_phys;
            if self.blocks[cur as usize].state == BlockState::Free
                && next != NIL
                && self.blocks[next as usize].state == BlockState::Free
            {
                self.unlink_free(cur);
                let mut follower = next;
                while follower != NIL
                    && self.blocks[follower as usize].state == BlockState::Free
                {
                    self.unlink_free(follower);
                    let after = self.blocks[follower as usize].next_phys;
                    self.absorb_next(cur);
                    merges += 1;
                    follower = after;
                }
                self.insert_free(cur);
            }
            cur = self.blocks[cur as usize].next_phys;
        }
        if merges > 0 {
            log::debug!("arena: coalesced {merges} free block(s)");
        }
        merges
    }

    /// Walks the block lists and checks their structural invariants.
    pub fn verify(&self) -> Result<(), &'static str> {
        let mut offset = 0usize;
        let mut prev = NIL;
        let mut cur = self.first;
        let mut used = 0usize;
        let mut free = 0usize;
        let mut free_bytes = 0usize;
        while cur != NIL {
            let block = &self.blocks[cur as usize];
            if block.offset != offset {
                return Err("blocks are not contiguous");
            }
            if block.prev_phys != prev {
                return Err("broken physical back link");
            }
            match block.state {
                BlockState::Used => used += 1,
                BlockState::Free => {
                    free += 1;
                    free_bytes += block.capacity;
                    if self.settings.coalesce == CoalescePolicy::Immediate
                        && block.next_phys != NIL
                        && self.blocks[block.next_phys as usize].state
                            == BlockState::Free
                    {
                        return Err("adjacent free blocks left unmerged");
                    }
                }
                BlockState::Retired => {
                    return Err("retired block in physical list");
                }
            }
            offset += block.capacity;
            prev = cur;
            cur = block.next_phys;
        }
        if prev != self.last {
            return Err("last block mismatch");
        }
        if offset != self.bytes.len() {
            return Err("blocks do not cover the arena");
        }
        if used != self.used_blocks || free != self.free_blocks {
            return Err("block counters out of sync");
        }
        if free_bytes != self.free_bytes {
            return Err("free byte counter out of sync");
        }

        let mut listed = 0usize;
        for (class, &head) in self.classes.iter().enumerate() {
            let mut entry = head;
            let mut prev_entry = NIL;
            while entry != NIL {
                let block = &self.blocks[entry as usize];
                if block.state != BlockState::Free
                    || class_of(block.capacity) != class
                {
                    return Err("misfiled free block");
                }
                if block.prev_free != prev_entry {
                    return Err("broken free list back link");
                }
                let mut same = entry;
                while same != NIL {
                    let member = &self.blocks[same as usize];
                    if member.capacity != block.capacity {
                        return Err("same-size chain holds mixed sizes");
                    }
                    listed += 1;
                    same = member.next_same;
                }
                prev_entry = entry;
                entry = block.next_free;
            }
        }
        if listed != self.free_blocks {
            return Err("free lists do not hold every free block");
        }
        Ok(())
    }

    // ── Block lookup ──────────────────────────────────────────────────

    fn used(&self, id: u32) -> Result<&Block, ArenaError> {
        let block = self
            .blocks
            .get(id as usize)
            .ok_or(ArenaError::InvalidAllocation(id))?;
        if block.state != BlockState::Used {
            return Err(ArenaError::FreedAllocation(id));
        }
        Ok(block)
    }

    fn used_mut(&mut self, id: u32) -> Result<&mut Block, ArenaError> {
        let block = self
            .blocks
            .get_mut(id as usize)
            .ok_or(ArenaError::InvalidAllocation(id))?;
        if block.state != BlockState::Used {
            return Err(ArenaError::FreedAllocation(id));
        }
        Ok(block)
    }

    #[inline]
    fn block_capacity(request: usize) -> Result<usize, ArenaError> {
        let rounded = request
            .max(ALIGN)
            .checked_next_multiple_of(ALIGN)
            .filter(|&cap| cap <= MAX_BLOCK)
            .ok_or(ArenaError::TooLarge { requested: request })?;
        Ok(rounded)
    }

    #[inline]
    fn grow_reserve(&self, size: usize) -> usize {
        size.saturating_add(size.min(self.settings.grow_cap))
    }

    fn new_header(&mut self, block: Block) -> u32 {
        if let Some(id) = self.retired.pop() {
            self.blocks[id as usize] = block;
            return id;
        }
        let id = self.blocks.len() as u32;
        self.blocks.push(block);
        id
    }

    // ── Claiming and growth ───────────────────────────────────────────

    fn claim(&mut self, id: u32, capacity: usize, size: usize) {
        self.split(id, capacity);
        let block = &mut self.blocks[id as usize];
        block.state = BlockState::Used;
        block.refcount = 1;
        block.size = size;
        let range = block.offset..block.offset + size;
        self.bytes[range].fill(0);
        self.used_blocks += 1;
        log::trace!("arena: claimed block {id} ({capacity} bytes)");
    }

    /// Cuts `id` down to `keep` bytes and files the remainder as a new free
    /// block. `id` must not be in a free list.
    fn split(&mut self, id: u32, keep: usize) -> Option<u32> {
        let block = &self.blocks[id as usize];
        let rest = block.capacity - keep;
        if rest < self.settings.min_split {
            return None;
        }
        let mut tail = Block::new(block.offset + keep, rest);
        tail.prev_phys = id;
        tail.next_phys = block.next_phys;
        let tail_id = self.new_header(tail);
        let next = self.blocks[id as usize].next_phys;
        if next != NIL {
            self.blocks[next as usize].prev_phys = tail_id;
        } else {
            self.last = tail_id;
        }
        let block = &mut self.blocks[id as usize];
        block.next_phys = tail_id;
        block.capacity = keep;
        self.insert_free(tail_id);
        log::trace!("arena: split block {id}, {rest} bytes returned as {tail_id}");
        Some(tail_id)
    }

    /// Shrinks a used block and gives the tail back, merging it with a free
    /// successor under the immediate policy.
    fn trim(&mut self, id: u32, keep: usize) {
        let Some(tail) = self.split(id, keep) else {
            return;
        };
        if self.settings.coalesce == CoalescePolicy::Immediate {
            let next = self.blocks[tail as usize].next_phys;
            if next != NIL && self.blocks[next as usize].state == BlockState::Free
            {
                self.unlink_free(tail);
                self.unlink_free(next);
                self.absorb_next(tail);
                self.insert_free(tail);
            }
        }
    }

    /// Grows a used block to `wanted` bytes without moving it, either by
    /// absorbing a free successor or by extending the arena when the block
    /// is last.
    fn extend_in_place(&mut self, id: u32, wanted: usize) -> bool {
        let block = &self.blocks[id as usize];
        let capacity = block.capacity;
        let next = block.next_phys;
        if next == NIL {
            self.bytes.resize(self.bytes.len() + (wanted - capacity), 0);
            self.blocks[id as usize].capacity = wanted;
            log::debug!(
                "arena: extended tail block {id} to {wanted} bytes, arena is {} bytes",
                self.bytes.len()
            );
            return true;
        }
        let neighbour = &self.blocks[next as usize];
        if neighbour.state != BlockState::Free
            || capacity + neighbour.capacity < wanted
        {
            return false;
        }
        self.unlink_free(next);
        self.absorb_next(id);
        self.split(id, wanted);
        true
    }

    fn resize_in_place(
        &mut self,
        id: u32,
        old_size: usize,
        new_size: usize,
        preserve: bool,
    ) {
        let block = &mut self.blocks[id as usize];
        block.size = new_size;
        let offset = block.offset;
        let keep = if preserve { old_size.min(new_size) } else { 0 };
        self.bytes[offset + keep..offset + new_size].fill(0);
    }

    /// Appends room for a block of `capacity` bytes and returns its header,
    /// which is not linked into any free list.
    fn grow(&mut self, capacity: usize) -> u32 {
        let last = self.last;
        if last != NIL && self.blocks[last as usize].state == BlockState::Free {
            self.unlink_free(last);
            let extra = capacity - self.blocks[last as usize].capacity;
            self.bytes.resize(self.bytes.len() + extra, 0);
            self.blocks[last as usize].capacity = capacity;
            log::debug!(
                "arena: grew free tail by {extra} bytes to {} bytes",
                self.bytes.len()
            );
            return last;
        }

        let offset = self.bytes.len();
        self.bytes.resize(offset + capacity, 0);
        let mut block = Block::new(offset, capacity);
        block.prev_phys = last;
        let id = self.new_header(block);
        if last != NIL {
            self.blocks[last as usize].next_phys = id;
        } else {
            self.first = id;
        }
        self.last = id;
        log::debug!(
            "arena: grew by {capacity} bytes to {} bytes",
            self.bytes.len()
        );
        id
    }

    // ── Freeing and merging ───────────────────────────────────────────

    fn destroy_block(&mut self, id: u32) {
        self.used_blocks -= 1;
        let block = &mut self.blocks[id as usize];
        block.state = BlockState::Free;
        block.size = 0;
        let mut id = id;

        if self.settings.coalesce == CoalescePolicy::Immediate {
            let prev = self.blocks[id as usize].prev_phys;
            if prev != NIL && self.blocks[prev as usize].state == BlockState::Free
            {
                self.unlink_free(prev);
                self.absorb_next(prev);
                id = prev;
            }
            let next = self.blocks[id as usize].next_phys;
            if next != NIL && self.blocks[next as usize].state == BlockState::Free
            {
                self.unlink_free(next);
                self.absorb_next(id);
            }
        }

        self.insert_free(id);
        log::trace!(
            "arena: freed block {id} ({} bytes)",
            self.blocks[id as usize].capacity
        );
    }

    /// Folds the physical successor of `id` into `id` and retires its
    /// header. Neither block may be in a free list.
    fn absorb_next(&mut self, id: u32) {
        let gone = self.blocks[id as usize].next_phys;
        debug_assert_ne!(gone, NIL, "absorbing past the last block");
        let (gone_capacity, after) = {
            let block = &self.blocks[gone as usize];
            (block.capacity, block.next_phys)
        };
        let block = &mut self.blocks[id as usize];
        block.capacity += gone_capacity;
        block.next_phys = after;
        if after != NIL {
            self.blocks[after as usize].prev_phys = id;
        } else {
            self.last = id;
        }
        let retired = &mut self.blocks[gone as usize];
        retired.state = BlockState::Retired;
        retired.capacity = 0;
        retired.prev_phys = NIL;
        retired.next_phys = NIL;
        self.retired.push(gone);
    }

    // ── Free lists ────────────────────────────────────────────────────

    fn insert_free(&mut self, id: u32) {
        let capacity = self.blocks[id as usize].capacity;
        let class = class_of(capacity);

        let mut entry = self.classes[class];
        while entry != NIL && self.blocks[entry as usize].capacity != capacity {
            entry = self.blocks[entry as usize].next_free;
        }

        if entry != NIL {
            let after = self.blocks[entry as usize].next_same;
            let block = &mut self.blocks[id as usize];
            block.prev_free = NIL;
            block.next_free = NIL;
            block.prev_same = entry;
            block.next_same = after;
            if after != NIL {
                self.blocks[after as usize].prev_same = id;
            }
            self.blocks[entry as usize].next_same = id;
        } else {
            let head = self.classes[class];
            let block = &mut self.blocks[id as usize];
            block.prev_free = NIL;
            block.next_free = head;
            block.prev_same = NIL;
            block.next_same = NIL;
            if head != NIL {
                self.blocks[head as usize].prev_free = id;
            }
            self.classes[class] = id;
        }

        let block = &mut self.blocks[id as usize];
        block.state = BlockState::Free;
        block.refcount = 0;
        self.free_blocks += 1;
        self.free_bytes += capacity;
    }

    fn unlink_free(&mut self, id: u32) {
        let Block {
            capacity,
            prev_free,
            next_free,
            prev_same,
            next_same,
            ..
        } = self.blocks[id as usize];
        let class = class_of(capacity);

        if prev_same != NIL {
            // chain member: the class list never points at it
            self.blocks[prev_same as usize].next_same = next_same;
            if next_same != NIL {
                self.blocks[next_same as usize].prev_same = prev_same;
            }
        } else {
            // class list entry: promote the next same-size block if any
            let successor = if next_same != NIL {
                let promoted = &mut self.blocks[next_same as usize];
                promoted.prev_same = NIL;
                promoted.prev_free = prev_free;
                promoted.next_free = next_free;
                next_same
            } else {
                next_free
            };
            if prev_free != NIL {
                self.blocks[prev_free as usize].next_free = successor;
            } else {
                self.classes[class] = successor;
            }
            if next_free != NIL {
                self.blocks[next_free as usize].prev_free = if next_same != NIL {
                    next_same
                } else {
                    prev_free
                };
            }
        }

        let block = &mut self.blocks[id as usize];
        block.prev_free = NIL;
        block.next_free = NIL;
        block.prev_same = NIL;
        block.next_same = NIL;
        self.free_blocks -= 1;
        self.free_bytes -= capacity;
    }

    /// Pops some free block of at least `capacity` bytes.
    fn take_free(&mut self, capacity: usize) -> Option<u32> {
        for class in class_of(capacity)..CLASS_COUNT {
            let mut entry = self.classes[class];
            while entry != NIL {
                let block = &self.blocks[entry as usize];
                if block.capacity >= capacity {
                    let victim = if block.next_same != NIL {
                        block.next_same
                    } else {
                        entry
                    };
                    self.unlink_free(victim);
                    return Some(victim);
                }
                entry = block.next_free;
            }
        }
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> Arena {
        Arena::new(ArenaSettings::default())
    }

    fn deferred() -> Arena {
        Arena::new(ArenaSettings {
            coalesce: CoalescePolicy::Deferred,
            ..ArenaSettings::default()
        })
    }

    #[test]
    fn test_allocate_reports_requested_size() {
        let mut arena = arena();
        for n in [0usize, 1, 7, 8, 9, 40, 255, 256, 1000, 4097] {
            let a = arena.allocate(n, n).unwrap();
            assert_eq!(arena.get_buffer_size(&a).unwrap(), n, "size {n}");
            assert!(arena.block_capacity_of(&a).unwrap() >= n);
            assert!(arena.read(&a).unwrap().iter().all(|&b| b == 0));
            arena.release_reference(a).unwrap();
        }
        arena.verify().unwrap();
    }

    #[test]
    fn test_refcount_tracks_duplicates() {
        let mut arena = arena();
        let a = arena.allocate(16, 16).unwrap();
        assert!(!arena.is_shared(&a).unwrap());

        let b = arena.duplicate_reference(&a).unwrap();
        assert!(arena.is_shared(&a).unwrap());
        assert_eq!(arena.refcount(&a).unwrap(), 2);

        arena.release_reference(b).unwrap();
        assert!(!arena.is_shared(&a).unwrap());
        arena.release_reference(a).unwrap();
        assert_eq!(arena.stats().blocks, 0);
    }

    #[test]
    fn test_released_block_is_reused_without_growth() {
        let mut arena = arena();
        let a = arena.allocate(64, 64).unwrap();
        let _pin = arena.allocate(8, 8).unwrap();
        let before = arena.capacity();

        arena.release_reference(a).unwrap();
        let b = arena.allocate(48, 48).unwrap();
        assert_eq!(arena.capacity(), before, "same-or-smaller request must reuse");

        let c = arena.allocate(128, 128).unwrap();
        assert!(arena.capacity() > before, "larger request must grow");
        arena.release_reference(b).unwrap();
        arena.release_reference(c).unwrap();
        arena.verify().unwrap();
    }

    #[test]
    fn test_shrink_then_reuse_remainder() {
        let mut arena = arena();
        let a = arena.allocate(40, 40).unwrap();
        let a = arena.make_private(a, 10, true).unwrap();
        assert_eq!(arena.get_buffer_size(&a).unwrap(), 10);
        let before = arena.capacity();

        let b = arena.allocate(10, 10).unwrap();
        assert_eq!(arena.capacity(), before, "freed tail must be reused");
        assert_ne!(a.id(), b.id());
        arena.verify().unwrap();
    }

    #[test]
    fn test_make_private_copies_shared_block() {
        let mut arena = arena();
        let a = arena.allocate(4, 4).unwrap();
        arena.write(&a).unwrap().copy_from_slice(b"abcd");
        let shared = arena.duplicate_reference(&a).unwrap();

        let private = arena.make_private(shared, 6, true).unwrap();
        assert_ne!(private.id(), a.id());
        assert_eq!(arena.read(&private).unwrap(), b"abcd\0\0");
        assert_eq!(arena.refcount(&a).unwrap(), 1);
        assert_eq!(arena.refcount(&private).unwrap(), 1);

        arena.write(&private).unwrap()[0] = b'z';
        assert_eq!(arena.read(&a).unwrap(), b"abcd", "original untouched");
    }

    #[test]
    fn test_make_private_without_preserve_zeroes() {
        let mut arena = arena();
        let a = arena.allocate(8, 8).unwrap();
        arena.write(&a).unwrap().fill(0xAA);
        let a = arena.make_private(a, 8, false).unwrap();
        assert!(arena.read(&a).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_grow_by_one_amortizes() {
        let mut arena = arena();
        let mut a = arena.allocate(0, 0).unwrap();
        let mut moves = 0;
        for n in 1..=2048usize {
            let before = a.id();
            a = arena.make_private(a, n, true).unwrap();
            arena.write(&a).unwrap()[n - 1] = (n % 251) as u8;
            if a.id() != before {
                moves += 1;
            }
        }
        assert!(moves < 16, "too many relocations: {moves}");
        let bytes = arena.read(&a).unwrap();
        assert!(bytes.iter().enumerate().all(|(i, &b)| b == ((i + 1) % 251) as u8));
        arena.verify().unwrap();
    }

    #[test]
    fn test_growth_absorbs_free_neighbour() {
        let mut arena = arena();
        let a = arena.allocate(16, 16).unwrap();
        let b = arena.allocate(256, 256).unwrap();
        let _c = arena.allocate(16, 16).unwrap();
        arena.release_reference(b).unwrap();
        let before = arena.capacity();

        let a2 = arena.make_private(a, 64, true).unwrap();
        assert_eq!(a2.id(), 0, "block must stay in place");
        assert_eq!(arena.capacity(), before);
        arena.verify().unwrap();
    }

    #[test]
    fn test_immediate_policy_merges_neighbours() {
        let mut arena = arena();
        let a = arena.allocate(32, 32).unwrap();
        let b = arena.allocate(32, 32).unwrap();
        let c = arena.allocate(32, 32).unwrap();
        let _d = arena.allocate(32, 32).unwrap();

        arena.release_reference(a).unwrap();
        arena.release_reference(c).unwrap();
        assert_eq!(arena.stats().free_blocks, 2);
        arena.release_reference(b).unwrap();
        assert_eq!(arena.stats().free_blocks, 1, "a, b and c must merge");
        assert_eq!(arena.stats().free_bytes, 96);
        arena.verify().unwrap();
    }

    #[test]
    fn test_deferred_policy_merges_before_growing() {
        let mut arena = deferred();
        let blocks: Vec<_> =
            (0..4).map(|_| arena.allocate(32, 32).unwrap()).collect();
        let _tail = arena.allocate(8, 8).unwrap();
        for block in blocks {
            arena.release_reference(block).unwrap();
        }
        assert_eq!(arena.stats().free_blocks, 4);
        let before = arena.capacity();

        let big = arena.allocate(100, 100).unwrap();
        assert_eq!(arena.capacity(), before, "coalescing must avoid growth");
        assert_eq!(arena.get_buffer_size(&big).unwrap(), 100);
        arena.verify().unwrap();
    }

    #[test]
    fn test_same_size_blocks_share_one_class_entry() {
        let mut arena = arena();
        let mut keep = Vec::new();
        let mut free = Vec::new();
        for _ in 0..5 {
            free.push(arena.allocate(48, 48).unwrap());
            keep.push(arena.allocate(8, 8).unwrap());
        }
        for block in free {
            arena.release_reference(block).unwrap();
        }
        arena.verify().unwrap();
        let head = arena.classes[class_of(48)];
        assert_ne!(head, NIL);
        assert_eq!(arena.blocks[head as usize].next_free, NIL, "one distinct size");

        for _ in 0..5 {
            keep.push(arena.allocate(48, 48).unwrap());
            arena.verify().unwrap();
        }
        assert_eq!(arena.stats().free_blocks, 0);
    }

    #[test]
    fn test_stale_allocation_is_rejected() {
        let mut arena = arena();
        let a = arena.allocate(8, 8).unwrap();
        let stale = Allocation(a.id());
        arena.release_reference(a).unwrap();
        assert_eq!(
            arena.read(&stale).unwrap_err(),
            ArenaError::FreedAllocation(stale.id())
        );
        assert_eq!(
            arena.read(&Allocation(999)).unwrap_err(),
            ArenaError::InvalidAllocation(999)
        );
    }

    #[test]
    fn test_settings_validation() {
        assert!(ArenaSettings::default().validate().is_ok());
        let bad = ArenaSettings {
            min_split: 12,
            ..ArenaSettings::default()
        };
        assert!(bad.validate().is_err());
        let bad = ArenaSettings {
            shrink_divisor: 1,
            ..ArenaSettings::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_reshape_updates_handle() {
        let mut arena = arena();
        let mut a = arena.allocate(4, 4).unwrap();
        arena.write(&a).unwrap().copy_from_slice(b"wxyz");
        let other = arena.duplicate_reference(&a).unwrap();

        arena.reshape(&mut a, 2, true).unwrap();
        assert_ne!(a.id(), other.id(), "shared block must be copied");
        assert_eq!(arena.read(&a).unwrap(), b"wx");
        assert_eq!(arena.read(&other).unwrap(), b"wxyz");

        let before = a.id();
        assert!(arena.reshape(&mut a, usize::MAX, true).is_err());
        assert_eq!(a.id(), before, "failed reshape keeps the handle");
        assert_eq!(arena.read(&a).unwrap(), b"wx");
    }

    #[test]
    fn test_huge_shrink_divisor_does_not_overflow() {
        let mut arena = Arena::new(ArenaSettings {
            shrink_divisor: usize::MAX,
            ..ArenaSettings::default()
        });
        let a = arena.allocate(64, 64).unwrap();
        let capacity = arena.block_capacity_of(&a).unwrap();

        let a = arena.make_private(a, 10, true).unwrap();
        assert_eq!(arena.get_buffer_size(&a).unwrap(), 10);
        assert_eq!(arena.block_capacity_of(&a).unwrap(), capacity, "kept in place");

        let a = arena.make_private(a, 0, false).unwrap();
        assert!(arena.block_capacity_of(&a).unwrap() < capacity, "empty block is trimmed");
        arena.release_reference(a).unwrap();
        arena.verify().unwrap();
    }

    #[test]
    fn test_churn_keeps_lists_consistent() {
        let mut arena = arena();
        let mut live: Vec<Allocation> = Vec::new();
        let mut seed = 7u64;
        for _ in 0..2000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let roll = (seed >> 33) as usize;
            if roll % 3 == 0 && !live.is_empty() {
                let victim = live.swap_remove(roll % live.len());
                arena.release_reference(victim).unwrap();
            } else if roll % 3 == 1 && !live.is_empty() {
                let idx = roll % live.len();
                let block = live.swap_remove(idx);
                let size = (roll >> 4) % 600;
                live.push(arena.make_private(block, size, true).unwrap());
            } else {
                let size = (roll >> 8) % 700;
                live.push(arena.allocate(size, size).unwrap());
            }
        }
        arena.verify().unwrap();
        for block in live {
            arena.release_reference(block).unwrap();
        }
        arena.verify().unwrap();
        assert_eq!(arena.stats().blocks, 0);
        assert_eq!(arena.stats().free_blocks, 1);
    }
}
