//! The variable store: slot lifecycle, copy and move, frames and roots.
//!
//! Every change to what a slot holds goes through one of two paths:
//! [`Store::recycle`] when the new value needs a fresh backing, or
//! `replace` when the new contents already exist. Both tear the old
//! contents down through [`Teardown`], which walks owned element slots with
//! an explicit worklist and defers native destructors until the walk is
//! complete.

use std::collections::HashMap;

use arena::{Allocation, Arena, ArenaStats};

use crate::{
    ColumnNames, FunctionId, Result, StoreError, StoreSettings, ValueKind,
    blob::BlobTable,
    collector::CollectorPhase,
    context::{ContextEntry, ContextRegistry},
    handle::{Location, VarId},
    object::{ObjectBacking, ObjectTable, next_privilege_key},
    value::{
        ARRAY_STRIDE, CELL_STRIDE, Money, RECORD_STRIDE, Slot, read_word,
        write_word,
    },
    vars::Vars,
};

/// Handle-addressed storage for every variable a script can reach.
pub struct Store {
    pub(crate) settings: StoreSettings,
    pub(crate) arena: Arena,
    pub(crate) vars: Vars,
    pub(crate) objects: ObjectTable,
    pub(crate) blobs: BlobTable,
    pub(crate) names: ColumnNames,
    pub(crate) contexts: ContextRegistry,
    pub(crate) pins: HashMap<VarId, u32, ahash::RandomState>,
    pub(crate) phase: CollectorPhase,
    /// `Vars::object_writes` when the last collection finished.
    pub(crate) traced_writes: Option<u64>,
    /// Key a [`Privilege`](crate::Privilege) must carry to be honoured here.
    pub(crate) privilege_key: u64,
}

/// Base pointer saved by [`Store::enter_frame`].
#[must_use = "a frame must be left with the base it saved"]
#[derive(Debug, PartialEq, Eq)]
pub struct SavedBase {
    base: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub heap_slots: usize,
    pub heap_capacity: usize,
    pub stack_depth: usize,
    pub globals: usize,
    pub objects_alive: usize,
    pub objects_dead: usize,
    pub pinned: usize,
    pub arena: ArenaStats,
}

/// Pending work of one teardown: heap slots whose contents still have to be
/// released, and context entries whose destructors run at the end.
#[derive(Default)]
pub(crate) struct Teardown {
    pub(crate) heap: Vec<usize>,
    pub(crate) destructors: Vec<ContextEntry>,
}

/// Decodes an element handle stored in a backing.
pub(crate) fn heap_index(raw: u32) -> Result<usize> {
    match VarId::from_raw(raw).map(VarId::location) {
        Some(Location::Heap(index)) => Ok(index),
        _ => Err(StoreError::Internal("backing holds a non-heap handle")),
    }
}

pub(crate) fn wrong_type(expected: ValueKind, actual: &Slot) -> StoreError {
    StoreError::WrongType {
        expected,
        actual: actual.kind(),
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreSettings::default())
    }
}

impl Store {
    #[must_use]
    pub fn new(settings: StoreSettings) -> Self {
        Self::try_new(settings).expect("Invalid Store Settings")
    }

    pub fn try_new(settings: StoreSettings) -> std::result::Result<Self, &'static str> {
        Self::try_with_names(settings, ColumnNames::new())
    }

    /// A store sharing an existing name table.
    #[must_use]
    pub fn with_names(settings: StoreSettings, names: ColumnNames) -> Self {
        Self::try_with_names(settings, names).expect("Invalid Store Settings")
    }

    pub fn try_with_names(
        settings: StoreSettings,
        names: ColumnNames,
    ) -> std::result::Result<Self, &'static str> {
        settings.validate()?;
        Ok(Self {
            arena: Arena::new(settings.arena.clone()),
            vars: Vars::new(
                settings.initial_stack,
                settings.max_stack,
                settings.heap_chunk,
            ),
            objects: ObjectTable::default(),
            blobs: BlobTable::default(),
            names,
            contexts: ContextRegistry::new(),
            pins: HashMap::default(),
            phase: CollectorPhase::Idle,
            traced_writes: None,
            privilege_key: next_privilege_key(),
            settings,
        })
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn names(&self) -> &ColumnNames {
        &self.names
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn kind(&self, h: VarId) -> Result<ValueKind> {
        Ok(self.vars.get(h)?.kind())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            heap_slots: self.vars.heap_used(),
            heap_capacity: self.vars.heap_capacity(),
            stack_depth: self.vars.stack.len(),
            globals: self.vars.global_count(),
            objects_alive: self.objects.alive(),
            objects_dead: self.objects.dead(),
            pinned: self.pins.len(),
            arena: self.arena.stats(),
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────

    /// Releases everything `slot` owns, queueing owned element slots.
    pub(crate) fn release(&mut self, slot: Slot, work: &mut Teardown) -> Result<()> {
        match slot {
            Slot::Uninit
            | Slot::Boolean(_)
            | Slot::Integer(_)
            | Slot::Money(_)
            | Slot::Float(_)
            | Slot::DateTime(_)
            | Slot::Table(_)
            | Slot::Schema(_)
            | Slot::Record { cells: None, .. }
            | Slot::Object(None)
            | Slot::WeakObject(None) => {}
            Slot::Str(alloc) => self.arena.release_reference(alloc)?,
            Slot::Binary(blob) => self.blobs.release(blob)?,
            Slot::Array { backing, .. } => {
                self.release_backing(backing, ARRAY_STRIDE, 0, work)?;
            }
            Slot::Record {
                cells: Some(cells), ..
            } => self.release_backing(cells, RECORD_STRIDE, 4, work)?,
            Slot::Object(Some(id)) => {
                if let Some(backing) = self.objects.release_strong(id)? {
                    log::trace!("store: object {} lost its last strong reference", id.0);
                    self.destroy_object(backing, work)?;
                }
            }
            Slot::WeakObject(Some(id)) => self.objects.release_weak(id)?,
        }
        Ok(())
    }

    /// Like [`Store::release`], but hands back the block of an unshared
    /// string, array or record so it can be reused.
    fn release_reusing(
        &mut self,
        slot: Slot,
        work: &mut Teardown,
    ) -> Result<Option<Allocation>> {
        let reusable = match &slot {
            Slot::Str(alloc)
            | Slot::Array { backing: alloc, .. }
            | Slot::Record {
                cells: Some(alloc), ..
            } => !self.arena.is_shared(alloc)?,
            _ => false,
        };
        if !reusable {
            self.release(slot, work)?;
            return Ok(None);
        }
        match slot {
            Slot::Str(alloc) => Ok(Some(alloc)),
            Slot::Array { backing, .. } => {
                self.queue_elements(&backing, ARRAY_STRIDE, 0, work)?;
                Ok(Some(backing))
            }
            Slot::Record {
                cells: Some(cells), ..
            } => {
                self.queue_elements(&cells, RECORD_STRIDE, 4, work)?;
                Ok(Some(cells))
            }
            _ => Err(StoreError::Internal("reusable slot has no backing")),
        }
    }

    fn queue_elements(
        &self,
        alloc: &Allocation,
        stride: usize,
        var_at: usize,
        work: &mut Teardown,
    ) -> Result<()> {
        let bytes = self.arena.read(alloc)?;
        for entry in bytes.chunks_exact(stride) {
            work.heap.push(heap_index(read_word(entry, var_at))?);
        }
        Ok(())
    }

    /// Drops one reference to a handle table; the last reference takes the
    /// elements down with it.
    fn release_backing(
        &mut self,
        alloc: Allocation,
        stride: usize,
        var_at: usize,
        work: &mut Teardown,
    ) -> Result<()> {
        if !self.arena.is_shared(&alloc)? {
            self.queue_elements(&alloc, stride, var_at, work)?;
        }
        self.arena.release_reference(alloc)?;
        Ok(())
    }

    pub(crate) fn destroy_object(
        &mut self,
        backing: ObjectBacking,
        work: &mut Teardown,
    ) -> Result<()> {
        self.queue_elements(&backing.cells, CELL_STRIDE, 4, work)?;
        self.arena.release_reference(backing.cells)?;
        work.destructors.extend(backing.contexts);
        Ok(())
    }

    /// Drains the worklist, then runs the queued destructors. Returns how
    /// many destructors ran.
    pub(crate) fn finish(&mut self, mut work: Teardown) -> Result<usize> {
        while let Some(index) = work.heap.pop() {
            self.pins.remove(&VarId::heap(index));
            let slot = self.vars.heap_free(index)?;
            self.release(slot, &mut work)?;
        }
        self.run_destructors(work.destructors)
    }

    pub(crate) fn run_destructors(&mut self, entries: Vec<ContextEntry>) -> Result<usize> {
        let mut ran = 0;
        for entry in entries {
            if !entry.has_destructor() {
                continue;
            }
            let kind = entry.kind;
            entry.run().map_err(|fault| {
                log::warn!(
                    "store: destructor of context kind {} failed: {fault}",
                    kind.index()
                );
                StoreError::Destructor(fault)
            })?;
            ran += 1;
        }
        Ok(ran)
    }

    pub(crate) fn dispose(&mut self, slot: Slot) -> Result<()> {
        let mut work = Teardown::default();
        self.release(slot, &mut work)?;
        self.finish(work)?;
        Ok(())
    }

    /// Stores `slot` in `h`, tearing down the previous contents. If `h` is
    /// not a live variable `slot` is torn down instead.
    pub(crate) fn replace(&mut self, h: VarId, slot: Slot) -> Result<()> {
        if let Err(err) = self.vars.get(h) {
            self.dispose(slot)?;
            return Err(err);
        }
        let old = self.vars.put(h, slot)?;
        self.dispose(old)
    }

    // ── Slot lifecycle ────────────────────────────────────────────────

    /// Tears down `h` and leaves it holding `kind`. Backed kinds get a zeroed
    /// block of `backing_size` bytes, reusing the old block when it was not
    /// shared; arrays start out as variant arrays. Other kinds get their
    /// default value.
    pub(crate) fn recycle(
        &mut self,
        h: VarId,
        kind: ValueKind,
        backing_size: usize,
    ) -> Result<()> {
        let old = self.vars.take(h)?;
        let mut work = Teardown::default();
        let reuse = self.release_reusing(old, &mut work)?;
        let backing = match self.recycled_backing(kind, backing_size, reuse) {
            Ok(backing) => backing,
            Err(err) => {
                // the slot stays uninitialised; its old contents still go
                self.finish(work)?;
                return Err(err);
            }
        };

        let slot = match (kind, backing) {
            (ValueKind::String, Some(alloc)) => Slot::Str(alloc),
            (ValueKind::Array, Some(backing)) => Slot::Array {
                elem: ValueKind::Variant,
                backing,
            },
            (ValueKind::Record, Some(cells)) => Slot::Record {
                func: None,
                cells: Some(cells),
            },
            (ValueKind::FunctionRecord, Some(cells)) => Slot::Record {
                func: Some(FunctionId::default()),
                cells: Some(cells),
            },
            (ValueKind::Binary, _) => Slot::Binary(self.blobs.insert(&[])),
            (kind, _) => Self::inline_default(kind),
        };
        if kind.is_backed() {
            log::trace!("store: recycled {h:?} as {kind} ({backing_size} bytes)");
        }
        self.vars.put(h, slot)?;
        self.finish(work)?;
        Ok(())
    }

    /// Backing for a slot recycled as `kind`, built from the old block when
    /// it was not shared. On error nothing is left referenced.
    fn recycled_backing(
        &mut self,
        kind: ValueKind,
        backing_size: usize,
        reuse: Option<Allocation>,
    ) -> Result<Option<Allocation>> {
        if !kind.is_backed() {
            if let Some(alloc) = reuse {
                self.arena.release_reference(alloc)?;
            }
            return Ok(None);
        }
        match reuse {
            Some(mut alloc) => match self.arena.reshape(&mut alloc, backing_size, false) {
                Ok(()) => Ok(Some(alloc)),
                Err(err) => {
                    self.arena.release_reference(alloc)?;
                    Err(err.into())
                }
            },
            None => Ok(Some(self.arena.allocate(backing_size, backing_size)?)),
        }
    }

    fn inline_default(kind: ValueKind) -> Slot {
        match kind {
            ValueKind::Boolean => Slot::Boolean(false),
            ValueKind::Integer => Slot::Integer(0),
            ValueKind::Money => Slot::Money(Money::default()),
            ValueKind::Float => Slot::Float(0.0),
            ValueKind::DateTime => Slot::DateTime(0),
            ValueKind::Table => Slot::Table(0),
            ValueKind::Schema => Slot::Schema(0),
            ValueKind::Object => Slot::Object(None),
            ValueKind::WeakObject => Slot::WeakObject(None),
            ValueKind::Record => Slot::Record {
                func: None,
                cells: None,
            },
            _ => Slot::Uninit,
        }
    }

    /// Sets `h` to the default value of `kind`: zero, false, the empty
    /// string, an empty variant array, the null record or the default
    /// object.
    pub fn reset(&mut self, h: VarId, kind: ValueKind) -> Result<()> {
        match kind {
            ValueKind::Record => self.replace(h, Self::inline_default(kind)),
            _ => self.recycle(h, kind, 0),
        }
    }

    /// New heap slot holding the default value of `kind`.
    pub(crate) fn new_var(&mut self, kind: ValueKind) -> Result<VarId> {
        let h = self.vars.heap_alloc(Slot::Uninit)?;
        self.reset(h, kind)?;
        Ok(h)
    }

    /// Second reference to the contents of `src`.
    pub(crate) fn duplicate(&mut self, src: VarId) -> Result<Slot> {
        let slot = self.vars.get(src)?;
        Ok(match slot {
            Slot::Uninit => Slot::Uninit,
            Slot::Boolean(v) => Slot::Boolean(*v),
            Slot::Integer(v) => Slot::Integer(*v),
            Slot::Money(v) => Slot::Money(*v),
            Slot::Float(v) => Slot::Float(*v),
            Slot::DateTime(v) => Slot::DateTime(*v),
            Slot::Table(v) => Slot::Table(*v),
            Slot::Schema(v) => Slot::Schema(*v),
            Slot::Str(alloc) => Slot::Str(self.arena.duplicate_reference(alloc)?),
            Slot::Binary(blob) => Slot::Binary(self.blobs.retain(*blob)?),
            Slot::Array { elem, backing } => Slot::Array {
                elem: *elem,
                backing: self.arena.duplicate_reference(backing)?,
            },
            Slot::Record { func, cells } => Slot::Record {
                func: *func,
                cells: match cells {
                    Some(cells) => Some(self.arena.duplicate_reference(cells)?),
                    None => None,
                },
            },
            Slot::Object(id) => {
                if let Some(id) = id {
                    self.objects.retain_strong(*id)?;
                }
                Slot::Object(*id)
            }
            Slot::WeakObject(id) => {
                if let Some(id) = id {
                    self.objects.retain_weak(*id)?;
                }
                Slot::WeakObject(*id)
            }
        })
    }

    /// Makes `dest` hold the same value as `src`. Backed values and objects
    /// are shared by reference; copy-on-write separates them later.
    pub fn copy(&mut self, dest: VarId, src: VarId) -> Result<()> {
        if dest == src {
            return Ok(());
        }
        self.vars.get(dest)?;
        let value = self.duplicate(src)?;
        self.replace(dest, value)
    }

    /// Moves the contents of `src` into `dest` without touching reference
    /// counts. `src` is left uninitialised.
    pub fn move_value(&mut self, dest: VarId, src: VarId) -> Result<()> {
        if dest == src {
            return Ok(());
        }
        self.vars.get(dest)?;
        let value = self.vars.take(src)?;
        self.replace(dest, value)
    }

    // ── Stack ─────────────────────────────────────────────────────────

    /// Pushes `n` uninitialised slots; returns the handle of the first.
    pub fn push(&mut self, n: usize) -> Result<VarId> {
        self.vars.push(n)
    }

    /// Destroys the top `n` slots of the current frame.
    pub fn pop(&mut self, n: usize) -> Result<()> {
        let popped = self.vars.pop(n)?;
        let mut work = Teardown::default();
        for slot in popped {
            self.release(slot, &mut work)?;
        }
        self.finish(work)?;
        Ok(())
    }

    pub fn stack_depth(&self) -> usize {
        self.vars.stack.len()
    }

    /// Slots in the current frame.
    pub fn frame_len(&self) -> usize {
        self.vars.frame_len()
    }

    /// Starts a frame of `locals` slots at the current top of the stack.
    /// Slots the caller pushed before are reachable through negative
    /// offsets.
    pub fn enter_frame(&mut self, locals: usize) -> Result<SavedBase> {
        self.vars.reserve_stack(locals)?;
        let saved = SavedBase {
            base: self.vars.base,
        };
        self.vars.base = self.vars.stack.len();
        self.vars.push(locals)?;
        Ok(saved)
    }

    /// Ends the current frame. The first `keep` slots of the frame survive
    /// and move down over the `drop_params` slots right below it; everything
    /// else in the frame and those parameters are destroyed. Returns the
    /// handle of the first kept slot, relative to the restored base.
    pub fn leave_frame(
        &mut self,
        saved: SavedBase,
        keep: usize,
        drop_params: usize,
    ) -> Result<VarId> {
        let base = self.vars.base;
        if saved.base > base
            || keep > self.vars.frame_len()
            || drop_params > base - saved.base
        {
            return Err(StoreError::StackUnderflow);
        }

        let stack = &mut self.vars.stack;
        let locals = stack.split_off(base + keep);
        let kept = stack.split_off(base);
        let params = stack.split_off(base - drop_params);
        stack.extend(kept);
        self.vars.base = saved.base;

        let mut work = Teardown::default();
        for slot in locals.into_iter().chain(params) {
            self.release(slot, &mut work)?;
        }
        self.finish(work)?;
        Ok(VarId::local((base - drop_params - saved.base) as i32))
    }

    /// Moves the whole current frame into a fresh variant array stored in
    /// `target`, leaving the frame empty. Returns the number of slots moved.
    pub fn save_frame_to_array(&mut self, target: VarId) -> Result<usize> {
        if matches!(target.location(), Location::Stack(offset) if offset >= 0) {
            return Err(StoreError::InvalidHandle(target.raw()));
        }
        self.vars.get(target)?;

        let slots = self.vars.stack.split_off(self.vars.base);
        let count = slots.len();
        let mut handles = Vec::with_capacity(count);
        for slot in slots {
            handles.push(self.vars.heap_alloc(slot)?.raw());
        }
        let size = count * ARRAY_STRIDE;
        let backing = self.arena.allocate(size, size)?;
        let bytes = self.arena.write(&backing)?;
        for (i, raw) in handles.into_iter().enumerate() {
            write_word(bytes, i * ARRAY_STRIDE, raw);
        }
        self.replace(
            target,
            Slot::Array {
                elem: ValueKind::Variant,
                backing,
            },
        )?;
        Ok(count)
    }

    /// Pushes the elements of the array in `source` onto the stack, moving
    /// them out of the array, which is left empty. Returns the handle of the
    /// first pushed slot.
    pub fn restore_frame_from_array(&mut self, source: VarId) -> Result<VarId> {
        self.unshare_array(source)?;
        let handles = self.array_handles(source)?;
        self.vars.reserve_stack(handles.len())?;

        let first = VarId::local(self.vars.frame_len() as i32);
        for raw in handles {
            let index = heap_index(raw)?;
            self.pins.remove(&VarId::heap(index));
            let slot = self.vars.heap_free(index)?;
            self.vars.stack.push(slot);
        }

        let Slot::Array { elem, backing } = self.vars.get_mut(source)? else {
            return Err(StoreError::Internal("restored array changed type"));
        };
        *elem = ValueKind::Variant;
        self.arena.reshape(backing, 0, false)?;
        Ok(first)
    }

    // ── Heap ──────────────────────────────────────────────────────────

    pub fn new_heap_slot(&mut self) -> Result<VarId> {
        self.vars.heap_alloc(Slot::Uninit)
    }

    /// Destroys the contents of a heap slot and recycles it.
    pub fn delete_heap_slot(&mut self, h: VarId) -> Result<()> {
        let Location::Heap(index) = h.location() else {
            return Err(StoreError::NotHeapHandle(h.raw()));
        };
        self.vars.get(h)?;
        let mut work = Teardown::default();
        work.heap.push(index);
        self.finish(work)?;
        Ok(())
    }

    // ── Globals ───────────────────────────────────────────────────────

    /// Reserves `n` global slots and returns the handle of the first.
    pub fn allocate_globals(&mut self, n: usize) -> Result<VarId> {
        let start = self.vars.alloc_globals(n)?;
        Ok(VarId::global(start))
    }

    /// Destroys the global block starting at `first`.
    pub fn free_globals(&mut self, first: VarId) -> Result<()> {
        let Location::Global(start) = first.location() else {
            return Err(StoreError::InvalidHandle(first.raw()));
        };
        let slots = self.vars.free_globals(start)?;
        let mut work = Teardown::default();
        for slot in slots {
            self.release(slot, &mut work)?;
        }
        self.finish(work)?;
        Ok(())
    }

    // ── External roots ────────────────────────────────────────────────

    /// Registers a heap slot as held from outside the store. Pins nest.
    pub fn pin(&mut self, h: VarId) -> Result<()> {
        if !h.is_heap() {
            return Err(StoreError::NotHeapHandle(h.raw()));
        }
        self.vars.get(h)?;
        *self.pins.entry(h).or_insert(0) += 1;
        Ok(())
    }

    pub fn unpin(&mut self, h: VarId) -> Result<()> {
        let Some(count) = self.pins.get_mut(&h) else {
            return Err(StoreError::InvalidHandle(h.raw()));
        };
        *count -= 1;
        if *count == 0 {
            self.pins.remove(&h);
        }
        Ok(())
    }

    pub fn is_pinned(&self, h: VarId) -> bool {
        self.pins.contains_key(&h)
    }

    // ── Strings and blobs ─────────────────────────────────────────────

    pub fn set_string(&mut self, h: VarId, value: &str) -> Result<()> {
        self.recycle(h, ValueKind::String, value.len())?;
        let Slot::Str(alloc) = self.vars.get(h)? else {
            return Err(StoreError::Internal("recycled string has no backing"));
        };
        self.arena.write(alloc)?.copy_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn string(&self, h: VarId) -> Result<&str> {
        match self.vars.get(h)? {
            Slot::Str(alloc) => std::str::from_utf8(self.arena.read(alloc)?)
                .map_err(|_| StoreError::Internal("string backing is not utf-8")),
            other => Err(wrong_type(ValueKind::String, other)),
        }
    }

    /// Appends in place; capacity grows geometrically.
    pub fn string_append(&mut self, h: VarId, tail: &str) -> Result<()> {
        let slot = self.vars.get_mut(h)?;
        let Slot::Str(alloc) = slot else {
            return Err(wrong_type(ValueKind::String, slot));
        };
        let len = self.arena.get_buffer_size(alloc)?;
        self.arena.reshape(alloc, len + tail.len(), true)?;
        self.arena.write(alloc)?[len..].copy_from_slice(tail.as_bytes());
        Ok(())
    }

    pub fn set_binary(&mut self, h: VarId, data: &[u8]) -> Result<()> {
        self.vars.get(h)?;
        let blob = self.blobs.insert(data);
        self.replace(h, Slot::Binary(blob))
    }

    pub fn binary(&self, h: VarId) -> Result<&[u8]> {
        match self.vars.get(h)? {
            Slot::Binary(blob) => self.blobs.get(*blob),
            other => Err(wrong_type(ValueKind::Binary, other)),
        }
    }
}

// ── Scalars ───────────────────────────────────────────────────────────

macro_rules! scalar_accessors {
    ($($set:ident, $get:ident, $variant:ident, $ty:ty;)*) => {
        impl Store {
            $(
                pub fn $set(&mut self, h: VarId, value: $ty) -> Result<()> {
                    self.replace(h, Slot::$variant(value))
                }

                pub fn $get(&self, h: VarId) -> Result<$ty> {
                    match self.vars.get(h)? {
                        Slot::$variant(value) => Ok(*value),
                        other => Err(wrong_type(ValueKind::$variant, other)),
                    }
                }
            )*
        }
    };
}

scalar_accessors! {
    set_boolean, boolean, Boolean, bool;
    set_integer, integer, Integer, i64;
    set_money, money, Money, Money;
    set_float, float, Float, f64;
    set_datetime, datetime, DateTime, i64;
    set_table, table, Table, u32;
    set_schema, schema, Schema, u32;
}
