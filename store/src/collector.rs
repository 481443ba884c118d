//! Mark-sweep collection of object cycles.
//!
//! Reference counting destroys everything that becomes unreachable except
//! object graphs that keep themselves alive. [`Store::collect`] finds those:
//! it marks every object reachable from the roots (the stack, the global
//! blocks and pinned heap slots) and forcibly destroys the rest.
//!
//! Tracing uses explicit worklists. Object cells remember whether their
//! subtree held no objects on the previous pass. Those flags are only
//! trusted while no slot anywhere has been given contents that can reach an
//! object since that pass finished; otherwise every cell is walked and its
//! flag refreshed.

use arena::Arena;

use crate::{
    ObjectId, Result, Store, StoreError,
    object::{CellFlags, ObjectTable, decode_cells},
    store::{Teardown, heap_index},
    value::{ARRAY_STRIDE, RECORD_STRIDE, Slot, read_word},
    vars::Vars,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollectorPhase {
    #[default]
    Idle,
    Marking,
    Sweeping,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    /// Objects found reachable.
    pub marked: usize,
    /// Objects destroyed.
    pub swept: usize,
    /// Cells not walked because they were known to hold no objects.
    pub skipped_cells: usize,
    pub destructors_run: usize,
}

struct Tracer<'a> {
    vars: &'a Vars,
    arena: &'a Arena,
    objects: &'a mut ObjectTable,
    pending: Vec<ObjectId>,
    trust_flags: bool,
    flag_updates: Vec<(ObjectId, usize, CellFlags)>,
    marked: usize,
    skipped: usize,
}

impl<'a> Tracer<'a> {
    /// Walks everything `root` reaches short of object cells, marking and
    /// queueing the objects it meets. Returns whether any object reference
    /// was seen.
    fn trace(&mut self, root: &'a Slot) -> Result<bool> {
        if !root.may_hold_objects() {
            return Ok(false);
        }
        let mut found = false;
        let mut work = Vec::new();
        self.visit(root, &mut work, &mut found)?;
        while let Some(index) = work.pop() {
            let vars = self.vars;
            let slot = vars
                .heap_slot(index)
                .ok_or(StoreError::Internal("element names a free heap slot"))?;
            self.visit(slot, &mut work, &mut found)?;
        }
        Ok(found)
    }

    fn visit(&mut self, slot: &Slot, work: &mut Vec<usize>, found: &mut bool) -> Result<()> {
        let (backing, stride, var_at) = match slot {
            Slot::Array { backing, .. } => (backing, ARRAY_STRIDE, 0),
            Slot::Record {
                cells: Some(cells), ..
            } => (cells, RECORD_STRIDE, 4),
            Slot::Object(Some(id)) => {
                *found = true;
                if self.objects.mark(*id) {
                    self.marked += 1;
                    self.pending.push(*id);
                }
                return Ok(());
            }
            Slot::WeakObject(Some(_)) => {
                *found = true;
                return Ok(());
            }
            _ => return Ok(()),
        };
        for entry in self.arena.read(backing)?.chunks_exact(stride) {
            work.push(heap_index(read_word(entry, var_at))?);
        }
        Ok(())
    }

    /// Walks the cells of every queued object until no marked object is
    /// left unvisited.
    fn drain(&mut self) -> Result<()> {
        while let Some(id) = self.pending.pop() {
            let cells = decode_cells(self.arena.read(&self.objects.backing(id)?.cells)?)?;
            for cell in cells {
                if self.trust_flags && cell.flags.contains(CellFlags::NO_OBJECTS) {
                    self.skipped += 1;
                    continue;
                }
                let vars = self.vars;
                let found = self.trace(vars.get(cell.var)?)?;
                let mut flags = cell.flags;
                flags.set(CellFlags::NO_OBJECTS, !found);
                if flags != cell.flags {
                    self.flag_updates.push((id, cell.index, flags));
                }
            }
        }
        Ok(())
    }
}

impl Store {
    pub fn phase(&self) -> CollectorPhase {
        self.phase
    }

    /// Destroys every object not reachable from a root. Native destructors
    /// of the destroyed objects run once the sweep is complete; a failing
    /// destructor aborts the pass with its fault.
    pub fn collect(&mut self) -> Result<CollectionStats> {
        if self.phase != CollectorPhase::Idle {
            return Err(StoreError::Internal("collection is already running"));
        }
        let result = self.run_collection();
        self.phase = CollectorPhase::Idle;
        result
    }

    fn run_collection(&mut self) -> Result<CollectionStats> {
        let mut stats = CollectionStats::default();

        self.phase = CollectorPhase::Marking;
        self.objects.clear_marks();
        let trust_flags = self.traced_writes == Some(self.vars.object_writes());
        let mut tracer = Tracer {
            vars: &self.vars,
            arena: &self.arena,
            objects: &mut self.objects,
            pending: Vec::new(),
            trust_flags,
            flag_updates: Vec::new(),
            marked: 0,
            skipped: 0,
        };
        for slot in self.vars.stack.iter().chain(self.vars.global_slots()) {
            tracer.trace(slot)?;
            tracer.drain()?;
        }
        for &pinned in self.pins.keys() {
            tracer.trace(self.vars.get(pinned)?)?;
            tracer.drain()?;
        }
        stats.marked = tracer.marked;
        stats.skipped_cells = tracer.skipped;
        let flag_updates = tracer.flag_updates;
        for (id, index, flags) in flag_updates {
            self.set_cell_flags(id, index, flags)?;
        }
        self.traced_writes = Some(self.vars.object_writes());

        self.phase = CollectorPhase::Sweeping;
        let mut doomed = Vec::new();
        for id in self.objects.unmarked_alive() {
            if let Some(backing) = self.objects.kill(id)? {
                log::trace!("store: sweeping unreachable object {}", id.index());
                doomed.push(backing);
            }
        }
        stats.swept = doomed.len();
        let mut work = Teardown::default();
        for backing in doomed {
            self.destroy_object(backing, &mut work)?;
        }
        stats.destructors_run = self.finish(work)?;

        log::debug!(
            "store: collection marked {} swept {} skipped {} cells, {} destructors",
            stats.marked,
            stats.swept,
            stats.skipped_cells,
            stats.destructors_run
        );
        Ok(stats)
    }
}
