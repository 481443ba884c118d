//! Reference-counted objects.
//!
//! An object lives in the [`ObjectTable`] and is addressed by [`ObjectId`].
//! Its member cells sit in one arena block as `(field, var, flags)` triples;
//! unlike arrays and records that block is never shared, since objects have
//! identity and copying a handle only adds a strong reference.
//!
//! Table entries count two things: `refs`, every slot that names the entry
//! (strong or weak), and `strong`, the object-tagged ones. When `strong`
//! reaches zero the backing is torn down at once; the entry itself stays
//! until the last weak slot lets go, so weak handles can tell that their
//! target is gone.

use std::sync::atomic::{AtomicU64, Ordering};

use arena::Allocation;
use bitflags::bitflags;

use crate::{
    FieldId, ObjectId, Result, Store, StoreError, StoreSettings, ValueKind, VarId,
    context::ContextEntry,
    store::{Teardown, heap_index, wrong_type},
    value::{CELL_STRIDE, Slot, read_word, write_word},
};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct CellFlags: u32 {
        const PRIVATE = 1 << 0;
        const DELETABLE = 1 << 1;
        /// The last collection found no objects below this cell.
        const NO_OBJECTS = 1 << 2;
    }
}

/// Capability to read and write private members from outside an object.
/// Handed out once, by [`Store::new_privileged`], and only honoured by the
/// store that issued it.
#[derive(Debug)]
pub struct Privilege {
    key: u64,
}

static NEXT_PRIVILEGE_KEY: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_privilege_key() -> u64 {
    NEXT_PRIVILEGE_KEY.fetch_add(1, Ordering::Relaxed)
}

/// How a member is being accessed.
#[derive(Debug, Clone, Copy)]
pub enum Access<'a> {
    /// Ordinary access; private members are off limits.
    Outside,
    /// From one of the object's own methods.
    This,
    /// Introspection that bypasses privacy.
    Privileged(&'a Privilege),
}

impl Access<'_> {
    fn sees_private(self, key: u64) -> bool {
        match self {
            Access::Outside => false,
            Access::This => true,
            Access::Privileged(privilege) => privilege.key == key,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ObjectBacking {
    pub(crate) class: Option<FieldId>,
    pub(crate) cells: Allocation,
    pub(crate) contexts: Vec<ContextEntry>,
}

#[derive(Debug)]
pub(crate) struct ObjectEntry {
    refs: u32,
    strong: u32,
    pub(crate) marked: bool,
    pub(crate) backing: Option<ObjectBacking>,
}

#[derive(Debug, Default)]
pub(crate) struct ObjectTable {
    entries: Vec<Option<ObjectEntry>>,
    free: Vec<u32>,
    alive: usize,
    dead: usize,
}

impl ObjectTable {
    /// New live object referenced by one strong slot.
    pub(crate) fn create(&mut self, backing: ObjectBacking) -> ObjectId {
        let entry = ObjectEntry {
            refs: 1,
            strong: 1,
            marked: false,
            backing: Some(backing),
        };
        self.alive += 1;
        if let Some(index) = self.free.pop() {
            self.entries[index as usize] = Some(entry);
            return ObjectId(index);
        }
        self.entries.push(Some(entry));
        ObjectId(self.entries.len() as u32 - 1)
    }

    pub(crate) fn entry(&self, id: ObjectId) -> Result<&ObjectEntry> {
        self.entries
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(StoreError::Internal("stale object id"))
    }

    fn entry_mut(&mut self, id: ObjectId) -> Result<&mut ObjectEntry> {
        self.entries
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(StoreError::Internal("stale object id"))
    }

    pub(crate) fn is_alive(&self, id: ObjectId) -> bool {
        self.entry(id).is_ok_and(|entry| entry.backing.is_some())
    }

    pub(crate) fn strong_count(&self, id: ObjectId) -> u32 {
        self.entry(id).map_or(0, |entry| entry.strong)
    }

    pub(crate) fn backing(&self, id: ObjectId) -> Result<&ObjectBacking> {
        self.entry(id)?.backing.as_ref().ok_or(StoreError::NullObject)
    }

    pub(crate) fn backing_mut(&mut self, id: ObjectId) -> Result<&mut ObjectBacking> {
        self.entry_mut(id)?.backing.as_mut().ok_or(StoreError::NullObject)
    }

    pub(crate) fn retain_strong(&mut self, id: ObjectId) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.refs += 1;
        if entry.backing.is_some() {
            entry.strong += 1;
        }
        Ok(())
    }

    pub(crate) fn retain_weak(&mut self, id: ObjectId) -> Result<()> {
        self.entry_mut(id)?.refs += 1;
        Ok(())
    }

    /// Drops a strong slot. Returns the backing if it just died.
    pub(crate) fn release_strong(&mut self, id: ObjectId) -> Result<Option<ObjectBacking>> {
        self.entry_mut(id)?.refs -= 1;
        let died = self.weaken(id)?;
        self.reclaim(id);
        Ok(died)
    }

    pub(crate) fn release_weak(&mut self, id: ObjectId) -> Result<()> {
        self.entry_mut(id)?.refs -= 1;
        self.reclaim(id);
        Ok(())
    }

    /// Turns one strong slot into a weak one. Returns the backing if that
    /// was the last strong reference.
    pub(crate) fn weaken(&mut self, id: ObjectId) -> Result<Option<ObjectBacking>> {
        let entry = self.entry_mut(id)?;
        if entry.backing.is_none() {
            return Ok(None);
        }
        entry.strong -= 1;
        if entry.strong > 0 {
            return Ok(None);
        }
        let backing = entry.backing.take();
        self.alive -= 1;
        self.dead += 1;
        Ok(backing)
    }

    /// Turns one weak slot into a strong one if the target is still alive.
    pub(crate) fn strengthen(&mut self, id: ObjectId) -> Result<bool> {
        let entry = self.entry_mut(id)?;
        if entry.backing.is_none() {
            return Ok(false);
        }
        entry.strong += 1;
        Ok(true)
    }

    /// Kills the object regardless of its strong count.
    pub(crate) fn kill(&mut self, id: ObjectId) -> Result<Option<ObjectBacking>> {
        let entry = self.entry_mut(id)?;
        entry.strong = 0;
        let backing = entry.backing.take();
        if backing.is_some() {
            self.alive -= 1;
            self.dead += 1;
        }
        self.reclaim(id);
        Ok(backing)
    }

    fn reclaim(&mut self, id: ObjectId) {
        let index = id.0 as usize;
        let unused = matches!(
            &self.entries[index],
            Some(entry) if entry.refs == 0 && entry.backing.is_none()
        );
        if unused {
            self.entries[index] = None;
            self.free.push(id.0);
            self.dead -= 1;
        }
    }

    pub(crate) fn clear_marks(&mut self) {
        for entry in self.entries.iter_mut().flatten() {
            entry.marked = false;
        }
    }

    /// Marks a live object. Returns false if it was already marked or dead.
    pub(crate) fn mark(&mut self, id: ObjectId) -> bool {
        match self.entries.get_mut(id.0 as usize) {
            Some(Some(entry)) if entry.backing.is_some() && !entry.marked => {
                entry.marked = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn unmarked_alive(&self) -> Vec<ObjectId> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Some(entry) if entry.backing.is_some() && !entry.marked => {
                    Some(ObjectId(index as u32))
                }
                _ => None,
            })
            .collect()
    }

    pub(crate) fn alive(&self) -> usize {
        self.alive
    }

    pub(crate) fn dead(&self) -> usize {
        self.dead
    }
}

/// One member cell as stored in an object's cell block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cell {
    pub(crate) index: usize,
    pub(crate) field: FieldId,
    pub(crate) var: VarId,
    pub(crate) flags: CellFlags,
}

fn decode_cell(raw: &[u8], index: usize) -> Result<Cell> {
    let var = VarId::from_raw(read_word(raw, 4))
        .ok_or(StoreError::Internal("object cell holds handle 0"))?;
    Ok(Cell {
        index,
        field: FieldId(read_word(raw, 0)),
        var,
        flags: CellFlags::from_bits_retain(read_word(raw, 8)),
    })
}

pub(crate) fn decode_cells(bytes: &[u8]) -> Result<Vec<Cell>> {
    bytes
        .chunks_exact(CELL_STRIDE)
        .enumerate()
        .map(|(index, raw)| decode_cell(raw, index))
        .collect()
}

impl Store {
    /// A store together with the only [`Privilege`] it will honour.
    #[must_use]
    pub fn new_privileged(settings: StoreSettings) -> (Self, Privilege) {
        let store = Self::new(settings);
        let privilege = Privilege {
            key: store.privilege_key,
        };
        (store, privilege)
    }

    /// Stores a fresh object of `class` with no members in `h`.
    pub fn object_new(&mut self, h: VarId, class: Option<FieldId>) -> Result<ObjectId> {
        self.vars.get(h)?;
        let cells = self.arena.allocate(0, 0)?;
        let id = self.objects.create(ObjectBacking {
            class,
            cells,
            contexts: Vec::new(),
        });
        self.replace(h, Slot::Object(Some(id)))?;
        Ok(id)
    }

    pub fn initialize_empty(&mut self, h: VarId) -> Result<ObjectId> {
        self.object_new(h, None)
    }

    /// Target of an object or weak object slot, if it is alive.
    pub fn object_id(&self, h: VarId) -> Result<Option<ObjectId>> {
        match self.vars.get(h)? {
            Slot::Object(id) | Slot::WeakObject(id) => {
                Ok(id.filter(|&id| self.objects.is_alive(id)))
            }
            other => Err(wrong_type(ValueKind::Object, other)),
        }
    }

    pub(crate) fn live_object(&self, h: VarId) -> Result<ObjectId> {
        self.object_id(h)?.ok_or(StoreError::NullObject)
    }

    pub fn object_class(&self, h: VarId) -> Result<Option<FieldId>> {
        let id = self.live_object(h)?;
        Ok(self.objects.backing(id)?.class)
    }

    /// Whether both handles reference the same live object.
    pub fn same_object(&self, a: VarId, b: VarId) -> Result<bool> {
        Ok(match (self.object_id(a)?, self.object_id(b)?) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        })
    }

    pub(crate) fn cells(&self, id: ObjectId) -> Result<Vec<Cell>> {
        let backing = self.objects.backing(id)?;
        decode_cells(self.arena.read(&backing.cells)?)
    }

    fn find_cell(&self, id: ObjectId, field: FieldId) -> Result<Option<Cell>> {
        let backing = self.objects.backing(id)?;
        let bytes = self.arena.read(&backing.cells)?;
        bytes
            .chunks_exact(CELL_STRIDE)
            .enumerate()
            .find(|(_, raw)| read_word(raw, 0) == field.0)
            .map(|(index, raw)| decode_cell(raw, index))
            .transpose()
    }

    fn check_access(&self, cell: &Cell, access: Access<'_>) -> Result<()> {
        if cell.flags.contains(CellFlags::PRIVATE) && !access.sees_private(self.privilege_key) {
            return Err(StoreError::PrivateMember {
                name: self.names.display(cell.field),
            });
        }
        Ok(())
    }

    pub(crate) fn set_cell_flags(
        &mut self,
        id: ObjectId,
        index: usize,
        flags: CellFlags,
    ) -> Result<()> {
        let backing = self.objects.backing(id)?;
        let bytes = self.arena.write(&backing.cells)?;
        write_word(bytes, index * CELL_STRIDE + 8, flags.bits());
        Ok(())
    }

    pub(crate) fn push_cell(
        &mut self,
        id: ObjectId,
        field: FieldId,
        var: VarId,
        flags: CellFlags,
    ) -> Result<()> {
        let backing = self.objects.backing_mut(id)?;
        let len = self.arena.get_buffer_size(&backing.cells)?;
        self.arena.reshape(&mut backing.cells, len + CELL_STRIDE, true)?;
        let bytes = self.arena.write(&backing.cells)?;
        write_word(bytes, len, field.0);
        write_word(bytes, len + 4, var.raw());
        write_word(bytes, len + 8, flags.bits());
        Ok(())
    }

    /// Adds a member holding the default value of `kind`. Returns `None`
    /// if the member already exists.
    pub fn member_create(
        &mut self,
        h: VarId,
        field: FieldId,
        access: Access<'_>,
        is_private: bool,
        is_deletable: bool,
        kind: ValueKind,
    ) -> Result<Option<VarId>> {
        let id = self.live_object(h)?;
        if self.find_cell(id, field)?.is_some() {
            return Ok(None);
        }
        if is_private && !access.sees_private(self.privilege_key) {
            return Err(StoreError::PrivateMember {
                name: self.names.display(field),
            });
        }
        let mut flags = CellFlags::empty();
        flags.set(CellFlags::PRIVATE, is_private);
        flags.set(CellFlags::DELETABLE, is_deletable);

        let var = self.new_var(kind)?;
        self.push_cell(id, field, var, flags)?;
        Ok(Some(var))
    }

    /// Removes a deletable member. Returns false if there was no such member.
    pub fn member_delete(&mut self, h: VarId, field: FieldId, access: Access<'_>) -> Result<bool> {
        let id = self.live_object(h)?;
        let Some(cell) = self.find_cell(id, field)? else {
            return Ok(false);
        };
        self.check_access(&cell, access)?;
        if !cell.flags.contains(CellFlags::DELETABLE) {
            return Err(StoreError::NotDeletable {
                name: self.names.display(field),
            });
        }

        let backing = self.objects.backing_mut(id)?;
        let len = self.arena.get_buffer_size(&backing.cells)?;
        let at = cell.index * CELL_STRIDE;
        self.arena
            .write(&backing.cells)?
            .copy_within(at + CELL_STRIDE..len, at);
        self.arena.reshape(&mut backing.cells, len - CELL_STRIDE, true)?;

        let mut work = Teardown::default();
        work.heap.push(heap_index(cell.var.raw())?);
        self.finish(work)?;
        Ok(true)
    }

    /// Handle of a member for reading.
    pub fn member_get(
        &self,
        h: VarId,
        field: FieldId,
        access: Access<'_>,
    ) -> Result<Option<VarId>> {
        let id = self.live_object(h)?;
        match self.find_cell(id, field)? {
            Some(cell) => {
                self.check_access(&cell, access)?;
                Ok(Some(cell.var))
            }
            None => Ok(None),
        }
    }

    /// Handle of a member for writing. The collector stops assuming the
    /// member is free of objects until it has rescanned it.
    pub fn member_ref(
        &mut self,
        h: VarId,
        field: FieldId,
        access: Access<'_>,
    ) -> Result<Option<VarId>> {
        let id = self.live_object(h)?;
        let Some(cell) = self.find_cell(id, field)? else {
            return Ok(None);
        };
        self.check_access(&cell, access)?;
        if cell.flags.contains(CellFlags::NO_OBJECTS) {
            self.set_cell_flags(id, cell.index, cell.flags - CellFlags::NO_OBJECTS)?;
        }
        Ok(Some(cell.var))
    }

    /// Copies `src` into an existing member.
    pub fn member_set(
        &mut self,
        h: VarId,
        field: FieldId,
        src: VarId,
        access: Access<'_>,
    ) -> Result<()> {
        let Some(var) = self.member_ref(h, field, access)? else {
            return Err(StoreError::MissingField {
                name: self.names.display(field),
                suggestion: None,
            });
        };
        self.copy(var, src)
    }

    /// Copies a member into `dest`.
    pub fn member_copy(
        &mut self,
        dest: VarId,
        h: VarId,
        field: FieldId,
        access: Access<'_>,
    ) -> Result<()> {
        let Some(var) = self.member_get(h, field, access)? else {
            return Err(StoreError::MissingField {
                name: self.names.display(field),
                suggestion: None,
            });
        };
        self.copy(dest, var)
    }

    /// Member names in creation order. Private members are listed only when
    /// `access` may see them.
    pub fn members(&self, h: VarId, access: Access<'_>) -> Result<Vec<FieldId>> {
        let id = self.live_object(h)?;
        Ok(self
            .cells(id)?
            .into_iter()
            .filter(|cell| {
                access.sees_private(self.privilege_key)
                    || !cell.flags.contains(CellFlags::PRIVATE)
            })
            .map(|cell| cell.field)
            .collect())
    }

    // ── Strong and weak references ────────────────────────────────────

    /// Turns an object slot into a weak reference. If it held the last
    /// strong reference the object is destroyed right away.
    pub fn make_weak(&mut self, h: VarId) -> Result<()> {
        let slot = self.vars.get_mut(h)?;
        let id = match *slot {
            Slot::Object(id) => id,
            Slot::WeakObject(_) => return Ok(()),
            ref other => return Err(wrong_type(ValueKind::Object, other)),
        };
        *slot = Slot::WeakObject(id);
        if let Some(id) = id {
            if let Some(backing) = self.objects.weaken(id)? {
                log::trace!("store: object {} died on weak conversion", id.0);
                let mut work = Teardown::default();
                self.destroy_object(backing, &mut work)?;
                self.finish(work)?;
            }
        }
        Ok(())
    }

    /// Turns a weak reference back into a strong one. A weak reference whose
    /// target is gone becomes a fresh empty object.
    pub fn make_strong(&mut self, h: VarId) -> Result<()> {
        let id = match self.vars.get(h)? {
            Slot::Object(_) => return Ok(()),
            Slot::WeakObject(id) => *id,
            other => return Err(wrong_type(ValueKind::WeakObject, other)),
        };
        if let Some(id) = id {
            if self.objects.strengthen(id)? {
                self.vars.put(h, Slot::Object(Some(id)))?;
                return Ok(());
            }
        }
        self.object_new(h, None)?;
        Ok(())
    }

    /// Whether the target of an object or weak object slot is alive.
    pub fn weak_exists(&self, h: VarId) -> Result<bool> {
        Ok(self.object_id(h)?.is_some())
    }

    /// Strong references currently held on the target of `h`.
    pub fn strong_count(&self, h: VarId) -> Result<u32> {
        match self.vars.get(h)? {
            Slot::Object(id) | Slot::WeakObject(id) => {
                Ok(id.map_or(0, |id| self.objects.strong_count(id)))
            }
            other => Err(wrong_type(ValueKind::Object, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell as StdCell, rc::Rc};

    use super::*;
    use crate::StoreSettings;

    fn create_test_env() -> (Store, VarId) {
        let mut store = Store::new(StoreSettings::default());
        let h = store.new_heap_slot().unwrap();
        store.initialize_empty(h).unwrap();
        (store, h)
    }

    #[test]
    fn test_member_create_and_lookup() {
        let (mut store, obj) = create_test_env();
        let name = store.names().intern("name");
        let var = store
            .member_create(obj, name, Access::Outside, false, false, ValueKind::String)
            .unwrap()
            .expect("member must be new");
        store.set_string(var, "Bob").unwrap();

        let again = store
            .member_create(obj, name, Access::Outside, false, false, ValueKind::String)
            .unwrap();
        assert!(again.is_none(), "existing member is not recreated");

        let got = store.member_get(obj, name, Access::Outside).unwrap().unwrap();
        assert_eq!(store.string(got).unwrap(), "Bob");
        assert_eq!(store.members(obj, Access::Outside).unwrap(), vec![name]);
    }

    #[test]
    fn test_private_members_need_access() {
        let (mut store, privilege) = Store::new_privileged(StoreSettings::default());
        let obj = store.new_heap_slot().unwrap();
        store.initialize_empty(obj).unwrap();
        let secret = store.names().intern("secret");
        let err = store
            .member_create(obj, secret, Access::Outside, true, false, ValueKind::Integer)
            .unwrap_err();
        assert!(matches!(err, StoreError::PrivateMember { .. }));

        store
            .member_create(obj, secret, Access::This, true, false, ValueKind::Integer)
            .unwrap()
            .unwrap();
        assert!(matches!(
            store.member_get(obj, secret, Access::Outside),
            Err(StoreError::PrivateMember { .. })
        ));
        assert!(store.members(obj, Access::Outside).unwrap().is_empty());

        let var = store
            .member_get(obj, secret, Access::Privileged(&privilege))
            .unwrap();
        assert!(var.is_some());
        assert_eq!(
            store.members(obj, Access::Privileged(&privilege)).unwrap(),
            vec![secret]
        );
    }

    #[test]
    fn test_privilege_of_another_store_is_refused() {
        let (mut store, obj) = create_test_env();
        let (_other, foreign) = Store::new_privileged(StoreSettings::default());
        let secret = store.names().intern("secret");
        store
            .member_create(obj, secret, Access::This, true, false, ValueKind::Integer)
            .unwrap()
            .unwrap();

        assert!(matches!(
            store.member_get(obj, secret, Access::Privileged(&foreign)),
            Err(StoreError::PrivateMember { .. })
        ));
        assert!(store.members(obj, Access::Privileged(&foreign)).unwrap().is_empty());
    }

    #[test]
    fn test_private_deletable_member_needs_access_to_delete() {
        let (mut store, obj) = create_test_env();
        let scratch = store.names().intern("scratch");
        store
            .member_create(obj, scratch, Access::This, true, true, ValueKind::Integer)
            .unwrap()
            .unwrap();
        let slots = store.stats().heap_slots;

        assert!(matches!(
            store.member_delete(obj, scratch, Access::Outside),
            Err(StoreError::PrivateMember { .. })
        ));
        assert_eq!(store.stats().heap_slots, slots, "nothing was removed");
        assert_eq!(store.members(obj, Access::This).unwrap(), vec![scratch]);

        assert!(store.member_delete(obj, scratch, Access::This).unwrap());
        assert!(store.members(obj, Access::This).unwrap().is_empty());
    }

    #[test]
    fn test_member_delete_honours_flag() {
        let (mut store, obj) = create_test_env();
        let fixed = store.names().intern("fixed");
        let loose = store.names().intern("loose");
        store
            .member_create(obj, fixed, Access::Outside, false, false, ValueKind::Integer)
            .unwrap();
        store
            .member_create(obj, loose, Access::Outside, false, true, ValueKind::String)
            .unwrap();
        let slots = store.stats().heap_slots;

        assert!(matches!(
            store.member_delete(obj, fixed, Access::Outside),
            Err(StoreError::NotDeletable { .. })
        ));
        assert!(store.member_delete(obj, loose, Access::Outside).unwrap());
        assert_eq!(store.stats().heap_slots, slots - 1, "member slot destroyed");
        assert!(!store.member_delete(obj, loose, Access::Outside).unwrap());
        assert_eq!(store.members(obj, Access::Outside).unwrap(), vec![fixed]);
    }

    #[test]
    fn test_null_object_faults() {
        let mut store = Store::default();
        let h = store.new_heap_slot().unwrap();
        store.reset(h, ValueKind::Object).unwrap();
        let field = store.names().intern("x");
        assert!(matches!(
            store.member_get(h, field, Access::Outside),
            Err(StoreError::NullObject)
        ));
        assert!(!store.weak_exists(h).unwrap());
    }

    #[test]
    fn test_copy_shares_identity() {
        let (mut store, obj) = create_test_env();
        let other = store.new_heap_slot().unwrap();
        store.copy(other, obj).unwrap();
        assert!(store.same_object(obj, other).unwrap());
        assert_eq!(store.strong_count(obj).unwrap(), 2);

        let field = store.names().intern("shared");
        store
            .member_create(other, field, Access::Outside, false, false, ValueKind::Integer)
            .unwrap();
        assert!(store.member_get(obj, field, Access::Outside).unwrap().is_some());
    }

    #[test]
    fn test_last_strong_reference_destroys_object() {
        let (mut store, obj) = create_test_env();
        let field = store.names().intern("v");
        let var = store
            .member_create(obj, field, Access::Outside, false, false, ValueKind::String)
            .unwrap()
            .unwrap();
        store.set_string(var, "payload").unwrap();
        let before = store.stats();

        store.delete_heap_slot(obj).unwrap();
        let after = store.stats();
        assert_eq!(after.objects_alive, before.objects_alive - 1);
        assert_eq!(after.heap_slots, before.heap_slots - 2, "object slot and member slot");
        assert_eq!(after.arena.blocks, 0);
        assert_eq!(after.objects_dead, 0, "entry reclaimed");
    }

    #[test]
    fn test_weak_conversion_of_last_reference() {
        let (mut store, obj) = create_test_env();
        store.make_weak(obj).unwrap();
        assert_eq!(store.kind(obj).unwrap(), ValueKind::WeakObject);
        assert!(!store.weak_exists(obj).unwrap(), "destroyed immediately");
        assert_eq!(store.stats().objects_dead, 1);

        store.make_strong(obj).unwrap();
        assert_eq!(store.kind(obj).unwrap(), ValueKind::Object);
        assert!(store.weak_exists(obj).unwrap(), "reinitialised as a fresh object");
        assert_eq!(store.stats().objects_dead, 0);
    }

    #[test]
    fn test_weak_reference_observes_without_owning() {
        let (mut store, obj) = create_test_env();
        let weak = store.new_heap_slot().unwrap();
        store.copy(weak, obj).unwrap();
        store.make_weak(weak).unwrap();
        assert!(store.weak_exists(weak).unwrap());
        assert_eq!(store.strong_count(obj).unwrap(), 1);

        store.make_strong(weak).unwrap();
        assert!(store.same_object(weak, obj).unwrap());
        assert_eq!(store.strong_count(obj).unwrap(), 2);

        store.make_weak(weak).unwrap();
        store.reset(obj, ValueKind::Variant).unwrap();
        assert!(!store.weak_exists(weak).unwrap());
    }

    #[test]
    fn test_member_ref_clears_no_objects_flag() {
        let (mut store, obj) = create_test_env();
        let field = store.names().intern("n");
        store
            .member_create(obj, field, Access::Outside, false, false, ValueKind::Integer)
            .unwrap();
        let id = store.live_object(obj).unwrap();
        store.set_cell_flags(id, 0, CellFlags::NO_OBJECTS).unwrap();

        store.member_get(obj, field, Access::Outside).unwrap();
        assert!(store.cells(id).unwrap()[0].flags.contains(CellFlags::NO_OBJECTS));
        store.member_ref(obj, field, Access::Outside).unwrap();
        assert!(!store.cells(id).unwrap()[0].flags.contains(CellFlags::NO_OBJECTS));
    }

    #[test]
    fn test_member_set_and_copy() {
        let (mut store, obj) = create_test_env();
        let field = store.names().intern("label");
        store
            .member_create(obj, field, Access::Outside, false, false, ValueKind::Variant)
            .unwrap();
        let src = store.new_heap_slot().unwrap();
        store.set_string(src, "tag").unwrap();
        store.member_set(obj, field, src, Access::Outside).unwrap();

        let dest = store.new_heap_slot().unwrap();
        store.member_copy(dest, obj, field, Access::Outside).unwrap();
        assert_eq!(store.string(dest).unwrap(), "tag");

        let missing = store.names().intern("missing");
        assert!(matches!(
            store.member_set(obj, missing, src, Access::Outside),
            Err(StoreError::MissingField { .. })
        ));
    }

    #[test]
    fn test_self_reference_survives_until_collected() {
        let (mut store, obj) = create_test_env();
        let me = store.names().intern("me");
        store
            .member_create(obj, me, Access::Outside, false, false, ValueKind::Object)
            .unwrap();
        store.member_set(obj, me, obj, Access::Outside).unwrap();
        let dropped = Rc::new(StdCell::new(false));
        let flag = dropped.clone();
        let kind = store.register_context_kind("watch");
        store
            .attach_context(obj, kind, (), move |()| {
                flag.set(true);
                Ok(())
            })
            .unwrap();

        store.delete_heap_slot(obj).unwrap();
        assert_eq!(store.stats().objects_alive, 1, "cycle keeps itself alive");
        assert!(!dropped.get());
    }

    #[test]
    fn test_object_class() {
        let mut store = Store::default();
        let h = store.new_heap_slot().unwrap();
        let class = store.names().intern("Point");
        store.object_new(h, Some(class)).unwrap();
        assert_eq!(store.object_class(h).unwrap(), Some(class));
    }
}
