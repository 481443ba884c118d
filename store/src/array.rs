//! Arrays: a block of element handles, one heap slot per element.
//!
//! Copying an array shares the block. Every operation that can change an
//! element or the shape first makes the block private, which gives the
//! array its own element slots, each a (still lazily shared) copy of the
//! original.

use std::mem;

use arena::ArenaError;

use crate::{
    Result, Store, StoreError, ValueKind, VarId,
    store::{Teardown, heap_index, wrong_type},
    value::{ARRAY_STRIDE, Slot, read_word, write_word},
};

impl Store {
    /// Builds a private copy of a handle table: every var word is replaced
    /// by a new heap slot holding a copy of the old element.
    pub(crate) fn clone_table(
        &mut self,
        mut bytes: Vec<u8>,
        stride: usize,
        var_at: usize,
    ) -> Result<arena::Allocation> {
        for entry in bytes.chunks_exact_mut(stride) {
            let old = VarId::from_raw(read_word(entry, var_at))
                .ok_or(StoreError::Internal("table holds handle 0"))?;
            let new = self.vars.heap_alloc(Slot::Uninit)?;
            self.copy(new, old)?;
            write_word(entry, var_at, new.raw());
        }
        let alloc = self.arena.allocate(bytes.len(), bytes.len())?;
        self.arena.write(&alloc)?.copy_from_slice(&bytes);
        Ok(alloc)
    }

    /// Gives the array in `h` a block of its own if it shares one.
    pub(crate) fn unshare_array(&mut self, h: VarId) -> Result<()> {
        let bytes = match self.vars.get(h)? {
            Slot::Array { backing, .. } => {
                if !self.arena.is_shared(backing)? {
                    return Ok(());
                }
                self.arena.read(backing)?.to_vec()
            }
            other => return Err(wrong_type(ValueKind::Array, other)),
        };
        log::trace!("store: unsharing array {h:?}");
        let fresh = self.clone_table(bytes, ARRAY_STRIDE, 0)?;
        let Slot::Array { backing, .. } = self.vars.get_mut(h)? else {
            return Err(StoreError::Internal("array changed type while unsharing"));
        };
        let old = mem::replace(backing, fresh);
        self.arena.release_reference(old)?;
        Ok(())
    }

    pub(crate) fn array_handles(&self, h: VarId) -> Result<Vec<u32>> {
        match self.vars.get(h)? {
            Slot::Array { backing, .. } => Ok(self
                .arena
                .read(backing)?
                .chunks_exact(ARRAY_STRIDE)
                .map(|raw| read_word(raw, 0))
                .collect()),
            other => Err(wrong_type(ValueKind::Array, other)),
        }
    }

    /// Stores an array of `len` elements of `elem` in `h`, each holding the
    /// kind's default value.
    /// The old contents of `h` are only torn down once the new array is
    /// complete; on error `h` is left as it was.
    pub fn array_init(&mut self, h: VarId, elem: ValueKind, len: usize) -> Result<()> {
        self.vars.get(h)?;
        let size = len
            .checked_mul(ARRAY_STRIDE)
            .ok_or(ArenaError::TooLarge { requested: usize::MAX })?;
        let backing = self.arena.allocate(size, size)?;

        let mut handles = Vec::with_capacity(len);
        for _ in 0..len {
            match self.new_var(elem) {
                Ok(var) => handles.push(var.raw()),
                Err(err) => {
                    self.arena.release_reference(backing)?;
                    self.discard_vars(&handles)?;
                    return Err(err);
                }
            }
        }
        let bytes = self.arena.write(&backing)?;
        for (i, raw) in handles.into_iter().enumerate() {
            write_word(bytes, i * ARRAY_STRIDE, raw);
        }
        self.replace(h, Slot::Array { elem, backing })
    }

    /// Destroys heap slots that were never linked into a backing.
    fn discard_vars(&mut self, handles: &[u32]) -> Result<()> {
        let mut work = Teardown::default();
        for &raw in handles {
            work.heap.push(heap_index(raw)?);
        }
        self.finish(work)?;
        Ok(())
    }

    pub fn array_len(&self, h: VarId) -> Result<usize> {
        match self.vars.get(h)? {
            Slot::Array { backing, .. } => {
                Ok(self.arena.get_buffer_size(backing)? / ARRAY_STRIDE)
            }
            other => Err(wrong_type(ValueKind::Array, other)),
        }
    }

    pub fn array_elem_kind(&self, h: VarId) -> Result<ValueKind> {
        match self.vars.get(h)? {
            Slot::Array { elem, .. } => Ok(*elem),
            other => Err(wrong_type(ValueKind::Array, other)),
        }
    }

    /// Handle of element `index` for reading. Does not unshare the array.
    pub fn array_element(&self, h: VarId, index: usize) -> Result<VarId> {
        let Slot::Array { backing, .. } = self.vars.get(h)? else {
            return Err(wrong_type(ValueKind::Array, self.vars.get(h)?));
        };
        let bytes = self.arena.read(backing)?;
        let len = bytes.len() / ARRAY_STRIDE;
        if index >= len {
            return Err(StoreError::IndexOutOfBounds { index, len });
        }
        VarId::from_raw(read_word(bytes, index * ARRAY_STRIDE))
            .ok_or(StoreError::Internal("array holds handle 0"))
    }

    /// Handle of element `index` for writing.
    pub fn array_element_ref(&mut self, h: VarId, index: usize) -> Result<VarId> {
        self.unshare_array(h)?;
        self.array_element(h, index)
    }

    /// Copies element `index` into `dest` without unsharing the array.
    pub fn array_element_copy(&mut self, dest: VarId, h: VarId, index: usize) -> Result<()> {
        let var = self.array_element(h, index)?;
        self.copy(dest, var)
    }

    pub fn array_append(&mut self, h: VarId) -> Result<VarId> {
        let len = self.array_len(h)?;
        self.array_insert(h, len)
    }

    /// Inserts a default element before `index`; `index == len` appends.
    pub fn array_insert(&mut self, h: VarId, index: usize) -> Result<VarId> {
        let len = self.array_len(h)?;
        if index > len {
            return Err(StoreError::IndexOutOfBounds { index, len });
        }
        self.unshare_array(h)?;
        let elem = self.array_elem_kind(h)?;
        let var = self.new_var(elem)?;

        let Slot::Array { backing, .. } = self.vars.get_mut(h)? else {
            return Err(StoreError::Internal("array changed type"));
        };
        let size = len * ARRAY_STRIDE;
        let at = index * ARRAY_STRIDE;
        self.arena.reshape(backing, size + ARRAY_STRIDE, true)?;
        let bytes = self.arena.write(backing)?;
        bytes.copy_within(at..size, at + ARRAY_STRIDE);
        write_word(bytes, at, var.raw());
        Ok(var)
    }

    /// Removes element `index` and destroys its slot.
    pub fn array_delete(&mut self, h: VarId, index: usize) -> Result<()> {
        let len = self.array_len(h)?;
        if index >= len {
            return Err(StoreError::IndexOutOfBounds { index, len });
        }
        self.unshare_array(h)?;

        let Slot::Array { backing, .. } = self.vars.get_mut(h)? else {
            return Err(StoreError::Internal("array changed type"));
        };
        let size = len * ARRAY_STRIDE;
        let at = index * ARRAY_STRIDE;
        let bytes = self.arena.write(backing)?;
        let raw = read_word(bytes, at);
        bytes.copy_within(at + ARRAY_STRIDE..size, at);
        self.arena.reshape(backing, size - ARRAY_STRIDE, true)?;

        let mut work = Teardown::default();
        work.heap.push(heap_index(raw)?);
        self.finish(work)?;
        Ok(())
    }

    /// Grows with default elements or truncates, destroying the cut-off
    /// elements.
    pub fn array_resize(&mut self, h: VarId, new_len: usize) -> Result<()> {
        let len = self.array_len(h)?;
        if new_len == len {
            return Ok(());
        }
        self.unshare_array(h)?;
        let elem = self.array_elem_kind(h)?;

        let mut added = Vec::new();
        for _ in len..new_len {
            added.push(self.new_var(elem)?.raw());
        }

        let Slot::Array { backing, .. } = self.vars.get_mut(h)? else {
            return Err(StoreError::Internal("array changed type"));
        };
        let mut work = Teardown::default();
        if new_len < len {
            let bytes = self.arena.read(backing)?;
            for raw in bytes[new_len * ARRAY_STRIDE..].chunks_exact(ARRAY_STRIDE) {
                work.heap.push(heap_index(read_word(raw, 0))?);
            }
        }
        self.arena.reshape(backing, new_len * ARRAY_STRIDE, true)?;
        let bytes = self.arena.write(backing)?;
        for (i, raw) in added.into_iter().enumerate() {
            write_word(bytes, (len + i) * ARRAY_STRIDE, raw);
        }
        self.finish(work)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreSettings;

    fn create_test_env(len: usize) -> (Store, VarId) {
        let mut store = Store::new(StoreSettings::default());
        let h = store.new_heap_slot().unwrap();
        store.array_init(h, ValueKind::Integer, len).unwrap();
        (store, h)
    }

    fn contents(store: &Store, h: VarId) -> Vec<i64> {
        (0..store.array_len(h).unwrap())
            .map(|i| store.integer(store.array_element(h, i).unwrap()).unwrap())
            .collect()
    }

    fn fill(store: &mut Store, h: VarId) {
        for i in 0..store.array_len(h).unwrap() {
            let var = store.array_element_ref(h, i).unwrap();
            store.set_integer(var, i as i64 * 10).unwrap();
        }
    }

    #[test]
    fn test_init_fills_with_defaults() {
        let (store, h) = create_test_env(3);
        assert_eq!(store.array_len(h).unwrap(), 3);
        assert_eq!(store.array_elem_kind(h).unwrap(), ValueKind::Integer);
        assert_eq!(contents(&store, h), [0, 0, 0]);
    }

    #[test]
    fn test_oversized_init_leaves_array_untouched() {
        let (mut store, h) = create_test_env(2);
        fill(&mut store, h);
        let before = store.stats();
        for len in [usize::MAX / 2, u32::MAX as usize / ARRAY_STRIDE + 1] {
            assert!(matches!(
                store.array_init(h, ValueKind::Integer, len),
                Err(StoreError::Arena(ArenaError::TooLarge { .. }))
            ));
        }
        assert_eq!(contents(&store, h), [0, 10]);
        assert_eq!(store.stats().heap_slots, before.heap_slots);
        assert_eq!(store.stats().arena.blocks, before.arena.blocks);
    }

    #[test]
    fn test_reinit_tears_down_old_elements() {
        let (mut store, h) = create_test_env(4);
        store.array_init(h, ValueKind::String, 1).unwrap();
        assert_eq!(store.stats().heap_slots, 2, "array slot and one element");
        assert_eq!(store.array_elem_kind(h).unwrap(), ValueKind::String);
        let var = store.array_element(h, 0).unwrap();
        assert_eq!(store.string(var).unwrap(), "");
    }

    #[test]
    fn test_append_insert_delete_keep_order() {
        let (mut store, h) = create_test_env(3);
        fill(&mut store, h);

        let tail = store.array_append(h).unwrap();
        store.set_integer(tail, 99).unwrap();
        let front = store.array_insert(h, 0).unwrap();
        store.set_integer(front, -1).unwrap();
        assert_eq!(contents(&store, h), [-1, 0, 10, 20, 99]);

        store.array_delete(h, 2).unwrap();
        assert_eq!(contents(&store, h), [-1, 0, 20, 99]);
        assert!(matches!(
            store.array_insert(h, 9),
            Err(StoreError::IndexOutOfBounds { index: 9, len: 4 })
        ));
        assert!(matches!(
            store.array_delete(h, 4),
            Err(StoreError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_copy_on_write_keeps_arrays_independent() {
        let (mut store, a) = create_test_env(2);
        fill(&mut store, a);
        let b = store.new_heap_slot().unwrap();
        store.copy(b, a).unwrap();
        let slots = store.stats().heap_slots;

        let var = store.array_element_ref(b, 1).unwrap();
        store.set_integer(var, 7).unwrap();
        assert_eq!(store.stats().heap_slots, slots + 2, "b got its own elements");
        assert_eq!(contents(&store, a), [0, 10]);
        assert_eq!(contents(&store, b), [0, 7]);
    }

    #[test]
    fn test_element_copy_does_not_unshare() {
        let (mut store, a) = create_test_env(2);
        let b = store.new_heap_slot().unwrap();
        store.copy(b, a).unwrap();
        let dest = store.new_heap_slot().unwrap();
        let slots = store.stats().heap_slots;

        store.array_element_copy(dest, b, 1).unwrap();
        assert_eq!(store.integer(dest).unwrap(), 0);
        assert_eq!(store.stats().heap_slots, slots);
        assert_eq!(store.array_element(a, 1).unwrap(), store.array_element(b, 1).unwrap());
    }

    #[test]
    fn test_resize_grows_with_defaults_and_shrinks_destroying() {
        let (mut store, h) = create_test_env(2);
        fill(&mut store, h);
        store.array_resize(h, 4).unwrap();
        assert_eq!(contents(&store, h), [0, 10, 0, 0]);

        let before = store.stats().heap_slots;
        store.array_resize(h, 1).unwrap();
        assert_eq!(contents(&store, h), [0]);
        assert_eq!(store.stats().heap_slots, before - 3);
    }

    #[test]
    fn test_nested_arrays_are_torn_down() {
        let mut store = Store::default();
        let outer = store.new_heap_slot().unwrap();
        store.array_init(outer, ValueKind::Array, 2).unwrap();
        for i in 0..2 {
            let inner = store.array_element_ref(outer, i).unwrap();
            store.array_init(inner, ValueKind::String, 3).unwrap();
        }
        assert_eq!(store.stats().heap_slots, 1 + 2 + 6);
        store.delete_heap_slot(outer).unwrap();
        assert_eq!(store.stats().heap_slots, 0);
        assert_eq!(store.stats().arena.blocks, 0);
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let mut store = Store::default();
        let h = store.new_heap_slot().unwrap();
        store.set_integer(h, 1).unwrap();
        assert!(matches!(
            store.array_len(h),
            Err(StoreError::WrongType {
                expected: ValueKind::Array,
                actual: ValueKind::Integer
            })
        ));
        assert!(store.array_element(h, 0).is_err());
    }
}
