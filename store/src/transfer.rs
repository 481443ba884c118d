//! Deep copies between store instances.
//!
//! Stores never share handles, so a value crossing from one store to
//! another is rebuilt slot by slot. Objects reached more than once map to a
//! single new object, which keeps sharing and cycles intact.

use std::collections::HashMap;

use crate::{
    FieldId, ObjectId, Result, Store, StoreError, VarId,
    object::CellFlags,
    value::Slot,
};

struct Transfer<'a> {
    source: &'a Store,
    objects: HashMap<ObjectId, ObjectId, ahash::RandomState>,
    pending: Vec<(VarId, VarId)>,
    weak: Vec<(VarId, ObjectId)>,
}

impl Transfer<'_> {
    fn field(&self, target: &Store, field: FieldId) -> FieldId {
        if target.names.same_table(&self.source.names) {
            return field;
        }
        target.names.intern(&self.source.names.display(field))
    }
}

/// Slot with the same value if `slot` owns nothing.
fn inline_value(slot: &Slot) -> Option<Slot> {
    Some(match slot {
        Slot::Uninit => Slot::Uninit,
        Slot::Boolean(v) => Slot::Boolean(*v),
        Slot::Integer(v) => Slot::Integer(*v),
        Slot::Money(v) => Slot::Money(*v),
        Slot::Float(v) => Slot::Float(*v),
        Slot::DateTime(v) => Slot::DateTime(*v),
        Slot::Table(v) => Slot::Table(*v),
        Slot::Schema(v) => Slot::Schema(*v),
        Slot::Record { func, cells: None } => Slot::Record {
            func: *func,
            cells: None,
        },
        Slot::Object(None) => Slot::Object(None),
        Slot::WeakObject(None) => Slot::WeakObject(None),
        _ => return None,
    })
}

impl Store {
    /// Stores in `dest` a deep copy of `src`, a variable of another store.
    /// Native contexts stay behind; field names are re-interned when the
    /// stores do not share a name table.
    pub fn transfer_from(&mut self, dest: VarId, source: &Store, src: VarId) -> Result<()> {
        self.vars.get(dest)?;
        source.vars.get(src)?;

        let root = self.new_heap_slot()?;
        let mut transfer = Transfer {
            source,
            objects: HashMap::default(),
            pending: vec![(root, src)],
            weak: Vec::new(),
        };
        let result = self.run_transfer(&mut transfer);
        if let Err(err) = result {
            self.delete_heap_slot(root)?;
            return Err(err);
        }
        self.move_value(dest, root)?;
        self.delete_heap_slot(root)?;

        log::debug!(
            "store: transferred {src:?} into {dest:?} ({} objects)",
            transfer.objects.len()
        );
        Ok(())
    }

    fn run_transfer(&mut self, transfer: &mut Transfer<'_>) -> Result<()> {
        let source = transfer.source;
        while let Some((d, s)) = transfer.pending.pop() {
            let slot = source.vars.get(s)?;
            if let Some(value) = inline_value(slot) {
                self.replace(d, value)?;
                continue;
            }
            match slot {
                Slot::Str(_) => self.set_string(d, source.string(s)?)?,
                Slot::Binary(_) => self.set_binary(d, source.binary(s)?)?,
                Slot::Array { elem, .. } => {
                    let handles = source.array_handles(s)?;
                    self.array_init(d, *elem, handles.len())?;
                    let fresh = self.array_handles(d)?;
                    for (new, old) in fresh.into_iter().zip(handles) {
                        transfer.pending.push((heap_var(new)?, heap_var(old)?));
                    }
                }
                Slot::Record { func, .. } => {
                    match func {
                        Some(func) => self.function_record_init(d, *func)?,
                        None => self.record_init_empty(d)?,
                    }
                    for field in source.fields(s)? {
                        let old = source
                            .field_lookup(s, field)?
                            .ok_or(StoreError::Internal("listed field has no slot"))?;
                        let field = transfer.field(self, field);
                        let new = self.field_create(d, field, false)?;
                        transfer.pending.push((new, old));
                    }
                }
                Slot::Object(Some(id)) => self.transfer_object(d, *id, transfer)?,
                Slot::WeakObject(Some(id)) => {
                    self.replace(d, Slot::WeakObject(None))?;
                    transfer.weak.push((d, *id));
                }
                _ => return Err(StoreError::Internal("unhandled slot in transfer")),
            }
        }

        for (d, old) in std::mem::take(&mut transfer.weak) {
            let Some(&new) = transfer.objects.get(&old) else {
                continue;
            };
            if self.objects.is_alive(new) {
                self.objects.retain_weak(new)?;
                self.replace(d, Slot::WeakObject(Some(new)))?;
            }
        }
        Ok(())
    }

    fn transfer_object(&mut self, d: VarId, old: ObjectId, transfer: &mut Transfer<'_>) -> Result<()> {
        let source = transfer.source;
        if !source.objects.is_alive(old) {
            return self.replace(d, Slot::Object(None));
        }
        if let Some(&new) = transfer.objects.get(&old) {
            self.objects.retain_strong(new)?;
            return self.replace(d, Slot::Object(Some(new)));
        }

        let class = source
            .objects
            .backing(old)?
            .class
            .map(|class| transfer.field(self, class));
        let new = self.object_new(d, class)?;
        transfer.objects.insert(old, new);
        for cell in source.cells(old)? {
            let var = self.vars.heap_alloc(Slot::Uninit)?;
            let field = transfer.field(self, cell.field);
            self.push_cell(new, field, var, cell.flags - CellFlags::NO_OBJECTS)?;
            transfer.pending.push((var, cell.var));
        }
        Ok(())
    }
}

fn heap_var(raw: u32) -> Result<VarId> {
    VarId::from_raw(raw).ok_or(StoreError::Internal("table holds handle 0"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Access, ColumnNames, StoreSettings, ValueKind};

    fn create_test_pair() -> (Store, Store) {
        let names = ColumnNames::new();
        (
            Store::with_names(StoreSettings::default(), names.clone()),
            Store::with_names(StoreSettings::default(), names),
        )
    }

    #[test]
    fn test_strings_and_scalars_cross_over() {
        let (mut from, mut to) = create_test_pair();
        let s = from.new_heap_slot().unwrap();
        from.set_string(s, "payload").unwrap();
        let d = to.new_heap_slot().unwrap();
        to.transfer_from(d, &from, s).unwrap();
        assert_eq!(to.string(d).unwrap(), "payload");

        from.set_money(s, crate::Money::from_units(3).unwrap()).unwrap();
        to.transfer_from(d, &from, s).unwrap();
        assert_eq!(to.money(d).unwrap(), crate::Money::from_units(3).unwrap());
        assert_eq!(to.stats().heap_slots, 1, "scratch slot is released");
    }

    #[test]
    fn test_nested_composites_are_rebuilt() {
        let (mut from, mut to) = create_test_pair();
        let rows = from.new_heap_slot().unwrap();
        from.array_init(rows, ValueKind::Record, 2).unwrap();
        let name = from.names().intern("name");
        for (i, who) in ["ada", "bob"].into_iter().enumerate() {
            let row = from.array_element_ref(rows, i).unwrap();
            from.record_init_empty(row).unwrap();
            let var = from.field_create(row, name, false).unwrap();
            from.set_string(var, who).unwrap();
        }

        let d = to.new_heap_slot().unwrap();
        to.transfer_from(d, &from, rows).unwrap();
        assert_eq!(to.array_len(d).unwrap(), 2);
        assert_eq!(to.array_elem_kind(d).unwrap(), ValueKind::Record);
        let second = to.array_element(d, 1).unwrap();
        let var = to.field_typed(second, name, ValueKind::String).unwrap();
        assert_eq!(to.string(var).unwrap(), "bob");
    }

    #[test]
    fn test_object_graph_keeps_identity_and_cycles() {
        let (mut from, mut to) = create_test_pair();
        let a = from.new_heap_slot().unwrap();
        let b = from.new_heap_slot().unwrap();
        from.initialize_empty(a).unwrap();
        from.initialize_empty(b).unwrap();
        let peer = from.names().intern("peer");
        let back = from.names().intern("back");
        from.member_create(a, peer, Access::Outside, false, false, ValueKind::Object)
            .unwrap();
        from.member_set(a, peer, b, Access::Outside).unwrap();
        from.member_create(b, back, Access::Outside, false, false, ValueKind::Object)
            .unwrap();
        from.member_set(b, back, a, Access::Outside).unwrap();
        let edge = from.member_get(b, back, Access::Outside).unwrap().unwrap();
        from.make_weak(edge).unwrap();

        let d = to.new_heap_slot().unwrap();
        to.transfer_from(d, &from, a).unwrap();
        assert_eq!(to.stats().objects_alive, 2);

        let peer_var = to.member_get(d, peer, Access::Outside).unwrap().unwrap();
        let back_var = to.member_get(peer_var, back, Access::Outside).unwrap().unwrap();
        assert_eq!(to.kind(back_var).unwrap(), ValueKind::WeakObject);
        assert!(to.same_object(back_var, d).unwrap(), "weak edge points home");
        assert_eq!(to.strong_count(d).unwrap(), 1);

        to.delete_heap_slot(d).unwrap();
        assert_eq!(to.stats().objects_alive, 0, "only a weak edge closed the loop");
    }

    #[test]
    fn test_weak_reference_outside_the_value_is_dropped() {
        let (mut from, mut to) = create_test_pair();
        let target = from.new_heap_slot().unwrap();
        from.initialize_empty(target).unwrap();
        let weak = from.new_heap_slot().unwrap();
        from.copy(weak, target).unwrap();
        from.make_weak(weak).unwrap();

        let d = to.new_heap_slot().unwrap();
        to.transfer_from(d, &from, weak).unwrap();
        assert_eq!(to.kind(d).unwrap(), ValueKind::WeakObject);
        assert!(!to.weak_exists(d).unwrap());
    }

    #[test]
    fn test_names_are_reinterned_across_tables() {
        let mut from = Store::default();
        let mut to = Store::default();
        to.names().intern("padding");
        let r = from.new_heap_slot().unwrap();
        from.record_init_empty(r).unwrap();
        let city = from.names().intern("city");
        from.field_create(r, city, false).unwrap();

        let d = to.new_heap_slot().unwrap();
        to.transfer_from(d, &from, r).unwrap();
        let mapped = to.names().lookup("city").unwrap();
        assert_ne!(mapped, city);
        assert!(to.field_exists(d, mapped).unwrap());
    }

    #[test]
    fn test_contexts_stay_behind() {
        let (mut from, mut to) = create_test_pair();
        let obj = from.new_heap_slot().unwrap();
        from.initialize_empty(obj).unwrap();
        let kind = from.register_context_kind("socket");
        from.attach_context(obj, kind, 5u8, |_| Ok(())).unwrap();

        let d = to.new_heap_slot().unwrap();
        to.transfer_from(d, &from, obj).unwrap();
        let kind = to.register_context_kind("socket");
        assert_eq!(to.context::<u8>(d, kind).unwrap(), None);
    }
}
