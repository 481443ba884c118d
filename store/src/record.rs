//! Records: field id to heap slot tables with copy-on-write sharing.
//!
//! A record is either null (no table at all) or a table of zero or more
//! `[field, var]` pairs. Function records are records bound to a
//! [`FunctionId`] and support the same field operations.

use std::{mem, sync::Arc};

use arena::Allocation;

use crate::{
    FieldId, FunctionId, Result, Store, StoreError, ValueKind, VarId,
    store::{Teardown, heap_index, wrong_type},
    value::{RECORD_STRIDE, Slot, read_word, write_word},
};

/// Edit distance used for "did you mean" suggestions.
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(ca != *cb);
            cur[j + 1] = substitute.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

impl Store {
    fn record_cells(&self, h: VarId) -> Result<Option<&Allocation>> {
        match self.vars.get(h)? {
            Slot::Record { cells, .. } => Ok(cells.as_ref()),
            other => Err(wrong_type(ValueKind::Record, other)),
        }
    }

    fn find_field(&self, cells: &Allocation, field: FieldId) -> Result<Option<(usize, VarId)>> {
        let bytes = self.arena.read(cells)?;
        for (index, raw) in bytes.chunks_exact(RECORD_STRIDE).enumerate() {
            if read_word(raw, 0) == field.0 {
                let var = VarId::from_raw(read_word(raw, 4))
                    .ok_or(StoreError::Internal("record holds handle 0"))?;
                return Ok(Some((index, var)));
            }
        }
        Ok(None)
    }

    /// Gives the record in `h` a table of its own if it shares one.
    fn unshare_record(&mut self, h: VarId) -> Result<()> {
        let bytes = match self.record_cells(h)? {
            Some(cells) if self.arena.is_shared(cells)? => self.arena.read(cells)?.to_vec(),
            _ => return Ok(()),
        };
        log::trace!("store: unsharing record {h:?}");
        let fresh = self.clone_table(bytes, RECORD_STRIDE, 4)?;
        let Slot::Record {
            cells: Some(cells), ..
        } = self.vars.get_mut(h)?
        else {
            return Err(StoreError::Internal("record changed shape while unsharing"));
        };
        let old = mem::replace(cells, fresh);
        self.arena.release_reference(old)?;
        Ok(())
    }

    pub fn record_init_null(&mut self, h: VarId) -> Result<()> {
        self.replace(
            h,
            Slot::Record {
                func: None,
                cells: None,
            },
        )
    }

    /// A record with no fields, which unlike the null record exists.
    pub fn record_init_empty(&mut self, h: VarId) -> Result<()> {
        self.recycle(h, ValueKind::Record, 0)
    }

    pub fn record_is_null(&self, h: VarId) -> Result<bool> {
        Ok(self.record_cells(h)?.is_none())
    }

    /// An empty record bound to `func`.
    pub fn function_record_init(&mut self, h: VarId, func: FunctionId) -> Result<()> {
        self.recycle(h, ValueKind::FunctionRecord, 0)?;
        match self.vars.get_mut(h)? {
            Slot::Record { func: bound, .. } => {
                *bound = Some(func);
                Ok(())
            }
            _ => Err(StoreError::Internal("recycled function record lost its shape")),
        }
    }

    pub fn function_id(&self, h: VarId) -> Result<FunctionId> {
        match self.vars.get(h)? {
            Slot::Record {
                func: Some(func), ..
            } => Ok(*func),
            other => Err(wrong_type(ValueKind::FunctionRecord, other)),
        }
    }

    pub fn record_len(&self, h: VarId) -> Result<usize> {
        match self.record_cells(h)? {
            Some(cells) => Ok(self.arena.get_buffer_size(cells)? / RECORD_STRIDE),
            None => Err(StoreError::NullRecord),
        }
    }

    /// Field ids in creation order.
    pub fn fields(&self, h: VarId) -> Result<Vec<FieldId>> {
        let cells = self.record_cells(h)?.ok_or(StoreError::NullRecord)?;
        Ok(self
            .arena
            .read(cells)?
            .chunks_exact(RECORD_STRIDE)
            .map(|raw| FieldId(read_word(raw, 0)))
            .collect())
    }

    /// Handle of a field for reading. Does not unshare the record.
    pub fn field_lookup(&self, h: VarId, field: FieldId) -> Result<Option<VarId>> {
        let cells = self.record_cells(h)?.ok_or(StoreError::NullRecord)?;
        Ok(self.find_field(cells, field)?.map(|(_, var)| var))
    }

    /// False for the null record.
    pub fn field_exists(&self, h: VarId, field: FieldId) -> Result<bool> {
        match self.record_cells(h)? {
            Some(cells) => Ok(self.find_field(cells, field)?.is_some()),
            None => Ok(false),
        }
    }

    /// Handle of a field for writing, creating it as an uninitialised
    /// variant if it is missing. With `exclusive` an existing field is a
    /// `FieldExists` fault. A null record becomes a record on first create.
    pub fn field_create(&mut self, h: VarId, field: FieldId, exclusive: bool) -> Result<VarId> {
        match self.vars.get_mut(h)? {
            Slot::Record {
                cells: cells @ None, ..
            } => *cells = Some(self.arena.allocate(0, 0)?),
            Slot::Record { .. } => {}
            other => return Err(wrong_type(ValueKind::Record, other)),
        }
        self.unshare_record(h)?;

        let cells = self.record_cells(h)?.ok_or(StoreError::NullRecord)?;
        if let Some((_, var)) = self.find_field(cells, field)? {
            if exclusive {
                return Err(StoreError::FieldExists {
                    name: self.names.display(field),
                });
            }
            return Ok(var);
        }

        let var = self.vars.heap_alloc(Slot::Uninit)?;
        let Slot::Record {
            cells: Some(cells), ..
        } = self.vars.get_mut(h)?
        else {
            return Err(StoreError::Internal("record lost its table"));
        };
        let len = self.arena.get_buffer_size(cells)?;
        self.arena.reshape(cells, len + RECORD_STRIDE, true)?;
        let bytes = self.arena.write(cells)?;
        write_word(bytes, len, field.0);
        write_word(bytes, len + 4, var.raw());
        Ok(var)
    }

    /// Handle of an existing field for writing.
    pub fn field_ref(&mut self, h: VarId, field: FieldId) -> Result<Option<VarId>> {
        self.unshare_record(h)?;
        self.field_lookup(h, field)
    }

    /// Removes a field and destroys its slot. Returns false if there was no
    /// such field.
    pub fn field_delete(&mut self, h: VarId, field: FieldId) -> Result<bool> {
        if !self.field_exists(h, field)? {
            self.record_cells(h)?.ok_or(StoreError::NullRecord)?;
            return Ok(false);
        }
        self.unshare_record(h)?;

        let cells = self.record_cells(h)?.ok_or(StoreError::NullRecord)?;
        let Some((index, var)) = self.find_field(cells, field)? else {
            return Err(StoreError::Internal("field vanished while unsharing"));
        };
        let Slot::Record {
            cells: Some(cells), ..
        } = self.vars.get_mut(h)?
        else {
            return Err(StoreError::Internal("record lost its table"));
        };
        let len = self.arena.get_buffer_size(cells)?;
        let at = index * RECORD_STRIDE;
        self.arena
            .write(cells)?
            .copy_within(at + RECORD_STRIDE..len, at);
        self.arena.reshape(cells, len - RECORD_STRIDE, true)?;

        let mut work = Teardown::default();
        work.heap.push(heap_index(var.raw())?);
        self.finish(work)?;
        Ok(true)
    }

    /// Handle of a field that must exist and hold `kind`. `Variant` accepts
    /// any kind. A missing field reports the closest existing name.
    pub fn field_typed(&self, h: VarId, field: FieldId, kind: ValueKind) -> Result<VarId> {
        let Some(var) = self.field_lookup(h, field)? else {
            return Err(StoreError::MissingField {
                name: self.names.display(field),
                suggestion: self.closest_field(h, field)?,
            });
        };
        let actual = self.kind(var)?;
        if kind != ValueKind::Variant && actual != kind {
            return Err(StoreError::FieldType {
                name: self.names.display(field),
                expected: kind,
                actual,
            });
        }
        Ok(var)
    }

    fn closest_field(&self, h: VarId, field: FieldId) -> Result<Option<Arc<str>>> {
        let wanted = self.names.display(field);
        let limit = (wanted.chars().count() / 3).max(2);
        Ok(self
            .fields(h)?
            .into_iter()
            .map(|id| self.names.display(id))
            .map(|name| (levenshtein(&wanted, &name), name))
            .filter(|(distance, _)| *distance <= limit)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, name)| name))
    }
}
