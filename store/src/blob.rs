//! Reference-counted binary blobs.
//!
//! Blobs are owned outside the arena; slots only hold a counted [`BlobId`].

use crate::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(u32);

#[derive(Debug)]
struct BlobEntry {
    data: Box<[u8]>,
    refs: u32,
}

#[derive(Debug, Default)]
pub(crate) struct BlobTable {
    entries: Vec<Option<BlobEntry>>,
    free: Vec<u32>,
    live: usize,
}

impl BlobTable {
    pub(crate) fn insert(&mut self, data: &[u8]) -> BlobId {
        let entry = BlobEntry {
            data: data.into(),
            refs: 1,
        };
        self.live += 1;
        if let Some(index) = self.free.pop() {
            self.entries[index as usize] = Some(entry);
            return BlobId(index);
        }
        self.entries.push(Some(entry));
        BlobId(self.entries.len() as u32 - 1)
    }

    fn entry_mut(&mut self, id: BlobId) -> Result<&mut BlobEntry> {
        self.entries
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(StoreError::Internal("stale blob id"))
    }

    pub(crate) fn retain(&mut self, id: BlobId) -> Result<BlobId> {
        let entry = self.entry_mut(id)?;
        entry.refs = entry
            .refs
            .checked_add(1)
            .ok_or(StoreError::Internal("blob reference count overflow"))?;
        Ok(id)
    }

    pub(crate) fn release(&mut self, id: BlobId) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.refs -= 1;
        if entry.refs == 0 {
            self.entries[id.0 as usize] = None;
            self.free.push(id.0);
            self.live -= 1;
        }
        Ok(())
    }

    pub(crate) fn get(&self, id: BlobId) -> Result<&[u8]> {
        self.entries
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .map(|entry| &*entry.data)
            .ok_or(StoreError::Internal("stale blob id"))
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_lives_until_last_release() {
        let mut blobs = BlobTable::default();
        let id = blobs.insert(b"payload");
        let again = blobs.retain(id).unwrap();
        blobs.release(id).unwrap();
        assert_eq!(blobs.get(again).unwrap(), b"payload");
        blobs.release(again).unwrap();
        assert!(blobs.get(id).is_err(), "blob must be gone");
        assert_eq!(blobs.live(), 0);
    }

    #[test]
    fn test_ids_are_recycled() {
        let mut blobs = BlobTable::default();
        let a = blobs.insert(b"a");
        blobs.release(a).unwrap();
        let b = blobs.insert(b"b");
        assert_eq!(a, b);
        assert_eq!(blobs.get(b).unwrap(), b"b");
    }
}
