use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

/// Interned, upper-cased column or member name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) u32);

impl FieldId {
    pub fn index(self) -> u32 {
        self.0
    }
}

struct ColumnNamesImpl {
    names: Vec<Arc<str>>,
    ids: HashMap<Arc<str>, FieldId, ahash::RandomState>,
}

impl ColumnNamesImpl {
    fn new() -> Self {
        Self {
            names: Vec::new(),
            ids: HashMap::default(),
        }
    }

    fn get_or_add(&mut self, normalized: String) -> FieldId {
        if let Some(&id) = self.ids.get(normalized.as_str()) {
            return id;
        }
        let id = FieldId(self.names.len() as u32);
        let interned = Arc::<str>::from(normalized);
        self.names.push(interned.clone());
        self.ids.insert(interned, id);
        id
    }
}

/// Shared name table mapping field names to small dense ids.
///
/// Clones share the same table, so several stores can agree on ids.
#[derive(Clone)]
pub struct ColumnNames(Arc<RwLock<ColumnNamesImpl>>);

impl ColumnNames {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(ColumnNamesImpl::new())))
    }

    /// Idempotent; `name` is compared case-insensitively.
    pub fn intern(&self, name: &str) -> FieldId {
        let normalized = name.to_uppercase();
        if let Some(&id) = self.0.read().ids.get(normalized.as_str()) {
            return id;
        }
        self.0.write().get_or_add(normalized)
    }

    pub fn lookup(&self, name: &str) -> Option<FieldId> {
        self.0.read().ids.get(name.to_uppercase().as_str()).copied()
    }

    pub fn resolve(&self, id: FieldId) -> Option<Arc<str>> {
        self.0.read().names.get(id.0 as usize).cloned()
    }

    /// Name for diagnostics; never fails.
    pub(crate) fn display(&self, id: FieldId) -> Arc<str> {
        self.resolve(id)
            .unwrap_or_else(|| Arc::from(format!("#{}", id.0)))
    }

    pub fn len(&self) -> usize {
        self.0.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles share one table.
    pub fn same_table(&self, other: &ColumnNames) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ColumnNames {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnNames").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent_and_case_insensitive() {
        let names = ColumnNames::new();
        let a = names.intern("name");
        let b = names.intern("NAME");
        let c = names.intern("Name");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(names.len(), 1);
        assert_eq!(&*names.resolve(a).unwrap(), "NAME");
    }

    #[test]
    fn test_ids_are_dense() {
        let names = ColumnNames::new();
        let ids: Vec<_> = ["a", "b", "c"].iter().map(|n| names.intern(n)).collect();
        assert_eq!(ids.iter().map(|id| id.index()).collect::<Vec<_>>(), [0, 1, 2]);
    }

    #[test]
    fn test_lookup_does_not_insert() {
        let names = ColumnNames::new();
        assert!(names.lookup("age").is_none());
        assert!(names.is_empty());
        let id = names.intern("age");
        assert_eq!(names.lookup("Age"), Some(id));
    }

    #[test]
    fn test_clones_share_the_table() {
        let names = ColumnNames::new();
        let other = names.clone();
        let id = other.intern("x");
        assert_eq!(names.lookup("X"), Some(id));
        assert!(names.same_table(&other));
        assert!(!names.same_table(&ColumnNames::new()));
    }
}
