//! Native extension contexts attached to objects.
//!
//! Host code registers a context kind once per store and can then hang one
//! value of that kind off any object, together with a destructor that runs
//! when the object goes away. Destructors never run in the middle of a
//! teardown: they are queued and invoked once the store is consistent again.

use std::{any::Any, collections::HashMap, fmt, mem, sync::Arc};

use crate::{NativeFault, Result, Store, StoreError, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKind(pub(crate) u32);

impl ContextKind {
    /// Reserved for the marshaller used when an object crosses a
    /// serialization boundary.
    pub const MARSHALLER: ContextKind = ContextKind(0);

    pub fn index(self) -> u32 {
        self.0
    }
}

pub type Destructor =
    Box<dyn FnOnce(Box<dyn Any>) -> std::result::Result<(), NativeFault>>;

pub(crate) struct ContextEntry {
    pub(crate) kind: ContextKind,
    pub(crate) data: Box<dyn Any>,
    pub(crate) destructor: Option<Destructor>,
}

impl ContextEntry {
    pub(crate) fn run(self) -> std::result::Result<(), NativeFault> {
        match self.destructor {
            Some(destructor) => destructor(self.data),
            None => Ok(()),
        }
    }

    pub(crate) fn has_destructor(&self) -> bool {
        self.destructor.is_some()
    }
}

impl fmt::Debug for ContextEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextEntry")
            .field("kind", &self.kind)
            .field("destructor", &self.destructor.is_some())
            .finish()
    }
}

/// Wraps a typed destructor so it can be stored next to a `Box<dyn Any>`.
pub(crate) fn erase<T: Any>(
    destructor: impl FnOnce(T) -> std::result::Result<(), NativeFault> + 'static,
) -> Destructor {
    Box::new(move |data: Box<dyn Any>| match data.downcast::<T>() {
        Ok(value) => destructor(*value),
        Err(_) => Err(NativeFault::new("context payload has the wrong type")),
    })
}

#[derive(Debug)]
pub(crate) struct ContextRegistry {
    names: Vec<Arc<str>>,
    kinds: HashMap<Arc<str>, ContextKind, ahash::RandomState>,
}

impl ContextRegistry {
    pub(crate) fn new() -> Self {
        let mut registry = Self {
            names: Vec::new(),
            kinds: HashMap::default(),
        };
        let marshaller = registry.register("marshaller");
        debug_assert_eq!(marshaller, ContextKind::MARSHALLER);
        registry
    }

    /// Idempotent per name.
    pub(crate) fn register(&mut self, name: &str) -> ContextKind {
        if let Some(&kind) = self.kinds.get(name) {
            return kind;
        }
        let kind = ContextKind(self.names.len() as u32);
        let name: Arc<str> = Arc::from(name);
        self.names.push(name.clone());
        self.kinds.insert(name, kind);
        kind
    }

    pub(crate) fn is_registered(&self, kind: ContextKind) -> bool {
        (kind.0 as usize) < self.names.len()
    }

    pub(crate) fn name(&self, kind: ContextKind) -> Option<&str> {
        self.names.get(kind.0 as usize).map(|name| &**name)
    }
}

impl Store {
    /// Kind id for `name`, allocating one on first use.
    pub fn register_context_kind(&mut self, name: &str) -> ContextKind {
        self.contexts.register(name)
    }

    pub fn context_kind_name(&self, kind: ContextKind) -> Option<&str> {
        self.contexts.name(kind)
    }

    /// Attaches `data` to the object in `h`. `destructor` runs exactly once,
    /// when the context is detached or replaced or the object is destroyed.
    pub fn attach_context<T: Any>(
        &mut self,
        h: VarId,
        kind: ContextKind,
        data: T,
        destructor: impl FnOnce(T) -> std::result::Result<(), NativeFault> + 'static,
    ) -> Result<()> {
        if !self.contexts.is_registered(kind) {
            return Err(StoreError::Internal("unregistered context kind"));
        }
        let id = self.live_object(h)?;
        let entry = ContextEntry {
            kind,
            data: Box::new(data),
            destructor: Some(erase(destructor)),
        };
        let contexts = &mut self.objects.backing_mut(id)?.contexts;
        let replaced = match contexts.iter_mut().find(|e| e.kind == kind) {
            Some(existing) => Some(mem::replace(existing, entry)),
            None => {
                contexts.push(entry);
                None
            }
        };
        if let Some(old) = replaced {
            self.run_destructors(vec![old])?;
        }
        Ok(())
    }

    pub fn context<T: Any>(&self, h: VarId, kind: ContextKind) -> Result<Option<&T>> {
        let id = self.live_object(h)?;
        Ok(self
            .objects
            .backing(id)?
            .contexts
            .iter()
            .find(|entry| entry.kind == kind)
            .and_then(|entry| entry.data.downcast_ref::<T>()))
    }

    pub fn context_mut<T: Any>(&mut self, h: VarId, kind: ContextKind) -> Result<Option<&mut T>> {
        let id = self.live_object(h)?;
        Ok(self
            .objects
            .backing_mut(id)?
            .contexts
            .iter_mut()
            .find(|entry| entry.kind == kind)
            .and_then(|entry| entry.data.downcast_mut::<T>()))
    }

    /// Removes a context and runs its destructor. Returns false if the
    /// object had none of that kind.
    pub fn detach_context(&mut self, h: VarId, kind: ContextKind) -> Result<bool> {
        let id = self.live_object(h)?;
        let contexts = &mut self.objects.backing_mut(id)?.contexts;
        let Some(pos) = contexts.iter().position(|entry| entry.kind == kind) else {
            return Ok(false);
        };
        let entry = contexts.remove(pos);
        self.run_destructors(vec![entry])?;
        Ok(true)
    }
}
