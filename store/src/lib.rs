//! Value store for a scripting VM.
//!
//! A [`Store`] owns every variable an interpreter instance can address: a
//! stack of frames, a heap of free-list recycled slots and blocks of
//! globals, all named by [`VarId`] handles. Strings, arrays and records keep
//! their payload in a reference-counted [`arena`] block shared on copy and
//! separated on write. Objects have identity, strong and weak references,
//! native contexts and a mark-sweep collector for cycles.

mod array;
mod blob;
mod collector;
mod context;
mod error;
mod handle;
mod interning;
mod object;
mod record;
mod settings;
mod store;
mod transfer;
mod value;
mod vars;

pub use arena::{ArenaError, ArenaSettings, ArenaStats, CoalescePolicy};
pub use blob::BlobId;
pub use collector::{CollectionStats, CollectorPhase};
pub use context::{ContextKind, Destructor};
pub use error::{NativeFault, Result, StoreError};
pub use handle::{FunctionId, HEAP_BASE, MAX_GLOBALS, MAX_HEAP, ObjectId, STACK_BASE, STACK_ORIGIN, VarId};
pub use interning::{ColumnNames, FieldId};
pub use object::{Access, CellFlags, Privilege};
pub use settings::StoreSettings;
pub use store::{SavedBase, Store, StoreStats};
pub use value::{Money, ValueKind};
