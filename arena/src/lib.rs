//! Growable byte arena for variable-sized, reference-counted blocks.
//!
//! The arena knows nothing about the values stored in it. Consumers get an
//! opaque [`Allocation`] per block and read or write its bytes through short
//! lived borrows; any call that may allocate needs `&mut Arena`, so a view can
//! never outlive the next allocation.

mod arena;
mod size_class;

pub use arena::*;
pub use size_class::{CLASS_COUNT, EXP_CLASSES, LINEAR_CLASSES, LINEAR_STEP, class_of};
