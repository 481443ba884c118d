use std::sync::Arc;

use arena::ArenaError;
use thiserror::Error;

use crate::ValueKind;

/// Failure reported by a native context destructor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct NativeFault(pub String);

impl NativeFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("dereferencing a non-existent object")]
    NullObject,
    #[error("member {name} is private")]
    PrivateMember { name: Arc<str> },
    #[error("member {name} cannot be deleted")]
    NotDeletable { name: Arc<str> },
    #[error("record has no field {name}{}", suggestion_suffix(.suggestion))]
    MissingField {
        name: Arc<str>,
        suggestion: Option<Arc<str>>,
    },
    #[error("field {name} is {actual}, expected {expected}")]
    FieldType {
        name: Arc<str>,
        expected: ValueKind,
        actual: ValueKind,
    },
    #[error("field {name} already exists")]
    FieldExists { name: Arc<str> },
    #[error("expected {expected}, found {actual}")]
    WrongType {
        expected: ValueKind,
        actual: ValueKind,
    },
    #[error("accessing a field of a null record")]
    NullRecord,
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("handle {0:#x} does not name a live variable")]
    InvalidHandle(u32),
    #[error("handle {0:#x} is not a heap handle")]
    NotHeapHandle(u32),
    #[error("native destructor failed: {0}")]
    Destructor(#[from] NativeFault),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl StoreError {
    /// Invariant violations inside the store, as opposed to faults caused by
    /// how a script used it.
    pub fn is_defect(&self) -> bool {
        matches!(self, StoreError::Arena(_) | StoreError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

fn suggestion_suffix(suggestion: &Option<Arc<str>>) -> String {
    match suggestion {
        Some(name) => format!(", did you mean {name}?"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_renders_suggestion() {
        let err = StoreError::MissingField {
            name: "NAEM".into(),
            suggestion: Some("NAME".into()),
        };
        assert_eq!(err.to_string(), "record has no field NAEM, did you mean NAME?");

        let err = StoreError::MissingField {
            name: "X".into(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "record has no field X");
    }

    #[test]
    fn test_defects_are_separated_from_usage_faults() {
        assert!(StoreError::Internal("x").is_defect());
        assert!(StoreError::Arena(ArenaError::FreedAllocation(3)).is_defect());
        assert!(!StoreError::NullObject.is_defect());
        assert!(!StoreError::Destructor(NativeFault::new("boom")).is_defect());
    }
}
