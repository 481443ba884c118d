use std::fmt;

use arena::Allocation;

use crate::{FunctionId, ObjectId, blob::BlobId};

/// Type tag of a variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Uninitialised; an array of this kind holds anything.
    Variant,
    Boolean,
    Integer,
    Money,
    Float,
    DateTime,
    Table,
    Schema,
    String,
    Binary,
    Array,
    Record,
    FunctionRecord,
    Object,
    WeakObject,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Variant => "variant",
            ValueKind::Boolean => "boolean",
            ValueKind::Integer => "integer",
            ValueKind::Money => "money",
            ValueKind::Float => "float",
            ValueKind::DateTime => "datetime",
            ValueKind::Table => "table",
            ValueKind::Schema => "schema",
            ValueKind::String => "string",
            ValueKind::Binary => "binary",
            ValueKind::Array => "array",
            ValueKind::Record => "record",
            ValueKind::FunctionRecord => "function record",
            ValueKind::Object => "object",
            ValueKind::WeakObject => "weak object",
        }
    }

    /// Kinds whose payload lives in an arena block.
    pub fn is_backed(self) -> bool {
        matches!(
            self,
            ValueKind::String
                | ValueKind::Array
                | ValueKind::Record
                | ValueKind::FunctionRecord
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-point currency amount with four implied decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(i64);

impl Money {
    pub const SCALE: i64 = 10_000;

    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn from_units(units: i64) -> Option<Self> {
        units.checked_mul(Self::SCALE).map(Self)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        write!(f, "{sign}{}.{:04}", abs / scale, abs % scale)
    }
}

/// Contents of one variable slot.
///
/// Backed variants own exactly one counted reference to their arena block;
/// object variants own one reference to their object table entry. A `Slot`
/// is never dropped while holding either: it goes back through the store's
/// teardown path.
#[derive(Debug)]
pub(crate) enum Slot {
    Uninit,
    Boolean(bool),
    Integer(i64),
    Money(Money),
    Float(f64),
    DateTime(i64),
    Table(u32),
    Schema(u32),
    Str(Allocation),
    Binary(BlobId),
    Array {
        elem: ValueKind,
        backing: Allocation,
    },
    /// `cells == None` is the null record. A function record always has a
    /// `func`.
    Record {
        func: Option<FunctionId>,
        cells: Option<Allocation>,
    },
    /// `None` is the default (non-existent) object.
    Object(Option<ObjectId>),
    WeakObject(Option<ObjectId>),
}

impl Slot {
    pub(crate) fn kind(&self) -> ValueKind {
        match self {
            Slot::Uninit => ValueKind::Variant,
            Slot::Boolean(_) => ValueKind::Boolean,
            Slot::Integer(_) => ValueKind::Integer,
            Slot::Money(_) => ValueKind::Money,
            Slot::Float(_) => ValueKind::Float,
            Slot::DateTime(_) => ValueKind::DateTime,
            Slot::Table(_) => ValueKind::Table,
            Slot::Schema(_) => ValueKind::Schema,
            Slot::Str(_) => ValueKind::String,
            Slot::Binary(_) => ValueKind::Binary,
            Slot::Array { .. } => ValueKind::Array,
            Slot::Record { func: None, .. } => ValueKind::Record,
            Slot::Record { func: Some(_), .. } => ValueKind::FunctionRecord,
            Slot::Object(_) => ValueKind::Object,
            Slot::WeakObject(_) => ValueKind::WeakObject,
        }
    }

    /// Whether this slot can lead to an object.
    pub(crate) fn may_hold_objects(&self) -> bool {
        matches!(
            self,
            Slot::Array { .. }
                | Slot::Record { .. }
                | Slot::Object(Some(_))
                | Slot::WeakObject(Some(_))
        )
    }
}

// ── Backing layouts ───────────────────────────────────────────────────
//
// array:   [var: u32]*
// record:  [field: u32, var: u32]*
// object:  [field: u32, var: u32, flags: u32]*
//
// All words little-endian.

pub(crate) const ARRAY_STRIDE: usize = 4;
pub(crate) const RECORD_STRIDE: usize = 8;
pub(crate) const CELL_STRIDE: usize = 12;

#[inline]
pub(crate) fn read_word(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

#[inline]
pub(crate) fn write_word(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
