/// Number of linear size classes, each [`LINEAR_STEP`] bytes wide.
pub const LINEAR_CLASSES: usize = 16;
/// Width of one linear class in bytes.
pub const LINEAR_STEP: usize = 16;
/// Number of doubling classes above the linear range.
pub const EXP_CLASSES: usize = 20;
/// Total number of free-list heads.
pub const CLASS_COUNT: usize = LINEAR_CLASSES + EXP_CLASSES;

const LINEAR_LIMIT: usize = LINEAR_CLASSES * LINEAR_STEP;

/// Maps a block capacity to its free-list class.
///
/// Classes only speed up lookup: a class may hold blocks smaller than a
/// request that maps to it, so callers still compare capacities.
#[inline]
pub fn class_of(capacity: usize) -> usize {
    if capacity < LINEAR_LIMIT {
        return capacity / LINEAR_STEP;
    }
    let log = (usize::BITS - 1 - capacity.leading_zeros()) as usize;
    let idx = log - LINEAR_LIMIT.trailing_zeros() as usize;
    (LINEAR_CLASSES + idx).min(CLASS_COUNT - 1)
}
