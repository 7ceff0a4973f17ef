use crate::{HeapVec, ObjectId};

use super::RemovalStrategy;

/// Builds a fresh sequence without the target.
///
/// Allocates on every call, but is obviously correct, so it serves as the
/// reference the other strategies are compared against.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterRebuild;

impl RemovalStrategy for FilterRebuild {
    fn name(&self) -> &'static str {
        "filter-rebuild"
    }

    fn erase(&self, items: &mut HeapVec<ObjectId>, target: ObjectId) -> usize {
        let rebuilt: HeapVec<ObjectId> = items.iter().copied().filter(|&x| x != target).collect();
        let removed = items.len() - rebuilt.len();
        *items = rebuilt;
        removed
    }
}
