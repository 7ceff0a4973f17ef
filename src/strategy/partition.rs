use crate::{HeapVec, ObjectId};

use super::RemovalStrategy;

/// One pass moves every kept handle in front of every matching handle,
/// then the matching suffix is cut off in one go.
///
/// Kept handles keep their relative order.
#[derive(Debug, Default, Clone, Copy)]
pub struct PartitionErase;

impl RemovalStrategy for PartitionErase {
    fn name(&self) -> &'static str {
        "partition-erase"
    }

    fn erase(&self, items: &mut HeapVec<ObjectId>, target: ObjectId) -> usize {
        let kept = partition(items, |&x| x != target);
        let removed = items.len() - kept;
        items.truncate(kept);
        removed
    }
}

/// Stable for the elements satisfying `keep`. Returns the partition point.
fn partition<T>(items: &mut [T], mut keep: impl FnMut(&T) -> bool) -> usize {
    let mut write = 0;
    for read in 0..items.len() {
        if keep(&items[read]) {
            items.swap(write, read);
            write += 1;
        }
    }

    write
}
