use crate::{HeapVec, ObjectId};

use super::RemovalStrategy;

/// Cursor walk that erases in place and repairs the cursor after each erase.
///
/// On a match the fallback position is the element before the match. When
/// the match is at the head there is no such element, so the scan restarts
/// from the head without advancing. The walk stops early once the
/// collection is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct IterRetry;

impl RemovalStrategy for IterRetry {
    fn name(&self) -> &'static str {
        "iter-retry"
    }

    fn erase(&self, items: &mut HeapVec<ObjectId>, target: ObjectId) -> usize {
        erase_matching(items, |x| x == target)
    }
}

fn erase_matching(items: &mut HeapVec<ObjectId>, mut matches: impl FnMut(ObjectId) -> bool) -> usize {
    let mut removed = 0;
    let mut cursor = 0;
    while cursor < items.len() {
        if matches(items[cursor]) {
            let restart = cursor == 0;
            let fallback = cursor.saturating_sub(1);
            items.remove(cursor);
            removed += 1;
            if items.is_empty() {
                break;
            }

            if restart {
                // the old second element now sits at the head, check it before advancing
                continue;
            }

            cursor = fallback;
        }

        cursor += 1;
    }

    removed
}
