use crate::{CollectionId, ObjectId};

/// The release event of a slot in the table's arenas.
///
/// It's used to observe that every object and every collection is freed
/// at most once.
///
/// Release events are not emitted when the table is dropped; whatever
/// is still alive at that point goes with the arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseEvent<'a> {
    /// A collection was emptied and detached from `key`
    Collection { key: &'a str, id: CollectionId },
    /// An object was released by its owner
    Object { id: ObjectId },
}

/// Listener for release events.
///
/// The table is single-threaded, so the listener may hold `Rc` state.
pub type ReleaseListener = Box<dyn FnMut(ReleaseEvent<'_>)>;

impl<'a> ReleaseEvent<'a> {
    pub fn new_collection(key: &'a str, id: CollectionId) -> Self {
        Self::Collection { key, id }
    }

    pub fn new_object(id: ObjectId) -> Self {
        Self::Object { id }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, ReleaseEvent::Collection { .. })
    }
}
