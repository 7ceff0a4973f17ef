use crate::{HeapVec, ObjectId, Result, Table};

use super::{IterRetry, PartitionErase, RemovalStrategy, RemoveOutcome};

/// Wraps a strategy so the removal also releases the target object.
///
/// The caller hands its ownership of the target over with the call. The
/// object is released once the collection no longer holds it, and
/// [`RemoveOutcome::collection_released`] tells the caller whether the
/// collection went with it. A target that was not in the collection is
/// left alone.
#[derive(Debug, Clone, Copy)]
pub struct Owning<S> {
    inner: S,
    name: &'static str,
}

impl Owning<IterRetry> {
    pub fn iter_retry() -> Self {
        Self::with_name(IterRetry, "owning-iter-retry")
    }
}

impl Owning<PartitionErase> {
    pub fn partition_erase() -> Self {
        Self::with_name(PartitionErase, "owning-partition-erase")
    }
}

impl<S: RemovalStrategy> Owning<S> {
    pub fn with_name(inner: S, name: &'static str) -> Self {
        Self { inner, name }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: RemovalStrategy> RemovalStrategy for Owning<S> {
    fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    fn erase(&self, items: &mut HeapVec<ObjectId>, target: ObjectId) -> usize {
        self.inner.erase(items, target)
    }

    fn remove(&self, table: &mut Table, key: &str, target: ObjectId) -> Result<RemoveOutcome> {
        let mut outcome = self.inner.remove(table, key, target)?;
        if outcome.removed > 0 {
            table.release_object(target)?;
            outcome.object_released = true;
        }

        Ok(outcome)
    }
}
