//! Removal strategies.
//!
//! Every strategy removes all occurrences of one object handle from the
//! collection bound to a key and, when that empties the collection, detaches
//! the key and releases the collection. They differ in how the erase is done
//! and in whether the object itself is released.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::{HarnessError, HeapVec, ObjectId, Result, Table};

mod filter;
mod iter_retry;
mod owning;
mod partition;

pub use filter::FilterRebuild;
pub use iter_retry::IterRetry;
pub use owning::Owning;
pub use partition::PartitionErase;

/// What a single removal did to the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// Occurrences of the target erased from the collection
    pub removed: usize,
    /// The collection reached zero length and was released. The caller
    /// must not use its handle afterwards.
    pub collection_released: bool,
    /// The target object was released
    pub object_released: bool,
}

impl RemoveOutcome {
    pub fn is_noop(&self) -> bool {
        self.removed == 0
    }
}

pub trait RemovalStrategy {
    fn name(&self) -> &'static str;

    /// Erase every occurrence of `target` from `items` and return how many
    /// were erased. The relative order of the other items is kept.
    fn erase(&self, items: &mut HeapVec<ObjectId>, target: ObjectId) -> usize;

    /// Remove `target` from the collection under `key`.
    ///
    /// `key` must be present and bound to a live collection, otherwise
    /// [`HarnessError::KeyNotFound`] or [`HarnessError::CollectionReleased`]
    /// is returned. A target that is not in the collection is a no-op.
    fn remove(&self, table: &mut Table, key: &str, target: ObjectId) -> Result<RemoveOutcome> {
        let (id, collection) = table.lookup_mut(key)?;
        let removed = self.erase(collection.items_mut(), target);
        let emptied = removed > 0 && collection.is_empty();
        if emptied {
            table.release_collection(key, id)?;
        }

        Ok(RemoveOutcome {
            removed,
            collection_released: emptied,
            object_released: false,
        })
    }
}

impl<S: RemovalStrategy + ?Sized> RemovalStrategy for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn erase(&self, items: &mut HeapVec<ObjectId>, target: ObjectId) -> usize {
        (**self).erase(items, target)
    }

    fn remove(&self, table: &mut Table, key: &str, target: ObjectId) -> Result<RemoveOutcome> {
        (**self).remove(table, key, target)
    }
}

/// The strategy whose results every other strategy is compared against
pub fn reference_strategy() -> FilterRebuild {
    FilterRebuild
}

/// Every strategy, reference first
pub fn all_strategies() -> HeapVec<Box<dyn RemovalStrategy>> {
    vec![
        Box::new(FilterRebuild),
        Box::new(IterRetry),
        Box::new(PartitionErase),
        Box::new(Owning::iter_retry()),
        Box::new(Owning::partition_erase()),
    ]
}

pub fn strategy_by_name(name: &str) -> Option<Box<dyn RemovalStrategy>> {
    all_strategies().into_iter().find(|x| x.name() == name)
}

/// Run one removal with the strategy boundary in place.
///
/// Errors and panics raised inside the strategy come back as
/// [`HarnessError::StrategyFailure`] naming the strategy. The table may be
/// left in any state after a failure, so the run must stop.
pub fn guarded_remove<S: RemovalStrategy + ?Sized>(
    strategy: &S,
    table: &mut Table,
    key: &str,
    target: ObjectId,
) -> Result<RemoveOutcome> {
    let name = strategy.name();
    match catch_unwind(AssertUnwindSafe(|| strategy.remove(table, key, target))) {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(err)) => {
            log::error!("{} failed on key {:?}: {}", name, key, err);
            Err(HarnessError::strategy_failure(name, err.to_string()))
        }
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "panic with non-string payload".to_string()
            };
            log::error!("{} panicked on key {:?}: {}", name, key, message);
            Err(HarnessError::strategy_failure(name, message))
        }
    }
}

#[cfg(test)]
mod test {
    use arbitrary::{Arbitrary, Unstructured};
    use ctor::ctor;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::CollectionId;

    /// Table with one key bound to a collection laid out by `pattern`:
    /// each byte picks one of `distinct` objects.
    pub(crate) fn build(pattern: &[u8], distinct: usize) -> (Table, CollectionId, HeapVec<ObjectId>) {
        let mut table = Table::new();
        let objects: HeapVec<ObjectId> = (0..distinct.max(1)).map(|_| table.alloc_object()).collect();
        let items: HeapVec<ObjectId> = pattern
            .iter()
            .map(|&x| objects[x as usize % objects.len()])
            .collect();
        let id = table.alloc_collection(items);
        table.bind("key", id);
        (table, id, objects)
    }

    struct Panicking;

    impl RemovalStrategy for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn erase(&self, _: &mut HeapVec<ObjectId>, _: ObjectId) -> usize {
            panic!("erase blew up")
        }
    }

    /// Empties the collection but reports nothing erased
    struct Silent;

    impl RemovalStrategy for Silent {
        fn name(&self) -> &'static str {
            "silent"
        }

        fn erase(&self, items: &mut HeapVec<ObjectId>, _: ObjectId) -> usize {
            items.clear();
            0
        }
    }

    #[test]
    fn silently_emptied_collection_fails_validation() {
        let (mut table, _, objects) = build(&[0, 0], 1);
        let outcome = Silent.remove(&mut table, "key", objects[0]).unwrap();
        assert!(outcome.is_noop());
        assert!(table.contains_key("key"));
        assert!(table.validate().is_err());
    }

    #[test]
    fn names_are_unique() {
        let strategies = all_strategies();
        for (i, a) in strategies.iter().enumerate() {
            for b in strategies[i + 1..].iter() {
                assert_ne!(a.name(), b.name());
            }
            assert_eq!(strategy_by_name(a.name()).unwrap().name(), a.name());
        }
        assert!(strategy_by_name("nope").is_none());
    }

    #[test]
    fn every_strategy_removes_all_occurrences() {
        for strategy in all_strategies() {
            let (mut table, id, objects) = build(&[0, 1, 0, 0, 2, 0], 3);
            let outcome = strategy.remove(&mut table, "key", objects[0]).unwrap();
            assert_eq!(outcome.removed, 4, "{}", strategy.name());
            assert!(!outcome.collection_released);
            assert_eq!(
                table.collection(id).unwrap().items(),
                &[objects[1], objects[2]],
                "{}",
                strategy.name()
            );
            table.check();
        }
    }

    #[test]
    fn every_strategy_releases_emptied_collection() {
        for strategy in all_strategies() {
            let (mut table, id, objects) = build(&[0, 0, 0], 1);
            let outcome = strategy.remove(&mut table, "key", objects[0]).unwrap();
            assert_eq!(outcome.removed, 3);
            assert!(outcome.collection_released, "{}", strategy.name());
            assert!(!table.contains_key("key"));
            assert!(!table.is_collection_live(id));
            table.check();
        }
    }

    #[test]
    fn absent_target_is_noop() {
        for strategy in all_strategies() {
            let (mut table, id, _) = build(&[0, 1], 2);
            let stranger = table.alloc_object();
            let before = table.collection(id).unwrap().clone();
            let outcome = strategy.remove(&mut table, "key", stranger).unwrap();
            assert!(outcome.is_noop());
            assert_eq!(outcome, RemoveOutcome::default(), "{}", strategy.name());
            assert_eq!(table.collection(id).unwrap(), &before);
            assert!(table.is_object_live(stranger));
        }
    }

    #[test]
    fn empty_collection_is_not_released_by_noop() {
        for strategy in all_strategies() {
            let (mut table, id, objects) = build(&[], 1);
            let outcome = strategy.remove(&mut table, "key", objects[0]).unwrap();
            assert!(outcome.is_noop());
            assert!(table.is_collection_live(id));
            assert!(table.contains_key("key"));
        }
    }

    #[test]
    fn missing_key() {
        for strategy in all_strategies() {
            let (mut table, _, objects) = build(&[0], 1);
            assert_eq!(
                strategy.remove(&mut table, "other", objects[0]).unwrap_err(),
                HarnessError::KeyNotFound {
                    key: "other".into()
                }
            );
        }
    }

    #[test]
    fn aliased_key_after_release() {
        for strategy in all_strategies() {
            let (mut table, id, objects) = build(&[0], 1);
            table.bind("alias", id);
            strategy.remove(&mut table, "key", objects[0]).unwrap();
            assert!(table.contains_key("alias"));
            assert_eq!(
                strategy.remove(&mut table, "alias", objects[0]).unwrap_err(),
                HarnessError::CollectionReleased {
                    key: "alias".into()
                }
            );
        }
    }

    #[test]
    fn guarded_remove_catches_panic() {
        let (mut table, _, objects) = build(&[0], 1);
        let err = guarded_remove(&Panicking, &mut table, "key", objects[0]).unwrap_err();
        assert_eq!(
            err,
            HarnessError::StrategyFailure {
                strategy: "panicking",
                message: "erase blew up".into()
            }
        );
        assert_eq!(err.strategy(), Some("panicking"));
    }

    #[test]
    fn guarded_remove_converts_errors() {
        let (mut table, _, objects) = build(&[0], 1);
        let err = guarded_remove(&IterRetry, &mut table, "missing", objects[0]).unwrap_err();
        assert_eq!(err.strategy(), Some("iter-retry"));
    }

    #[derive(Debug, Arbitrary)]
    struct Case {
        pattern: Vec<u8>,
        distinct: u8,
        target: u8,
    }

    fn fuzz(cases: Vec<Case>) {
        let reference = reference_strategy();
        for case in cases {
            let distinct = case.distinct as usize % 5 + 1;
            let target = case.target as usize % distinct;
            let (mut expected_table, expected_id, expected_objects) = build(&case.pattern, distinct);
            let expected = reference
                .remove(&mut expected_table, "key", expected_objects[target])
                .unwrap();
            let expected_items = expected_table
                .collection(expected_id)
                .map(|x| x.items().to_vec());
            for strategy in all_strategies() {
                let (mut table, id, objects) = build(&case.pattern, distinct);
                let outcome = strategy.remove(&mut table, "key", objects[target]).unwrap();
                assert_eq!(outcome.removed, expected.removed, "{}", strategy.name());
                assert_eq!(outcome.collection_released, expected.collection_released);
                assert_eq!(
                    table.collection(id).map(|x| x.items().to_vec()),
                    expected_items,
                    "{}",
                    strategy.name()
                );
                table.check();
            }
        }
    }

    #[test]
    fn fuzz_head_runs() {
        fuzz(vec![
            Case {
                pattern: vec![0, 0, 1, 0],
                distinct: 1,
                target: 0,
            },
            Case {
                pattern: vec![1, 0, 0, 0, 0],
                distinct: 1,
                target: 1,
            },
            Case {
                pattern: vec![0, 1, 1, 0, 1, 1],
                distinct: 1,
                target: 1,
            },
        ])
    }

    #[test]
    fn fuzz_empty() {
        fuzz(vec![])
    }

    #[test]
    fn fuzz_random() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(123);
        let data: HeapVec<u8> = (0..100_000).map(|_| rng.gen()).collect();
        let mut gen = Unstructured::new(&data);
        let cases: [Case; 200] = gen.arbitrary().unwrap();
        fuzz(cases.into_iter().collect());
    }

    #[ctor]
    fn init_color_backtrace() {
        color_backtrace::install();
    }
}
