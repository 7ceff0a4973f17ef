use core::fmt::Debug;
use std::collections::HashMap;

use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use thunderdome::Arena;
use thunderdome::Index as RawArenaIndex;

use crate::{HarnessError, HeapVec, ReleaseEvent, ReleaseListener, Result};

/// Handle of an [`Object`] in the table's object arena.
///
/// Identity is the handle, not the payload. Handles are generational, so a
/// handle to a released object never resolves again, even after its slot
/// is reused.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ObjectId(RawArenaIndex);

/// Handle of a [`Collection`] in the table's collection arena.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct CollectionId(RawArenaIndex);

impl ObjectId {
    #[inline]
    pub fn to_bits(self) -> u64 {
        self.0.to_bits()
    }
}

impl CollectionId {
    #[inline]
    pub fn to_bits(self) -> u64 {
        self.0.to_bits()
    }
}

/// Placeholder payload. Only its address in the arena matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Object;

/// An ordered sequence of object handles. Duplicates are allowed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Collection {
    items: HeapVec<ObjectId>,
}

impl Collection {
    pub fn new(items: HeapVec<ObjectId>) -> Self {
        Self { items }
    }

    #[inline(always)]
    pub fn items(&self) -> &[ObjectId] {
        &self.items
    }

    #[inline(always)]
    pub(crate) fn items_mut(&mut self) -> &mut HeapVec<ObjectId> {
        &mut self.items
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<ObjectId> {
        self.items.get(index).copied()
    }

    /// How many times `object` occurs in this collection
    pub fn count(&self, object: ObjectId) -> usize {
        self.items.iter().filter(|&&x| x == object).count()
    }

    /// Multiplicity of every handle in this collection
    pub fn multiplicities(&self) -> HashMap<ObjectId, usize> {
        self.items.iter().copied().counts()
    }
}

/// Sorted `(key, contents)` pairs; `None` marks a key bound to a released collection.
pub type TableSnapshot = HeapVec<(String, Option<HeapVec<u64>>)>;

/// The key → collection table under test.
///
/// Objects and collections live in arenas owned by the table. A key holds a
/// [`CollectionId`]; several keys may hold the same one (aliasing from the
/// generation phase). When a removal empties a collection, the key used for
/// the removal is erased and the collection is released. Other keys aliasing
/// it keep a stale handle that no longer resolves.
pub struct Table {
    objects: Arena<Object>,
    collections: Arena<Collection>,
    bindings: FxHashMap<String, CollectionId>,
    allocated_objects: usize,
    allocated_collections: usize,
    released_objects: usize,
    released_collections: usize,
    /// Released collection → the key it was released through
    released_through: FxHashMap<CollectionId, String>,
    /// Collections handed out non-empty for mutation
    mutated: FxHashSet<CollectionId>,
    release_listener: Option<ReleaseListener>,
}

impl Debug for Table {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Table")
            .field("bindings", &self.bindings)
            .field("live_objects", &self.objects.len())
            .field("live_collections", &self.collections.len())
            .field("released_objects", &self.released_objects)
            .field("released_collections", &self.released_collections)
            .finish()
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Self {
            objects: Arena::new(),
            collections: Arena::new(),
            bindings: FxHashMap::default(),
            allocated_objects: 0,
            allocated_collections: 0,
            released_objects: 0,
            released_collections: 0,
            released_through: FxHashMap::default(),
            mutated: FxHashSet::default(),
            release_listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: Option<ReleaseListener>) {
        self.release_listener = listener;
    }

    pub fn alloc_object(&mut self) -> ObjectId {
        self.allocated_objects += 1;
        ObjectId(self.objects.insert(Object))
    }

    pub fn alloc_collection(&mut self, items: impl IntoIterator<Item = ObjectId>) -> CollectionId {
        self.allocated_collections += 1;
        CollectionId(self.collections.insert(Collection::new(items.into_iter().collect())))
    }

    /// Bind `key` to `collection`. Last write wins; the previous binding is returned.
    pub fn bind(&mut self, key: impl Into<String>, collection: CollectionId) -> Option<CollectionId> {
        self.bindings.insert(key.into(), collection)
    }

    /// The handle bound to `key`, live or not.
    pub fn binding(&self, key: &str) -> Result<CollectionId> {
        self.bindings
            .get(key)
            .copied()
            .ok_or_else(|| HarnessError::KeyNotFound {
                key: key.to_string(),
            })
    }

    /// The live collection bound to `key`.
    pub fn lookup(&self, key: &str) -> Result<(CollectionId, &Collection)> {
        let id = self.binding(key)?;
        match self.collections.get(id.0) {
            Some(collection) => Ok((id, collection)),
            None => Err(HarnessError::CollectionReleased {
                key: key.to_string(),
            }),
        }
    }

    pub(crate) fn lookup_mut(&mut self, key: &str) -> Result<(CollectionId, &mut Collection)> {
        let id = self.binding(key)?;
        match self.collections.get_mut(id.0) {
            Some(collection) => {
                if !collection.is_empty() {
                    self.mutated.insert(id);
                }
                Ok((id, collection))
            }
            None => Err(HarnessError::CollectionReleased {
                key: key.to_string(),
            }),
        }
    }

    #[inline]
    pub fn collection(&self, id: CollectionId) -> Option<&Collection> {
        self.collections.get(id.0)
    }

    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.bindings.contains_key(key)
    }

    #[inline]
    pub fn is_object_live(&self, id: ObjectId) -> bool {
        self.objects.contains(id.0)
    }

    #[inline]
    pub fn is_collection_live(&self, id: CollectionId) -> bool {
        self.collections.contains(id.0)
    }

    /// Number of keys in the table
    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(|x| x.as_str())
    }

    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn live_collections(&self) -> usize {
        self.collections.len()
    }

    pub fn released_objects(&self) -> usize {
        self.released_objects
    }

    pub fn released_collections(&self) -> usize {
        self.released_collections
    }

    /// Keys whose collection was released through an aliasing key
    pub fn stale_bindings(&self) -> usize {
        self.bindings
            .values()
            .filter(|id| !self.collections.contains(id.0))
            .count()
    }

    /// Detach `key` and release `collection`.
    ///
    /// `key` must be bound to `collection`. The binding is erased before the
    /// slot is freed, so the table never maps a key to a freed collection.
    /// On error the table is left untouched. The caller's handle is consumed.
    pub fn release_collection(&mut self, key: &str, collection: CollectionId) -> Result<()> {
        if self.binding(key)? != collection {
            return Err(HarnessError::BindingMismatch {
                key: key.to_string(),
            });
        }
        if !self.collections.contains(collection.0) {
            return Err(HarnessError::DoubleRelease { what: "collection" });
        }

        self.bindings.remove(key);
        self.collections.remove(collection.0);
        self.mutated.remove(&collection);
        self.released_through.insert(collection, key.to_string());
        self.released_collections += 1;
        log::info!("collection deleted (key {:?})", key);
        if let Some(listener) = self.release_listener.as_mut() {
            listener(ReleaseEvent::new_collection(key, collection));
        }

        Ok(())
    }

    pub fn release_object(&mut self, object: ObjectId) -> Result<()> {
        if self.objects.remove(object.0).is_none() {
            return Err(HarnessError::DoubleRelease { what: "object" });
        }

        self.released_objects += 1;
        if let Some(listener) = self.release_listener.as_mut() {
            listener(ReleaseEvent::new_object(object));
        }

        Ok(())
    }

    /// Sorted view of every binding and the contents it resolves to
    pub fn snapshot(&self) -> TableSnapshot {
        self.bindings
            .iter()
            .map(|(key, id)| {
                let items = self
                    .collections
                    .get(id.0)
                    .map(|c| c.items().iter().map(|x| x.to_bits()).collect());
                (key.clone(), items)
            })
            .sorted_unstable_by(|a, b| a.0.cmp(&b.0))
            .collect()
    }

    /// Check the table's internal consistency, describing the first problem found.
    pub fn validate(&self) -> core::result::Result<(), String> {
        if self.objects.len() + self.released_objects != self.allocated_objects {
            return Err(format!(
                "object accounting: {} live + {} released != {} allocated",
                self.objects.len(),
                self.released_objects,
                self.allocated_objects
            ));
        }

        if self.collections.len() + self.released_collections != self.allocated_collections {
            return Err(format!(
                "collection accounting: {} live + {} released != {} allocated",
                self.collections.len(),
                self.released_collections,
                self.allocated_collections
            ));
        }

        if self.released_through.len() != self.released_collections {
            return Err(format!(
                "{} collections released but {} release records",
                self.released_collections,
                self.released_through.len()
            ));
        }

        for (index, collection) in self.collections.iter() {
            if let Some(object) = collection.items().iter().find(|&&x| !self.is_object_live(x)) {
                return Err(format!(
                    "collection {:?} holds released object {:?}",
                    index, object
                ));
            }
        }

        for (key, &id) in self.bindings.iter() {
            match self.collections.get(id.0) {
                Some(collection) => {
                    if collection.is_empty() && self.mutated.contains(&id) {
                        return Err(format!(
                            "key {:?} still holds a collection that was emptied",
                            key
                        ));
                    }
                }
                None => match self.released_through.get(&id) {
                    Some(through) if through != key => {}
                    Some(_) => {
                        return Err(format!(
                            "key {:?} is bound to the collection released through it",
                            key
                        ))
                    }
                    None => {
                        return Err(format!(
                            "key {:?} is bound to a collection this table never released",
                            key
                        ))
                    }
                },
            }
        }

        Ok(())
    }

    /// Panics if the table is inconsistent
    pub fn check(&self) {
        if let Err(message) = self.validate() {
            panic!("{}", message);
        }
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    fn table_with(key: &str, len: usize) -> (Table, CollectionId, HeapVec<ObjectId>) {
        let mut table = Table::new();
        let objects: HeapVec<ObjectId> = (0..len).map(|_| table.alloc_object()).collect();
        let id = table.alloc_collection(objects.iter().copied());
        table.bind(key, id);
        (table, id, objects)
    }

    #[test]
    fn lookup() {
        let (table, id, objects) = table_with("a", 3);
        let (found, collection) = table.lookup("a").unwrap();
        assert_eq!(found, id);
        assert_eq!(collection.items(), &objects[..]);
        assert_eq!(
            table.lookup("b").unwrap_err(),
            HarnessError::KeyNotFound { key: "b".into() }
        );
        table.check();
    }

    #[test]
    fn last_write_wins() {
        let (mut table, first, _) = table_with("a", 1);
        let second = table.alloc_collection(HeapVec::<ObjectId>::new());
        assert_eq!(table.bind("a", second), Some(first));
        assert_eq!(table.binding("a").unwrap(), second);
        assert_eq!(table.len(), 1);
        // the orphan is still alive until the table goes away
        assert!(table.is_collection_live(first));
    }

    #[test]
    fn release_collection_detaches_key_first() {
        let (mut table, id, _) = table_with("a", 2);
        table.bind("b", id);
        table.release_collection("a", id).unwrap();
        assert!(!table.contains_key("a"));
        assert!(!table.is_collection_live(id));
        assert_eq!(
            table.lookup("b").unwrap_err(),
            HarnessError::CollectionReleased { key: "b".into() }
        );
        assert_eq!(table.stale_bindings(), 1);
        assert_eq!(
            table.release_collection("b", id).unwrap_err(),
            HarnessError::DoubleRelease { what: "collection" }
        );
        assert!(table.contains_key("b"));
        assert_eq!(table.released_collections(), 1);
        table.check();
    }

    #[test]
    fn release_collection_checks_the_binding() {
        let (mut table, id, _) = table_with("a", 1);
        let other = table.alloc_collection(HeapVec::<ObjectId>::new());
        table.bind("b", other);
        assert_eq!(
            table.release_collection("b", id).unwrap_err(),
            HarnessError::BindingMismatch { key: "b".into() }
        );
        assert_eq!(
            table.release_collection("c", id).unwrap_err(),
            HarnessError::KeyNotFound { key: "c".into() }
        );
        assert_eq!(table.binding("b").unwrap(), other);
        assert!(table.is_collection_live(id));
        assert_eq!(table.released_collections(), 0);
        table.check();
    }

    #[test]
    fn stale_handle_does_not_resolve_after_slot_reuse() {
        let (mut table, id, _) = table_with("a", 1);
        table.release_collection("a", id).unwrap();
        let reused = table.alloc_collection(HeapVec::<ObjectId>::new());
        assert_ne!(reused, id);
        assert!(table.collection(id).is_none());
    }

    #[test]
    fn release_object_once() {
        let mut table = Table::new();
        let object = table.alloc_object();
        table.release_object(object).unwrap();
        assert!(!table.is_object_live(object));
        assert_eq!(
            table.release_object(object).unwrap_err(),
            HarnessError::DoubleRelease { what: "object" }
        );
        assert_eq!(table.released_objects(), 1);
        table.check();
    }

    #[test]
    fn listener_sees_every_release() {
        let (mut table, id, objects) = table_with("a", 2);
        let record: Rc<RefCell<HeapVec<String>>> = Default::default();
        let record_clone = record.clone();
        table.set_listener(Some(Box::new(move |event| {
            let line = match event {
                ReleaseEvent::Collection { key, .. } => format!("collection {}", key),
                ReleaseEvent::Object { .. } => "object".to_string(),
            };
            record.borrow_mut().push(line);
        })));
        table.release_object(objects[0]).unwrap();
        table.release_collection("a", id).unwrap();
        assert_eq!(
            &*record_clone.borrow(),
            &["object".to_string(), "collection a".to_string()]
        );
    }

    #[test]
    fn snapshot_is_sorted() {
        let mut table = Table::new();
        let o = table.alloc_object();
        let c = table.alloc_collection([o, o]);
        table.bind("z", c);
        table.bind("m", c);
        let empty = table.alloc_collection(HeapVec::<ObjectId>::new());
        table.bind("a", empty);
        let snapshot = table.snapshot();
        let keys: HeapVec<&str> = snapshot.iter().map(|x| x.0.as_str()).collect();
        assert_eq!(keys, ["a", "m", "z"]);
        assert_eq!(snapshot[0].1, Some(vec![]));
        assert_eq!(snapshot[1].1, Some(vec![o.to_bits(), o.to_bits()]));
    }

    #[test]
    #[should_panic]
    fn check_catches_dangling_object() {
        let (mut table, _, objects) = table_with("a", 2);
        table.release_object(objects[1]).unwrap();
        table.check();
    }

    #[test]
    #[should_panic]
    fn check_catches_emptied_collection_left_bound() {
        let (mut table, _, _) = table_with("a", 2);
        let (_, collection) = table.lookup_mut("a").unwrap();
        collection.items_mut().clear();
        table.check();
    }

    #[test]
    fn generated_empty_collection_passes_check() {
        let mut table = Table::new();
        let id = table.alloc_collection(HeapVec::<ObjectId>::new());
        table.bind("a", id);
        table.lookup_mut("a").unwrap();
        table.check();
    }

    #[test]
    #[should_panic]
    fn check_catches_binding_to_collection_released_through_it() {
        let (mut table, id, _) = table_with("a", 1);
        table.release_collection("a", id).unwrap();
        table.bind("a", id);
        table.check();
    }

    #[test]
    #[should_panic]
    fn check_catches_binding_to_foreign_collection() {
        let mut other = Table::new();
        let foreign = other.alloc_collection(HeapVec::<ObjectId>::new());
        let mut table = Table::new();
        table.bind("a", foreign);
        table.check();
    }

    #[test]
    fn multiplicities() {
        let mut table = Table::new();
        let a = table.alloc_object();
        let b = table.alloc_object();
        let collection = Collection::new(vec![a, b, a, a]);
        let counts = collection.multiplicities();
        assert_eq!(counts[&a], 3);
        assert_eq!(counts[&b], 1);
        assert_eq!(collection.count(a), 3);
    }
}
