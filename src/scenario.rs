//! Random scenario generation.
//!
//! A scenario is a freshly populated [`Table`]: a random number of keys, a
//! random number of collections each holding a random number of fresh
//! objects, and every key bound to a uniformly chosen collection. Keys are
//! drawn with replacement, so two keys may alias one collection and a later
//! duplicate key overwrites an earlier binding.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{CollectionId, HarnessConfig, HeapVec, Table};

/// Keys are drawn from `KEY_ALPHABET`, printable ASCII from `' '` up to but
/// excluding `'z'`.
pub const KEY_ALPHABET: core::ops::Range<u8> = b' '..b'z';

#[derive(Debug)]
pub struct Scenario {
    pub table: Table,
    /// Generated keys in generation order, duplicates included
    pub keys: HeapVec<String>,
    /// Generated collections in generation order
    pub collections: HeapVec<CollectionId>,
}

impl Scenario {
    /// Whether there is no work to do: no key could be bound.
    pub fn is_trivial(&self) -> bool {
        self.table.is_empty()
    }
}

/// Stretch `seed` once through a seeding generator.
pub fn derive_seed(seed: u64) -> u64 {
    StdRng::seed_from_u64(seed).gen()
}

/// The working stream for `seed`, together with the derived seed feeding it.
pub fn seeded_rng(seed: u64) -> (u64, StdRng) {
    let derived = derive_seed(seed);
    (derived, StdRng::seed_from_u64(derived))
}

pub fn generate_key<R: Rng + ?Sized>(rng: &mut R, max_key_length: usize) -> String {
    let len = rng.gen_range(1..=max_key_length.max(1));
    (0..len)
        .map(|_| rng.gen_range(KEY_ALPHABET) as char)
        .collect()
}

/// Build a scenario from `rng`. `config.seed` is not consulted here.
pub fn generate<R: Rng + ?Sized>(config: &HarnessConfig, rng: &mut R) -> Scenario {
    let max = config.max_entries_per_container;
    let mut table = Table::new();

    let key_count = rng.gen_range(0..=max);
    let keys: HeapVec<String> = (0..key_count)
        .map(|_| {
            let key = generate_key(rng, config.max_key_length);
            log::debug!("generated key {:?}", key);
            key
        })
        .collect();

    let collection_count = rng.gen_range(0..=max);
    let mut collections = HeapVec::with_capacity(collection_count);
    for _ in 0..collection_count {
        let object_count = rng.gen_range(0..=max);
        let objects: HeapVec<_> = (0..object_count).map(|_| table.alloc_object()).collect();
        collections.push(table.alloc_collection(objects));
    }

    log::debug!(
        "scenario: {} keys, {} collections, {} objects",
        key_count,
        collection_count,
        table.live_objects()
    );
    if collections.is_empty() {
        return Scenario {
            table,
            keys,
            collections,
        };
    }

    for key in keys.iter() {
        let collection = collections[rng.gen_range(0..collections.len())];
        table.bind(key.as_str(), collection);
    }

    Scenario {
        table,
        keys,
        collections,
    }
}
