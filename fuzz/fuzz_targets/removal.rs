#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use safe_deletion::{all_strategies, reference_strategy, ObjectId, RemovalStrategy, Table};

#[derive(Debug, Arbitrary)]
enum Action {
    /// Bind a key to a fresh collection laid out by `pattern`
    Bind { key: u8, pattern: Vec<u8> },
    /// Bind a key to the live collection of another key
    Alias { key: u8, from: u8 },
    Remove { key: u8, object: u8 },
}

const OBJECTS: usize = 8;

fn apply(strategy: &dyn RemovalStrategy, actions: &[Action]) -> Vec<(String, Option<Vec<u64>>)> {
    let mut table = Table::new();
    let objects: Vec<ObjectId> = (0..OBJECTS).map(|_| table.alloc_object()).collect();
    for action in actions {
        match action {
            Action::Bind { key, pattern } => {
                let id = table.alloc_collection(pattern.iter().map(|&x| objects[x as usize % OBJECTS]));
                table.bind(key.to_string(), id);
            }
            Action::Alias { key, from } => {
                if let Ok((id, _)) = table.lookup(&from.to_string()) {
                    table.bind(key.to_string(), id);
                }
            }
            Action::Remove { key, object } => {
                let key = key.to_string();
                if table.lookup(&key).is_ok() {
                    strategy
                        .remove(&mut table, &key, objects[*object as usize % OBJECTS])
                        .unwrap();
                }
            }
        }
        table.check();
    }

    table.snapshot()
}

fuzz_target!(|actions: Vec<Action>| {
    let expected = apply(&reference_strategy(), &actions);
    for strategy in all_strategies() {
        if strategy.name().starts_with("owning") {
            // objects are shared between collections here, releasing them would dangle
            continue;
        }
        assert_eq!(apply(&*strategy, &actions), expected, "{}", strategy.name());
    }
});
