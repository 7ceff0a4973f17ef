//! The driver.
//!
//! A run goes `Init → Populate → Iterate → Done`. Init derives the random
//! stream from the seed, Populate builds the scenario, Iterate repeatedly
//! picks a key and an object in its collection and hands them to the
//! strategy under test. Every removal is verified against the collection's
//! state before the call; the first failure aborts the run.

use std::collections::HashMap;

use rand::{rngs::StdRng, Rng};

use crate::scenario::{generate, seeded_rng};
use crate::{
    guarded_remove, reference_strategy, CollectionId, HarnessConfig, HarnessError,
    HeapVec, ObjectId, RemovalStrategy, RemoveOutcome, Result, Scenario, TableSnapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Populate,
    Iterate,
    Done,
}

/// Why an iteration did no removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyTable,
    /// The drawn key was erased by an earlier removal
    MissingKey,
    /// The drawn key aliases a collection released through another key
    ReleasedCollection,
    EmptyCollection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub empty_table: usize,
    pub missing_key: usize,
    pub released_collection: usize,
    pub empty_collection: usize,
}

impl SkipCounts {
    fn record(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::EmptyTable => self.empty_table += 1,
            SkipReason::MissingKey => self.missing_key += 1,
            SkipReason::ReleasedCollection => self.released_collection += 1,
            SkipReason::EmptyCollection => self.empty_collection += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.empty_table + self.missing_key + self.released_collection + self.empty_collection
    }
}

/// A `(key, object)` pair handed to the strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub key: String,
    pub target: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Removed {
        selection: Selection,
        outcome: RemoveOutcome,
    },
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub strategy: &'static str,
    pub seed: u64,
    pub derived_seed: u64,
    /// Generated keys, duplicates included
    pub keys: HeapVec<String>,
    pub collections: usize,
    /// Number of iterations drawn for this run
    pub iterations: usize,
    pub selections: HeapVec<Selection>,
    pub skips: SkipCounts,
    pub released_objects: usize,
    pub released_collections: usize,
    pub final_table: TableSnapshot,
}

impl RunReport {
    pub fn removals(&self) -> usize {
        self.selections.len()
    }
}

pub struct Harness<R: Rng = StdRng> {
    config: HarnessConfig,
    derived_seed: u64,
    rng: R,
    scenario: Option<Scenario>,
    phase: Phase,
}

impl Harness<StdRng> {
    /// Harness driven by the stream derived from `config.seed`
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let (derived_seed, rng) = seeded_rng(config.seed);
        Ok(Self::with_rng(config, derived_seed, rng))
    }
}

impl<R: Rng> Harness<R> {
    /// Harness driven by an arbitrary stream. `derived_seed` is only reported.
    pub fn with_rng(config: HarnessConfig, derived_seed: u64, rng: R) -> Self {
        Self {
            config,
            derived_seed,
            rng,
            scenario: None,
            phase: Phase::Init,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn derived_seed(&self) -> u64 {
        self.derived_seed
    }

    /// The scenario, once populated
    pub fn scenario(&self) -> Option<&Scenario> {
        self.scenario.as_ref()
    }

    /// Generate the scenario. Does nothing if it already exists.
    pub fn populate(&mut self) -> &Scenario {
        self.parts().1
    }

    fn parts(&mut self) -> (&mut R, &mut Scenario) {
        let Self {
            config,
            rng,
            scenario,
            phase,
            ..
        } = self;
        let scenario = scenario.get_or_insert_with(|| {
            *phase = Phase::Populate;
            log::trace!("populating scenario for seed {}", config.seed);
            generate(&*config, &mut *rng)
        });
        if *phase == Phase::Populate || *phase == Phase::Init {
            *phase = Phase::Iterate;
        }

        (rng, scenario)
    }

    /// Pick a target and hand it to `strategy`, then verify the result.
    pub fn step<S: RemovalStrategy + ?Sized>(&mut self, strategy: &S) -> Result<Step> {
        let (rng, scenario) = self.parts();
        let table = &mut scenario.table;
        if table.is_empty() {
            return Ok(Step::Skipped(SkipReason::EmptyTable));
        }

        let key = scenario.keys[rng.gen_range(0..scenario.keys.len())].clone();
        let (id, collection) = match table.lookup(&key) {
            Ok(found) => found,
            Err(HarnessError::KeyNotFound { .. }) => {
                log::debug!("skip {:?}: key was erased", key);
                return Ok(Step::Skipped(SkipReason::MissingKey));
            }
            Err(HarnessError::CollectionReleased { .. }) => {
                log::debug!("skip {:?}: collection released through an alias", key);
                return Ok(Step::Skipped(SkipReason::ReleasedCollection));
            }
            Err(err) => return Err(err),
        };
        if collection.is_empty() {
            log::debug!("skip {:?}: empty collection", key);
            return Ok(Step::Skipped(SkipReason::EmptyCollection));
        }

        let target = collection.items()[rng.gen_range(0..collection.len())];
        let before = Before {
            id,
            len: collection.len(),
            counts: collection.multiplicities(),
            released_objects: table.released_objects(),
            released_collections: table.released_collections(),
        };

        let outcome = guarded_remove(strategy, table, &key, target)?;
        verify(strategy.name(), scenario, &key, target, &before, outcome)?;
        Ok(Step::Removed {
            selection: Selection { key, target },
            outcome,
        })
    }

    /// Run every iteration with `strategy` and report. A harness runs once;
    /// afterwards it stays in [`Phase::Done`].
    pub fn run<S: RemovalStrategy + ?Sized>(&mut self, strategy: &S) -> Result<RunReport> {
        if self.phase == Phase::Done {
            return Err(HarnessError::InvalidConfig {
                message: "harness already ran".to_string(),
            });
        }

        let trivial = self.parts().1.is_trivial();
        let iterations = if trivial {
            0
        } else {
            self.rng.gen_range(0..=self.config.max_iterations)
        };

        let mut selections = HeapVec::new();
        let mut skips = SkipCounts::default();
        for _ in 0..iterations {
            match self.step(strategy)? {
                Step::Removed { selection, .. } => selections.push(selection),
                Step::Skipped(reason) => skips.record(reason),
            }
        }

        log::debug!(
            "{}: {} removals, {} skips over {} iterations",
            strategy.name(),
            selections.len(),
            skips.total(),
            iterations
        );
        let (seed, derived_seed) = (self.config.seed, self.derived_seed);
        let (_, scenario) = self.parts();
        let report = RunReport {
            strategy: strategy.name(),
            seed,
            derived_seed,
            keys: scenario.keys.clone(),
            collections: scenario.collections.len(),
            iterations,
            selections,
            skips,
            released_objects: scenario.table.released_objects(),
            released_collections: scenario.table.released_collections(),
            final_table: scenario.table.snapshot(),
        };
        self.phase = Phase::Done;
        Ok(report)
    }
}

struct Before {
    id: CollectionId,
    len: usize,
    counts: HashMap<ObjectId, usize>,
    released_objects: usize,
    released_collections: usize,
}

fn verify(
    strategy: &'static str,
    scenario: &Scenario,
    key: &str,
    target: ObjectId,
    before: &Before,
    outcome: RemoveOutcome,
) -> Result<()> {
    let table = &scenario.table;
    let fail = |message: String| Err(HarnessError::violation(strategy, message));
    let expected = before.counts.get(&target).copied().unwrap_or(0);
    if outcome.removed != expected {
        return fail(format!(
            "removed {} occurrences of {:?}, expected {}",
            outcome.removed, target, expected
        ));
    }

    let emptied = before.len == expected;
    if outcome.collection_released != emptied {
        return fail(format!(
            "collection_released={} but the collection {} emptied",
            outcome.collection_released,
            if emptied { "was" } else { "was not" }
        ));
    }

    let released_collections = table.released_collections() - before.released_collections;
    if released_collections != emptied as usize {
        return fail(format!("{} collections released", released_collections));
    }

    if emptied {
        if table.contains_key(key) {
            return fail(format!("key {:?} still present after its collection emptied", key));
        }
        if table.is_collection_live(before.id) {
            return fail("emptied collection is still alive".to_string());
        }
    } else {
        if table.binding(key).ok() != Some(before.id) {
            return fail(format!("key {:?} lost its binding", key));
        }
        let collection = match table.collection(before.id) {
            Some(x) => x,
            None => return fail("non-empty collection was released".to_string()),
        };
        if collection.len() != before.len - expected {
            return fail(format!(
                "length went from {} to {} removing {} occurrences",
                before.len,
                collection.len(),
                expected
            ));
        }
        let mut counts = collection.multiplicities();
        if counts.remove(&target).is_some() {
            return fail(format!("{:?} is still in the collection", target));
        }
        let mut expected_counts = before.counts.clone();
        expected_counts.remove(&target);
        if counts != expected_counts {
            return fail("multiplicity of other objects changed".to_string());
        }
    }

    let released_objects = table.released_objects() - before.released_objects;
    if released_objects != outcome.object_released as usize {
        return fail(format!(
            "{} objects released, object_released={}",
            released_objects, outcome.object_released
        ));
    }
    if table.is_object_live(target) == outcome.object_released {
        return fail(format!(
            "target liveness does not match object_released={}",
            outcome.object_released
        ));
    }

    table
        .validate()
        .or_else(|message| fail(message))
}

/// Run `strategy` on the scenario derived from `config`.
pub fn run<S: RemovalStrategy + ?Sized>(config: &HarnessConfig, strategy: &S) -> Result<RunReport> {
    Harness::new(*config)?.run(strategy)
}

/// Run every strategy on the same scenario and compare each with the
/// reference strategy.
///
/// Every strategy must select the same `(key, object)` pairs and leave the
/// same table behind. Returns the reference report first.
pub fn run_differential(
    config: &HarnessConfig,
    strategies: &[Box<dyn RemovalStrategy>],
) -> Result<HeapVec<RunReport>> {
    let reference = reference_strategy();
    let expected = run(config, &reference)?;
    let mut reports = HeapVec::with_capacity(strategies.len() + 1);
    for strategy in strategies.iter() {
        if strategy.name() == reference.name() {
            continue;
        }

        let report = run(config, strategy)?;
        if report.selections != expected.selections || report.final_table != expected.final_table {
            log::error!(
                "{} diverged from {} for seed {}",
                strategy.name(),
                reference.name(),
                config.seed
            );
            return Err(HarnessError::Divergence {
                strategy: strategy.name(),
                reference: reference.name(),
            });
        }
        reports.push(report);
    }

    reports.insert(0, expected);
    Ok(reports)
}
