use crate::{HarnessError, Result};

pub const DEFAULT_MAX_KEY_LENGTH: usize = 80;
pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const DEFAULT_MAX_ITERATIONS: usize = 21;
pub const DEFAULT_SEED: u64 = 89;

/// Tunables of a harness run.
///
/// Two runs with equal configs generate the same scenario and select the
/// same `(key, object)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Upper bound of a generated key's length. Keys are never empty.
    pub max_key_length: usize,
    /// Upper bound of the key count, the collection count and the
    /// object count of each collection
    pub max_entries_per_container: usize,
    /// Upper bound of the number of removal steps
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            max_entries_per_container: DEFAULT_MAX_ENTRIES,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: DEFAULT_SEED,
        }
    }
}

impl HarnessConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_key_length(mut self, max_key_length: usize) -> Self {
        self.max_key_length = max_key_length;
        self
    }

    pub fn with_max_entries(mut self, max_entries_per_container: usize) -> Self {
        self.max_entries_per_container = max_entries_per_container;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_key_length == 0 {
            return Err(HarnessError::InvalidConfig {
                message: "max_key_length must be at least 1, keys are never empty".into(),
            });
        }

        Ok(())
    }
}
