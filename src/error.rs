//! Errors raised by the table, the removal strategies and the harness.

use thiserror::Error;

/// Every way a harness run can go wrong.
///
/// Skips (empty table, empty collection, stale binding) are not errors;
/// the driver records them in [`crate::RunReport`] instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    /// A key expected to be present is not in the table
    #[error("key not found: {key:?}")]
    KeyNotFound {
        /// The missing key
        key: String,
    },

    /// The key is still bound, but its collection was released through another key
    #[error("collection under key {key:?} was already released")]
    CollectionReleased {
        /// The key holding the stale binding
        key: String,
    },

    /// The key is bound to a different collection than the one being released
    #[error("key {key:?} is not bound to the collection being released")]
    BindingMismatch {
        /// The key named in the release
        key: String,
    },

    /// An arena slot was released twice
    #[error("double release of {what}")]
    DoubleRelease {
        /// Which kind of slot, e.g. "collection" or "object"
        what: &'static str,
    },

    /// A strategy returned an error or panicked
    #[error("strategy {strategy} failed: {message}")]
    StrategyFailure {
        /// Name of the failing strategy
        strategy: &'static str,
        /// Diagnostic from the strategy boundary
        message: String,
    },

    /// The table is inconsistent after a strategy returned successfully
    #[error("strategy {strategy} broke an invariant: {message}")]
    InvariantViolation {
        /// Name of the offending strategy
        strategy: &'static str,
        /// What was observed
        message: String,
    },

    /// Two strategies disagree on the final table for the same seed
    #[error("strategy {strategy} diverged from {reference}")]
    Divergence {
        strategy: &'static str,
        reference: &'static str,
    },

    /// Rejected run configuration
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl HarnessError {
    /// Name of the strategy this error is attributed to, if any.
    pub fn strategy(&self) -> Option<&'static str> {
        match self {
            HarnessError::StrategyFailure { strategy, .. }
            | HarnessError::InvariantViolation { strategy, .. }
            | HarnessError::Divergence { strategy, .. } => Some(strategy),
            _ => None,
        }
    }

    pub(crate) fn strategy_failure(strategy: &'static str, message: impl Into<String>) -> Self {
        HarnessError::StrategyFailure {
            strategy,
            message: message.into(),
        }
    }

    pub(crate) fn violation(strategy: &'static str, message: impl Into<String>) -> Self {
        HarnessError::InvariantViolation {
            strategy,
            message: message.into(),
        }
    }
}

pub type Result<T, E = HarnessError> = core::result::Result<T, E>;
