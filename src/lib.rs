#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use event::{ReleaseEvent, ReleaseListener};
pub use harness::{
    run, run_differential, Harness, Phase, RunReport, Selection, SkipCounts, SkipReason, Step,
};
pub use scenario::Scenario;
pub use strategy::*;
pub use table::{Collection, CollectionId, Object, ObjectId, Table, TableSnapshot};

mod error;
mod event;
mod harness;
mod strategy;
mod table;

pub mod config;
pub mod scenario;

pub type HeapVec<T> = Vec<T>;
