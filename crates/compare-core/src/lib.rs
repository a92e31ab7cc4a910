//! Sampling-and-diff engine for cosmos-mongo-compare.
//!
//! This crate holds everything that does not touch a database driver:
//!
//! - [`DocumentValue`] - a closed tagged-variant representation of nested
//!   documents, comparable across heterogeneous stores
//! - [`diff`] - the recursive structural comparison with field exclusions
//! - [`select_keys`] - deterministic (seeded smallest-hash), reservoir and
//!   server-side-fast business key sampling
//! - [`run_comparison`] - the bounded-concurrency fetch + diff pipeline
//! - [`RunAggregator`] - per-run outcome classification and counters
//!
//! Store adapters implement the [`KeySource`] and [`DocumentFetch`] traits;
//! the engine never depends on which store is behind them.
//!
//! # Example
//!
//! ```ignore
//! use compare_core::{diff, ExcludePolicy};
//!
//! let policy = ExcludePolicy::new(["updated_at".to_string()]);
//! let entries = diff(Some(&source), Some(&target), &policy);
//! assert!(entries.is_empty());
//! ```

pub use indexmap;

pub mod aggregate;
pub mod diff;
pub mod error;
pub mod orchestrate;
pub mod sample;
pub mod value;

pub use aggregate::{DiffOutcome, OutcomeStatus, RunAggregator, RunReport, RunSummary};
pub use diff::{diff, DiffKind, DifferenceEntry, ExcludePolicy, PathSegment};
pub use error::{AdapterError, ConfigError};
pub use orchestrate::{run_comparison, DocumentFetch, KeySource, MatchedPair, RunOptions};
pub use sample::{select_keys, CollectionSpec, SamplingMode, SamplingSpec};
pub use value::{BusinessKey, DocumentValue};
