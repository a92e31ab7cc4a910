//! Error types for the compare engine.

use thiserror::Error;

/// Error raised by a store adapter.
///
/// Adapters own their retry policy; by the time an `AdapterError` reaches the
/// engine it is final for that operation. `retryable` records whether the
/// underlying failure was transient, for diagnostics only.
#[derive(Debug, Clone, Error)]
#[error("{detail}")]
pub struct AdapterError {
    /// Whether the underlying failure was transient.
    pub retryable: bool,
    /// Human-readable failure detail.
    pub detail: String,
}

impl AdapterError {
    /// A transient failure (network, server selection, throttling).
    pub fn transient(detail: impl Into<String>) -> Self {
        AdapterError {
            retryable: true,
            detail: detail.into(),
        }
    }

    /// A permanent failure (bad query, authorization, malformed data).
    pub fn permanent(detail: impl Into<String>) -> Self {
        AdapterError {
            retryable: false,
            detail: detail.into(),
        }
    }
}

/// Invalid run parameters, surfaced before any run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Both percentage and count were configured.
    #[error("sampling.percentage and sampling.count are mutually exclusive")]
    PercentageAndCount,

    /// Neither percentage nor count was configured.
    #[error("provide either sampling.percentage or sampling.count")]
    MissingSampleSize,

    /// Percentage outside the accepted range.
    #[error("sampling.percentage must be > 0 and <= 1, got {0}")]
    PercentageOutOfRange(f64),

    /// A concurrency budget of zero would deadlock the pipeline.
    #[error("sampling.{0} must be >= 1")]
    ZeroConcurrency(&'static str),

    /// A collection is enabled without a business key to match on.
    #[error("collection '{0}' is enabled but has no business_key configured")]
    MissingBusinessKey(String),

    /// A field specifier failed validation.
    #[error("invalid field path '{path}' at {location}")]
    InvalidFieldPath { path: String, location: String },
}
