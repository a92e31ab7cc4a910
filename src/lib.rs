//! Sampling-based consistency checker for Cosmos DB (Mongo API) and MongoDB.
//!
//! The driver-free engine lives in the `compare-core` crate; this crate adds
//! configuration loading, the Mongo-driver store adapters, per-collection run
//! driving, and mismatch log reporting.

pub mod clients;
pub mod config;
pub mod report;
pub mod run;

pub use compare_core;
