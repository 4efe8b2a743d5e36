//! Functional core of the holdfast storage layer.
//!
//! Everything in this crate is pure: record and repository contracts, error
//! types, configuration with validation, retry delay math, and shard path
//! derivation. The `holdfast` crate supplies the I/O.

pub mod cache;
pub mod config;
pub mod record;
pub mod retry;
pub mod shard;
pub mod storage;
