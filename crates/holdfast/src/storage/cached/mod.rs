//! Write-behind decorator over any backend repository.

mod repository;
mod tombstones;

pub use repository::{CachedRepository, FlushReport};
