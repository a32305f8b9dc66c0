//! Cache tiers and the pieces the orchestrator is built from.
//!
//! - `key`: SHA-256 cache keys over the normalized request
//! - `disk`: flat-directory persistent tier with atomic writes
//! - `memory`: unbounded concurrent in-process tier
//! - `sample`: decode-time subsampling policy
//! - `coalesce`: optional per-key request coalescing
//! - `stats`: resolve counters

pub mod coalesce;
pub mod disk;
pub mod key;
pub mod memory;
pub mod sample;
pub mod stats;

pub use coalesce::{KeyGuard, KeyLocks};
pub use disk::DiskStore;
pub use key::{CacheKey, derive_key};
pub use memory::{ClearObserver, MemoryStore};
pub use sample::{sample_size, scaled_dimensions};
pub use stats::{CacheStats, CacheStatsSnapshot};
