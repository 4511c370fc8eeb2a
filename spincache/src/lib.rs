//! A concurrent, in-process byte cache built for read-heavy workloads.
//!
//! # Features
//! - **Sharded**: 16 independently locked shards, each an open-addressed
//!   table with linear probing and cache-line-grouped slots.
//! - **Zero-copy reads**: [`Cache::get`] returns a reference-counted
//!   [`ValueRef`] that borrows the stored bytes directly. Replacing or
//!   removing a key never invalidates an outstanding borrow.
//! - **CLOCK eviction**: each shard has a soft capacity enforced by a
//!   second-chance sweep on insert.
//! - **Lazy TTL expiry**: entries carry a whole-second deadline read from a
//!   process-wide clock; expired entries are dropped when a lookup meets them.
//! - **No background threads** unless you start a [`TimeTicker`].
//!
//! ```
//! use fibre_spincache::Cache;
//! use std::time::Duration;
//!
//! let cache = Cache::new(1_000, Duration::from_secs(60)).unwrap();
//! cache.insert(b"user:42", b"ada").unwrap();
//!
//! let value = cache.get(b"user:42").unwrap();
//! assert_eq!(&*value, b"ada");
//! ```

// Public modules that form the API
pub mod builder;
pub mod config;
pub mod error;
pub mod handles;
pub mod metrics;
pub mod sync;
pub mod task;
pub mod time;

// Internal, crate-only modules
mod entry;
mod eviction;
mod hash;
mod shard;
mod store;
mod value;

#[cfg(feature = "bulk")]
mod bulk;

/// Number of shards. A power of two so the shard index is a mask of the hash.
pub const SHARD_COUNT: usize = 16;

/// Slots allocated per entry of shard capacity, keeping the load factor at
/// or below one half before tombstones.
pub const INITIAL_BUCKET_MULTIPLIER: usize = 2;

/// TTL applied when none is given, in seconds.
pub const DEFAULT_TTL_SECS: u32 = 300;

/// Total capacity used when zero is requested.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Alignment of a slot line and stride of the probe prefetch.
pub const CACHE_LINE_SIZE: usize = 64;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use config::CacheConfig;
pub use error::CacheError;
pub use handles::Cache;
pub use metrics::MetricsSnapshot;
pub use shard::ShardStats;
pub use sync::RwSpinLock;
pub use task::ticker::TimeTicker;
pub use value::ValueRef;
