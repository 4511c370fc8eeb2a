use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::handles::Cache;
use crate::store::ShardedStore;
use crate::{time, DEFAULT_CAPACITY, DEFAULT_TTL_SECS, SHARD_COUNT};

use core::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

/// A builder for creating [`Cache`] instances.
#[derive(Clone)]
pub struct CacheBuilder {
  pub(crate) capacity: usize,
  pub(crate) default_ttl: Duration,
}

impl fmt::Debug for CacheBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("capacity", &self.capacity)
      .field("default_ttl", &self.default_ttl)
      .finish()
  }
}

impl CacheBuilder {
  /// Creates a new `CacheBuilder` with default settings
  /// (1000 entries, 300 second TTL).
  pub fn new() -> Self {
    Self {
      capacity: DEFAULT_CAPACITY,
      default_ttl: Duration::from_secs(DEFAULT_TTL_SECS as u64),
    }
  }

  /// Creates a builder seeded from a [`CacheConfig`].
  pub fn from_config(config: &CacheConfig) -> Self {
    Self::new()
      .capacity(config.capacity)
      .default_ttl(Duration::from_secs(config.default_ttl_secs as u64))
  }

  /// Sets the total number of entries the cache aims to hold.
  ///
  /// The capacity is split evenly across the shards (at least one entry per
  /// shard). A capacity of `0` selects the default of 1000.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity;
    self
  }

  /// Sets the TTL used when an insert does not provide one.
  ///
  /// TTLs are kept in whole seconds; sub-second remainders round up. A zero
  /// duration selects the default of 300 seconds.
  pub fn default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub(crate) fn resolved_capacity(&self) -> usize {
    if self.capacity == 0 {
      DEFAULT_CAPACITY
    } else {
      self.capacity
    }
  }

  pub(crate) fn resolved_ttl_secs(&self) -> u32 {
    match time::duration_to_secs(self.default_ttl) {
      0 => DEFAULT_TTL_SECS,
      secs => secs,
    }
  }

  /// Builds the cache, allocating every shard's slot array up front.
  pub fn build(self) -> Result<Cache, CacheError> {
    let capacity = self.resolved_capacity();
    let default_ttl_secs = self.resolved_ttl_secs();
    let shard_capacity = (capacity / SHARD_COUNT).max(1);

    let store = ShardedStore::new(shard_capacity)?;
    // Make sure the clock cell is warm before the first lookup.
    time::refresh();

    debug!(
      capacity,
      shard_capacity,
      bucket_count = store.shard(0).stats().bucket_count,
      default_ttl_secs,
      "built cache"
    );

    Ok(Cache {
      store,
      capacity,
      default_ttl_secs,
      created_at: Instant::now(),
    })
  }
}

impl Default for CacheBuilder {
  fn default() -> Self {
    Self::new()
  }
}
