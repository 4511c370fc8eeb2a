use crate::builder::CacheBuilder;
use crate::entry::Entry;
use crate::error::CacheError;
use crate::hash::{hash_key, shard_index};
use crate::metrics::MetricsSnapshot;
use crate::shard::{Lookup, ShardStats};
use crate::store::ShardedStore;
use crate::time;
use crate::value::ValueRef;

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// A thread-safe, sharded byte cache with CLOCK eviction and lazy TTL expiry.
///
/// All work happens on the calling thread: there is no janitor. Expired
/// entries are dropped when a lookup runs into them (or by
/// [`purge_expired`](Cache::purge_expired)), and capacity is enforced by a
/// CLOCK sweep inside `insert`.
///
/// Share it between threads behind an `Arc`. Dropping the cache releases its
/// reference on every entry; borrows obtained from [`get`](Cache::get) stay
/// valid until they are dropped themselves.
pub struct Cache {
  pub(crate) store: ShardedStore,
  pub(crate) capacity: usize,
  pub(crate) default_ttl_secs: u32,
  pub(crate) created_at: Instant,
}

impl fmt::Debug for Cache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cache")
      .field("capacity", &self.capacity)
      .field("default_ttl_secs", &self.default_ttl_secs)
      .field("store", &self.store)
      .finish_non_exhaustive()
  }
}

impl Cache {
  /// Creates a cache holding roughly `capacity` entries whose default TTL is
  /// `default_ttl`. Zero values select the defaults (1000 entries, 300 s).
  pub fn new(capacity: usize, default_ttl: Duration) -> Result<Self, CacheError> {
    CacheBuilder::new()
      .capacity(capacity)
      .default_ttl(default_ttl)
      .build()
  }

  /// Returns a builder with default settings.
  pub fn builder() -> CacheBuilder {
    CacheBuilder::new()
  }

  /// Looks up `key` and borrows its value without copying it.
  ///
  /// A hit marks the entry as recently used and returns a [`ValueRef`] that
  /// keeps the value alive until dropped. If the entry is found but expired,
  /// it is removed and the lookup counts as a miss.
  pub fn get(&self, key: &[u8]) -> Option<ValueRef> {
    let hash = hash_key(key);
    let shard = self.store.shard(hash);
    let now = time::now();

    match shard.get(hash, key, now) {
      Lookup::Hit(value) => Some(value),
      Lookup::Miss => None,
      Lookup::Expired => {
        shard.remove_expired(hash, key, now);
        None
      }
    }
  }

  /// "Peeks" for a live entry without marking it used or touching metrics.
  pub fn contains(&self, key: &[u8]) -> bool {
    let hash = hash_key(key);
    self.store.shard(hash).contains(hash, key, time::now())
  }

  /// Inserts or replaces `key` with the default TTL.
  pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
    self.insert_with_ttl(key, value, Duration::ZERO)
  }

  /// Inserts or replaces `key`, expiring it after `ttl`.
  ///
  /// A zero `ttl` means "use the default TTL". The TTL is kept in whole
  /// seconds and sub-second remainders round up. The entry is allocated
  /// before the shard lock is taken; on failure the cache is left untouched.
  /// Borrows of a replaced value keep seeing the old bytes.
  pub fn insert_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<(), CacheError> {
    let entry = self.allocate_entry(key, value, ttl)?;
    let hash = hash_key(key);
    self.store.shard(hash).insert(hash, entry);
    Ok(())
  }

  pub(crate) fn allocate_entry(
    &self,
    key: &[u8],
    value: &[u8],
    ttl: Duration,
  ) -> Result<std::ptr::NonNull<Entry>, CacheError> {
    time::refresh();
    let ttl_secs = match time::duration_to_secs(ttl) {
      0 => self.default_ttl_secs,
      secs => secs,
    };
    let expires_at = time::expiry_after(time::now(), ttl_secs);

    Entry::allocate(key, value, expires_at).inspect_err(|error| {
      warn!(
        key_len = key.len(),
        value_len = value.len(),
        %error,
        "cache insert rejected"
      );
    })
  }

  /// Removes `key`. Returns `true` if an entry was removed.
  ///
  /// Outstanding borrows of the removed value remain valid.
  pub fn invalidate(&self, key: &[u8]) -> bool {
    let hash = hash_key(key);
    self.store.shard(hash).invalidate(hash, key)
  }

  /// Removes every expired entry, shard by shard. Returns the number removed.
  pub fn purge_expired(&self) -> usize {
    let now = time::now();
    self
      .store
      .iter_shards()
      .map(|shard| shard.purge_expired(now))
      .sum()
  }

  /// Rebuilds every shard that holds tombstones so probes stay short.
  pub fn compact(&self) {
    for shard in self.store.iter_shards() {
      shard.compact();
    }
  }

  /// Removes every entry. Outstanding borrows remain valid.
  pub fn clear(&self) {
    for shard in self.store.iter_shards() {
      shard.clear();
    }
  }

  /// Number of live entries, summed shard by shard.
  ///
  /// Expired entries that have not been purged yet are included.
  pub fn len(&self) -> usize {
    self.store.iter_shards().map(|shard| shard.len()).sum()
  }

  /// Whether no shard holds an entry.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The configured total capacity.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// The TTL applied when an insert passes a zero TTL.
  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs as u64)
  }

  /// The index of the shard `key` maps to.
  pub fn shard_index(&self, key: &[u8]) -> usize {
    shard_index(hash_key(key))
  }

  /// Per-shard size, capacity, bucket and tombstone counts, in shard order.
  pub fn shard_stats(&self) -> Vec<ShardStats> {
    self.store.iter_shards().map(|shard| shard.stats()).collect()
  }

  /// Returns a point-in-time snapshot of the cache counters.
  pub fn metrics(&self) -> MetricsSnapshot {
    let mut snapshot = MetricsSnapshot::default();
    let mut entries = 0;
    for shard in self.store.iter_shards() {
      shard.metrics.accumulate(&mut snapshot);
      entries += shard.len() as u64;
    }
    snapshot.finish(entries, self.created_at.elapsed().as_secs())
  }
}

impl Drop for Cache {
  fn drop(&mut self) {
    // The store's tables release their references as they drop.
    debug!(entries = self.len(), "dropping cache");
  }
}
