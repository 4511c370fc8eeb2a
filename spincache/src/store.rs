use crate::error::CacheError;
use crate::hash::shard_index;
use crate::shard::Shard;
use crate::SHARD_COUNT;

use core::fmt;

use crossbeam_utils::CachePadded;

/// A cache store that is partitioned into `SHARD_COUNT` independently locked
/// shards.
///
/// The low bits of a key's hash pick the shard, so operations on different
/// keys rarely contend on the same lock. Each shard sits on its own cache
/// line(s) so that one shard's lock traffic does not false-share with its
/// neighbours.
pub(crate) struct ShardedStore {
  shards: Box<[CachePadded<Shard>]>,
}

impl fmt::Debug for ShardedStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl ShardedStore {
  /// Creates the store, giving every shard a soft limit of `shard_capacity`.
  pub(crate) fn new(shard_capacity: usize) -> Result<Self, CacheError> {
    let mut shards = Vec::with_capacity(SHARD_COUNT);
    for _ in 0..SHARD_COUNT {
      shards.push(CachePadded::new(Shard::new(shard_capacity)?));
    }

    Ok(Self {
      shards: shards.into_boxed_slice(),
    })
  }

  /// Returns the shard owning `hash`.
  #[inline]
  pub(crate) fn shard(&self, hash: u32) -> &Shard {
    &self.shards[shard_index(hash)]
  }

  #[cfg(feature = "bulk")]
  #[inline]
  pub(crate) fn shard_at(&self, index: usize) -> &Shard {
    &self.shards[index]
  }

  /// Returns an iterator over all shards, in index order.
  /// Used by whole-cache operations such as `clear()` or `metrics()`.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &Shard> {
    self.shards.iter().map(|padded| &**padded)
  }
}
