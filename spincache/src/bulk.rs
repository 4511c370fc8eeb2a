//! Batch operations that group keys by shard and visit the shards in
//! parallel on the rayon pool, taking each shard lock once per batch.

use crate::entry::Entry;
use crate::error::CacheError;
use crate::handles::Cache;
use crate::hash::{hash_key, shard_index};
use crate::shard::Lookup;
use crate::value::ValueRef;
use crate::{time, SHARD_COUNT};

use std::ptr::NonNull;
use std::time::Duration;

use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};

/// An allocated entry that has not been published yet.
struct Pending {
  hash: u32,
  entry: NonNull<Entry>,
}

// SAFETY: a pending entry is owned by exactly one batch until it is handed to
// a shard, and `Entry` itself is safe to share.
unsafe impl Send for Pending {}

impl Drop for Pending {
  fn drop(&mut self) {
    // SAFETY: the batch still owns the allocation's single reference.
    unsafe { Entry::release(self.entry) };
  }
}

impl Pending {
  fn publish(self) -> (u32, NonNull<Entry>) {
    let this = std::mem::ManuallyDrop::new(self);
    (this.hash, this.entry)
  }
}

fn group_by_shard<'k, K>(keys: &'k [K]) -> Vec<Vec<(usize, u32, &'k [u8])>>
where
  K: AsRef<[u8]>,
{
  let mut by_shard: Vec<Vec<(usize, u32, &[u8])>> = vec![Vec::new(); SHARD_COUNT];
  for (position, key) in keys.iter().enumerate() {
    let key = key.as_ref();
    let hash = hash_key(key);
    by_shard[shard_index(hash)].push((position, hash, key));
  }
  by_shard
}

impl Cache {
  /// Looks up several keys at once.
  ///
  /// The result has one slot per input key, in input order. Hits behave like
  /// [`get`](Cache::get); expired entries found along the way are removed
  /// after the read pass.
  pub fn multiget<K>(&self, keys: &[K]) -> Vec<Option<ValueRef>>
  where
    K: AsRef<[u8]> + Sync,
  {
    let now = time::now();
    let by_shard = group_by_shard(keys);

    let per_shard: Vec<Vec<(usize, Option<ValueRef>)>> = by_shard
      .par_iter()
      .enumerate()
      .map(|(index, shard_keys)| {
        if shard_keys.is_empty() {
          return Vec::new();
        }

        let shard = self.store.shard_at(index);
        let mut expired = Vec::new();
        let found: Vec<(usize, Option<ValueRef>)> = shard.with_read(|table| {
          shard_keys
            .iter()
            .map(|&(position, hash, key)| match table.acquire(hash, key, now) {
              Lookup::Hit(value) => (position, Some(value)),
              Lookup::Expired => {
                expired.push((hash, key));
                (position, None)
              }
              Lookup::Miss => (position, None),
            })
            .collect()
        });

        for (hash, key) in expired {
          shard.remove_expired(hash, key, now);
        }
        for (_, value) in &found {
          match value {
            Some(_) => shard.metrics.record_hit(),
            None => shard.metrics.record_miss(),
          }
        }
        found
      })
      .collect();

    let mut results: Vec<Option<ValueRef>> = (0..keys.len()).map(|_| None).collect();
    for (position, value) in per_shard.into_iter().flatten() {
      results[position] = value;
    }
    results
  }

  /// Inserts several key/value pairs with the default TTL.
  ///
  /// Every entry is allocated before any shard is locked. If one allocation
  /// fails, nothing is published and the error is returned.
  pub fn multi_insert<I, K, V>(&self, items: I) -> Result<(), CacheError>
  where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
  {
    let mut by_shard: Vec<Vec<Pending>> = (0..SHARD_COUNT).map(|_| Vec::new()).collect();
    for (key, value) in items {
      let key = key.as_ref();
      let entry = self.allocate_entry(key, value.as_ref(), Duration::ZERO)?;
      let hash = hash_key(key);
      by_shard[shard_index(hash)].push(Pending { hash, entry });
    }

    by_shard
      .into_par_iter()
      .enumerate()
      .for_each(|(index, pending)| {
        if pending.is_empty() {
          return;
        }

        let shard = self.store.shard_at(index);
        let outcomes: Vec<_> = shard.with_write(|table| {
          pending
            .into_iter()
            .map(|item| {
              let (hash, entry) = item.publish();
              table.insert(hash, entry)
            })
            .collect()
        });
        for outcome in &outcomes {
          shard.metrics.record_insert(outcome);
        }
      });

    Ok(())
  }

  /// Removes several keys at once. Returns how many entries were removed.
  pub fn multi_invalidate<K>(&self, keys: &[K]) -> usize
  where
    K: AsRef<[u8]> + Sync,
  {
    group_by_shard(keys)
      .par_iter()
      .enumerate()
      .map(|(index, shard_keys)| {
        if shard_keys.is_empty() {
          return 0;
        }

        let shard = self.store.shard_at(index);
        let removed = shard.with_write(|table| {
          shard_keys
            .iter()
            .filter(|&&(_, hash, key)| table.remove(hash, key))
            .count()
        });
        for _ in 0..removed {
          shard.metrics.record_invalidation();
        }
        removed
      })
      .sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_group_by_shard_keeps_positions() {
    let keys: Vec<Vec<u8>> = (0..64u32).map(|i| format!("key-{i}").into_bytes()).collect();
    let groups = group_by_shard(&keys);

    assert_eq!(groups.len(), SHARD_COUNT);
    let mut positions: Vec<usize> = groups.iter().flatten().map(|&(position, _, _)| position).collect();
    positions.sort_unstable();
    assert_eq!(positions, (0..64).collect::<Vec<_>>());

    for (index, group) in groups.iter().enumerate() {
      for &(position, hash, key) in group {
        assert_eq!(shard_index(hash), index);
        assert_eq!(key, keys[position].as_slice());
      }
    }
  }

  #[test]
  fn test_dropped_pending_entry_is_freed() {
    let before = crate::entry::freed_on_this_thread();
    let entry = Entry::allocate(b"k", b"v", u32::MAX).unwrap();
    drop(Pending { hash: hash_key(b"k"), entry });
    assert_eq!(crate::entry::freed_on_this_thread(), before + 1);
  }
}
