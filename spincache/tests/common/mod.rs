#![allow(dead_code)]

use fibre_spincache::Cache;
use std::time::Duration;

pub fn new_test_cache(capacity: usize) -> Cache {
  Cache::new(capacity, Duration::from_secs(60)).unwrap()
}

/// Generates `count` distinct keys that all hash into `shard`.
pub fn keys_for_shard(cache: &Cache, shard: usize, count: usize) -> Vec<Vec<u8>> {
  (0u64..)
    .map(|i| format!("shard-key-{i}").into_bytes())
    .filter(|key| cache.shard_index(key) == shard)
    .take(count)
    .collect()
}

pub fn key(i: usize) -> Vec<u8> {
  format!("key-{i}").into_bytes()
}
