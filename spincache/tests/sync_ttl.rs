mod common;

use common::new_test_cache;
use fibre_spincache::{time, Cache, TimeTicker};
use std::{thread, time::Duration};

const SHORT_TTL: Duration = Duration::from_secs(1);
// Clock resolution is one second, so wait past two boundaries.
const PAST_EXPIRY: Duration = Duration::from_millis(2_100);

#[test]
fn test_sync_item_expires_after_ttl() {
  let cache = new_test_cache(128);
  cache.insert_with_ttl(b"k", b"v", SHORT_TTL).unwrap();
  let shard = cache.shard_index(b"k");

  time::refresh();
  assert!(cache.get(b"k").is_some());

  thread::sleep(PAST_EXPIRY);
  time::refresh();

  assert!(cache.get(b"k").is_none(), "item should have expired");
  assert_eq!(cache.shard_stats()[shard].size, 0);

  let metrics = cache.metrics();
  assert_eq!(metrics.hits, 1);
  assert_eq!(metrics.misses, 1);
  assert_eq!(metrics.evicted_by_ttl, 1);
  assert_eq!(metrics.entries, 0);
}

#[test]
fn test_sync_default_ttl_applies_to_plain_insert() {
  let cache = Cache::new(128, SHORT_TTL).unwrap();
  assert_eq!(cache.default_ttl(), SHORT_TTL);
  cache.insert(b"k", b"v").unwrap();
  cache.insert_with_ttl(b"long", b"v", Duration::from_secs(60)).unwrap();

  thread::sleep(PAST_EXPIRY);
  time::refresh();

  assert!(cache.get(b"k").is_none());
  assert!(cache.get(b"long").is_some());
}

#[test]
fn test_sync_zero_ttl_means_default() {
  let cache = Cache::new(128, Duration::from_secs(60)).unwrap();
  cache.insert_with_ttl(b"k", b"v", Duration::ZERO).unwrap();
  let value = cache.get(b"k").unwrap();
  assert!(value.expires_at() >= time::now() + 59);
}

#[test]
fn test_sync_expired_borrow_stays_readable() {
  let cache = new_test_cache(128);
  cache.insert_with_ttl(b"k", b"v", SHORT_TTL).unwrap();
  let held = cache.get(b"k").unwrap();

  thread::sleep(PAST_EXPIRY);
  time::refresh();

  assert!(cache.get(b"k").is_none());
  assert_eq!(&*held, b"v");
}

#[test]
fn test_sync_contains_ignores_expired() {
  let cache = new_test_cache(128);
  cache.insert_with_ttl(b"k", b"v", SHORT_TTL).unwrap();
  assert!(cache.contains(b"k"));

  thread::sleep(PAST_EXPIRY);
  time::refresh();

  assert!(!cache.contains(b"k"));
  // `contains` does not remove anything.
  assert_eq!(cache.len(), 1);
}

#[test]
fn test_sync_purge_expired_removes_only_expired() {
  let cache = new_test_cache(256);
  for i in 0..10 {
    cache.insert_with_ttl(&common::key(i), b"short", SHORT_TTL).unwrap();
  }
  for i in 10..15 {
    cache
      .insert_with_ttl(&common::key(i), b"long", Duration::from_secs(600))
      .unwrap();
  }

  thread::sleep(PAST_EXPIRY);
  time::refresh();

  assert_eq!(cache.purge_expired(), 10);
  assert_eq!(cache.len(), 5);
  assert_eq!(cache.purge_expired(), 0);
  assert_eq!(cache.metrics().evicted_by_ttl, 10);
}

#[test]
fn test_sync_reinsert_after_expiry_is_live() {
  let cache = new_test_cache(128);
  cache.insert_with_ttl(b"k", b"old", SHORT_TTL).unwrap();

  thread::sleep(PAST_EXPIRY);
  cache.insert(b"k", b"new").unwrap();

  assert_eq!(&*cache.get(b"k").unwrap(), b"new");
  assert_eq!(cache.metrics().updates, 1);
}

#[test]
fn test_sync_ticker_refreshes_clock_without_writes() {
  let ticker = TimeTicker::spawn(Duration::from_millis(20)).unwrap();
  let cache = new_test_cache(128);
  cache.insert_with_ttl(b"k", b"v", SHORT_TTL).unwrap();

  thread::sleep(PAST_EXPIRY);

  assert!(cache.get(b"k").is_none());
  ticker.stop();
}

#[test]
fn test_sync_huge_ttl_saturates_instead_of_defaulting() {
  let cache = new_test_cache(128);
  cache.insert_with_ttl(b"forever", b"v", Duration::MAX).unwrap();
  cache
    .insert_with_ttl(b"nearly", b"v", Duration::new(u64::MAX, 1))
    .unwrap();

  assert_eq!(cache.get(b"forever").unwrap().expires_at(), u32::MAX);
  assert_eq!(cache.get(b"nearly").unwrap().expires_at(), u32::MAX);
}

#[test]
fn test_sync_huge_default_ttl_saturates() {
  let cache = Cache::new(128, Duration::MAX).unwrap();
  assert_eq!(cache.default_ttl(), Duration::from_secs(u32::MAX as u64));
  cache.insert(b"k", b"v").unwrap();
  assert_eq!(cache.get(b"k").unwrap().expires_at(), u32::MAX);
}
