mod common;

use common::{key, new_test_cache};
use fibre_spincache::ValueRef;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const READ_ITERATIONS: usize = 1_000_000;

/// Builds a value whose every byte is derived from its length and seed, so a
/// reader can tell a whole value from a torn one.
fn self_describing_value(rng: &mut Pcg64) -> Vec<u8> {
  let len = rng.random_range(8..512usize);
  let seed: u8 = rng.random();
  let mut value = Vec::with_capacity(len);
  value.extend_from_slice(&(len as u32).to_le_bytes());
  value.push(seed);
  value.extend((value.len()..len).map(|i| seed.wrapping_add(i as u8)));
  value
}

fn assert_whole(value: &[u8]) {
  let len = u32::from_le_bytes(value[..4].try_into().unwrap()) as usize;
  assert_eq!(value.len(), len, "length prefix does not match");
  let seed = value[4];
  for (i, byte) in value.iter().enumerate().skip(5) {
    assert_eq!(*byte, seed.wrapping_add(i as u8), "torn value at byte {i}");
  }
}

#[test]
fn test_sync_reader_never_sees_torn_entry() {
  let cache = Arc::new(new_test_cache(128));
  let done = Arc::new(AtomicBool::new(false));
  let mut seed_rng = Pcg64::seed_from_u64(7);
  cache.insert(b"k", &self_describing_value(&mut seed_rng)).unwrap();

  let writer = {
    let cache = cache.clone();
    let done = done.clone();
    thread::spawn(move || {
      let mut rng = Pcg64::seed_from_u64(42);
      let mut writes = 0u64;
      while !done.load(Ordering::Relaxed) {
        cache.insert(b"k", &self_describing_value(&mut rng)).unwrap();
        writes += 1;
      }
      writes
    })
  };

  for _ in 0..READ_ITERATIONS {
    let value = cache.get(b"k").expect("key is never removed");
    assert_whole(&value);
  }
  done.store(true, Ordering::Relaxed);

  let writes = writer.join().unwrap();
  assert!(writes > 0);
}

#[test]
fn test_sync_concurrent_mixed_workload() {
  const THREADS: usize = 8;
  const OPS: usize = 20_000;
  const KEYS: usize = 64;

  let cache = Arc::new(new_test_cache(16 * 2));
  let barrier = Arc::new(Barrier::new(THREADS));

  let handles: Vec<_> = (0..THREADS)
    .map(|t| {
      let cache = cache.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        let mut rng = Pcg64::seed_from_u64(t as u64);
        let mut held: Vec<(usize, ValueRef)> = Vec::new();
        barrier.wait();

        for _ in 0..OPS {
          let k = rng.random_range(0..KEYS);
          match rng.random_range(0..10) {
            0..=4 => {
              if let Some(value) = cache.get(&key(k)) {
                assert_eq!(value.key(), key(k).as_slice());
                held.push((k, value));
              }
            }
            5..=7 => cache.insert(&key(k), format!("value-{k}").as_bytes()).unwrap(),
            _ => {
              cache.invalidate(&key(k));
            }
          }

          if held.len() > 16 {
            let (k, value) = held.remove(0);
            assert_eq!(&*value, format!("value-{k}").as_bytes());
          }
        }

        for (k, value) in held {
          assert_eq!(&*value, format!("value-{k}").as_bytes());
        }
      })
    })
    .collect();

  for handle in handles {
    handle.join().unwrap();
  }

  for stats in cache.shard_stats() {
    assert!(stats.size <= stats.bucket_count / 2);
  }
}

#[test]
fn test_sync_borrows_shared_across_threads() {
  let cache = new_test_cache(128);
  cache.insert(b"shared", b"payload").unwrap();
  let value = cache.get(b"shared").unwrap();

  let handles: Vec<_> = (0..4)
    .map(|_| {
      let value = value.clone();
      thread::spawn(move || {
        assert_eq!(&*value, b"payload");
        ValueRef::strong_count(&value)
      })
    })
    .collect();

  for handle in handles {
    assert!(handle.join().unwrap() >= 2);
  }

  drop(cache);
  assert_eq!(ValueRef::strong_count(&value), 1);
}

#[test]
fn test_sync_concurrent_inserts_different_shards() {
  const THREADS: usize = 4;
  const PER_THREAD: usize = 200;

  let cache = Arc::new(new_test_cache(THREADS * PER_THREAD * 2));
  let handles: Vec<_> = (0..THREADS)
    .map(|t| {
      let cache = cache.clone();
      thread::spawn(move || {
        for i in 0..PER_THREAD {
          let k = key(t * PER_THREAD + i);
          cache.insert(&k, &k).unwrap();
        }
      })
    })
    .collect();
  for handle in handles {
    handle.join().unwrap();
  }

  let metrics = cache.metrics();
  assert_eq!(metrics.inserts, (THREADS * PER_THREAD) as u64);
  assert_eq!(cache.len() as u64 + metrics.evicted_by_capacity, metrics.inserts);
}
