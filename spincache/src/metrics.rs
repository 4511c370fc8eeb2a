use crate::shard::InsertOutcome;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Lock-free counters kept per shard, so that readers of different shards
/// never write to the same cache line.
#[derive(Debug, Default)]
pub(crate) struct ShardMetrics {
  // --- Hit/Miss Ratios ---
  hits: CachePadded<AtomicU64>,
  misses: CachePadded<AtomicU64>,

  // --- Throughput ---
  inserts: AtomicU64,
  updates: AtomicU64,
  invalidations: AtomicU64,

  // --- Eviction Stats ---
  evicted_by_capacity: AtomicU64,
  evicted_by_ttl: AtomicU64,
  eviction_failures: AtomicU64,
  compactions: AtomicU64,
}

impl ShardMetrics {
  #[inline]
  pub(crate) fn record_hit(&self) {
    self.hits.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn record_miss(&self) {
    self.misses.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_insert(&self, outcome: &InsertOutcome) {
    self.inserts.fetch_add(1, Ordering::Relaxed);
    if outcome.replaced {
      self.updates.fetch_add(1, Ordering::Relaxed);
    }
    if outcome.evicted {
      self.evicted_by_capacity.fetch_add(1, Ordering::Relaxed);
    }
    if outcome.eviction_failed {
      self.eviction_failures.fetch_add(1, Ordering::Relaxed);
    }
    if outcome.compacted {
      self.compactions.fetch_add(1, Ordering::Relaxed);
    }
  }

  pub(crate) fn record_invalidation(&self) {
    self.invalidations.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_expired(&self, count: u64) {
    self.evicted_by_ttl.fetch_add(count, Ordering::Relaxed);
  }

  pub(crate) fn record_compaction(&self) {
    self.compactions.fetch_add(1, Ordering::Relaxed);
  }

  /// Adds this shard's counters into `snapshot`.
  pub(crate) fn accumulate(&self, snapshot: &mut MetricsSnapshot) {
    snapshot.hits += self.hits.load(Ordering::Relaxed);
    snapshot.misses += self.misses.load(Ordering::Relaxed);
    snapshot.inserts += self.inserts.load(Ordering::Relaxed);
    snapshot.updates += self.updates.load(Ordering::Relaxed);
    snapshot.invalidations += self.invalidations.load(Ordering::Relaxed);
    snapshot.evicted_by_capacity += self.evicted_by_capacity.load(Ordering::Relaxed);
    snapshot.evicted_by_ttl += self.evicted_by_ttl.load(Ordering::Relaxed);
    snapshot.eviction_failures += self.eviction_failures.load(Ordering::Relaxed);
    snapshot.compactions += self.compactions.load(Ordering::Relaxed);
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
///
/// Counters are summed shard by shard without a global lock, so a snapshot
/// taken under concurrent traffic is approximate.
#[derive(Clone, Default)]
pub struct MetricsSnapshot {
  /// The number of successful lookups.
  pub hits: u64,
  /// The number of failed lookups, including expired entries.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// The total number of successful inserts, replacements included.
  pub inserts: u64,
  /// The number of inserts that replaced an existing key.
  pub updates: u64,
  /// The total number of manual invalidations that removed an entry.
  pub invalidations: u64,
  /// The number of entries evicted by the CLOCK sweep.
  pub evicted_by_capacity: u64,
  /// The number of entries removed because their TTL had passed.
  pub evicted_by_ttl: u64,
  /// Inserts that found their shard full and could not reclaim a slot.
  pub eviction_failures: u64,
  /// Number of tombstone compactions performed.
  pub compactions: u64,
  /// Live entries across all shards.
  pub entries: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl MetricsSnapshot {
  pub(crate) fn finish(mut self, entries: u64, uptime_secs: u64) -> Self {
    let total_lookups = self.hits + self.misses;
    self.hit_ratio = if total_lookups == 0 {
      0.0
    } else {
      self.hits as f64 / total_lookups as f64
    };
    self.entries = entries;
    self.uptime_secs = uptime_secs;
    self
  }
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("inserts", &self.inserts)
      .field("updates", &self.updates)
      .field("invalidations", &self.invalidations)
      .field("evicted_by_capacity", &self.evicted_by_capacity)
      .field("evicted_by_ttl", &self.evicted_by_ttl)
      .field("eviction_failures", &self.eviction_failures)
      .field("compactions", &self.compactions)
      .field("entries", &self.entries)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
