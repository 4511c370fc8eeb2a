//! CLOCK (second-chance) eviction over a shard's slot array.
//!
//! Every entry carries a one-bit reference flag that reads set (with a silent
//! store) and the sweep clears. The hand walks the slot array itself, so there
//! is no separate recency structure to keep in sync and reads never write to
//! shared bookkeeping.

use crate::shard::SlotTable;

/// Passes over the slot array a single sweep may make. The first pass demotes
/// every set bit, so the second is guaranteed to find a victim when the shard
/// holds at least one entry.
const SWEEP_PASSES: usize = 2;

impl SlotTable {
  /// Evicts one entry using the clock hand.
  ///
  /// Scans at most `2 * bucket_count` slots starting at the hand, skipping
  /// EMPTY and TOMBSTONE slots. Referenced entries get their bit cleared and
  /// are passed over; the first unreferenced entry is tombstoned and released.
  /// Returns `false` if the scan limit ran out without a victim.
  pub(crate) fn evict_one(&mut self) -> bool {
    let buckets = self.bucket_count();
    let mask = buckets - 1;

    for _ in 0..buckets * SWEEP_PASSES {
      let index = self.clock_hand;
      self.clock_hand = (index + 1) & mask;

      let Some(entry) = self.entry_at(index) else {
        continue;
      };
      if entry.is_referenced() {
        entry.clear_referenced();
        continue;
      }

      self.remove_at(index);
      return true;
    }

    false
  }
}
