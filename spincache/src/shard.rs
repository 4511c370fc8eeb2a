//! One shard: an open-addressed table of packed 16-byte slots behind a
//! reader/writer spinlock.
//!
//! # Slot encoding
//!
//! Each slot is a metadata word plus an entry pointer. The metadata packs
//! `[hash:32 | key_len:32]`, and its top half doubles as the state tag:
//!
//! - `0` -> EMPTY, entry is `None`
//! - `1` -> TOMBSTONE, entry is `None`
//! - `>= 2` -> OCCUPIED with that hash, entry is `Some`
//!
//! Key hashes are rebiased away from `0`/`1`, so a lookup compares the whole
//! metadata word in a single load and only dereferences the entry (to compare
//! key bytes) when hash and length both match.

use crate::entry::Entry;
use crate::error::CacheError;
use crate::hash::{probe_start, EMPTY_HASH, TOMBSTONE_HASH};
use crate::metrics::ShardMetrics;
use crate::sync::RwSpinLock;
use crate::value::ValueRef;
use crate::{CACHE_LINE_SIZE, INITIAL_BUCKET_MULTIPLIER};

use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;

use tracing::trace;

pub(crate) const SLOTS_PER_LINE: usize = CACHE_LINE_SIZE / size_of::<Slot>();

/// Smallest slot array a shard is built with (one cache line).
const MIN_BUCKETS: usize = SLOTS_PER_LINE;

const EMPTY_META: u64 = (EMPTY_HASH as u64) << 32;
const TOMBSTONE_META: u64 = (TOMBSTONE_HASH as u64) << 32;

#[inline]
fn pack(hash: u32, key_len: u32) -> u64 {
  ((hash as u64) << 32) | key_len as u64
}

#[inline]
fn meta_hash(meta: u64) -> u32 {
  (meta >> 32) as u32
}

#[derive(Clone, Copy)]
#[repr(C, align(16))]
pub(crate) struct Slot {
  meta: u64,
  entry: Option<NonNull<Entry>>,
}

impl Slot {
  const EMPTY: Slot = Slot {
    meta: EMPTY_META,
    entry: None,
  };

  #[inline]
  pub(crate) fn is_occupied(&self) -> bool {
    meta_hash(self.meta) > TOMBSTONE_HASH
  }

  #[inline]
  fn is_empty(&self) -> bool {
    meta_hash(self.meta) == EMPTY_HASH
  }

  #[inline]
  fn is_tombstone(&self) -> bool {
    meta_hash(self.meta) == TOMBSTONE_HASH
  }
}

#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct SlotLine([Slot; SLOTS_PER_LINE]);

const _: () = assert!(size_of::<Slot>() == 16);
const _: () = assert!(size_of::<SlotLine>() == CACHE_LINE_SIZE);

/// Result of probing for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
  /// The key lives at this index.
  Found(usize),
  /// Probing hit an EMPTY slot; insert at the first tombstone seen, else here.
  Vacant(usize),
  /// Probing wrapped the whole table without seeing EMPTY.
  Full(usize),
}

/// What an insert did to the table, for the shard's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InsertOutcome {
  pub(crate) replaced: bool,
  pub(crate) evicted: bool,
  pub(crate) eviction_failed: bool,
  pub(crate) compacted: bool,
}

/// The open-addressed table. Mutated only under the shard's write lock.
pub(crate) struct SlotTable {
  lines: Box<[SlotLine]>,
  mask: usize,
  size: usize,
  capacity: usize,
  tombstones: usize,
  pub(crate) clock_hand: usize,
}

// SAFETY: the raw entry pointers are owned references to immutable-after-
// publication entries whose mutable fields are atomics.
unsafe impl Send for SlotTable {}
unsafe impl Sync for SlotTable {}

impl SlotTable {
  /// Builds an empty table for a soft limit of `capacity` entries.
  ///
  /// The bucket count is the next power of two of `2 * capacity` (at least one
  /// cache line of slots), keeping the load factor at or below one half.
  pub(crate) fn with_capacity(capacity: usize) -> Result<Self, CacheError> {
    let capacity = capacity.max(1);
    let buckets = capacity
      .checked_mul(INITIAL_BUCKET_MULTIPLIER)
      .and_then(usize::checked_next_power_of_two)
      .ok_or(CacheError::AllocationFailed { bytes: usize::MAX })?
      .max(MIN_BUCKETS);

    let line_count = buckets / SLOTS_PER_LINE;
    let mut lines = Vec::new();
    lines
      .try_reserve_exact(line_count)
      .map_err(|_| CacheError::AllocationFailed {
        bytes: line_count.saturating_mul(CACHE_LINE_SIZE),
      })?;
    lines.resize(line_count, SlotLine([Slot::EMPTY; SLOTS_PER_LINE]));

    Ok(Self {
      lines: lines.into_boxed_slice(),
      mask: buckets - 1,
      size: 0,
      capacity,
      tombstones: 0,
      clock_hand: 0,
    })
  }

  #[inline]
  pub(crate) fn bucket_count(&self) -> usize {
    self.mask + 1
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.size
  }

  #[inline]
  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }

  #[inline]
  pub(crate) fn tombstones(&self) -> usize {
    self.tombstones
  }

  #[inline]
  pub(crate) fn slot(&self, index: usize) -> &Slot {
    &self.lines[index / SLOTS_PER_LINE].0[index % SLOTS_PER_LINE]
  }

  #[inline]
  fn slot_mut(&mut self, index: usize) -> &mut Slot {
    &mut self.lines[index / SLOTS_PER_LINE].0[index % SLOTS_PER_LINE]
  }

  /// The live entry at an OCCUPIED slot.
  #[inline]
  pub(crate) fn entry_at(&self, index: usize) -> Option<&Entry> {
    // SAFETY: the table owns a reference to every entry it points at, and the
    // borrow of `self` keeps the slot from being cleared meanwhile.
    self.slot(index).entry.map(|entry| unsafe { &*entry.as_ptr() })
  }

  /// Prefetches the cache line holding `index`.
  #[inline]
  fn prefetch(&self, index: usize) {
    let line = &self.lines[(index & self.mask) / SLOTS_PER_LINE] as *const SlotLine as *const i8;

    #[cfg(all(target_arch = "x86_64", target_feature = "sse"))]
    unsafe {
      std::arch::x86_64::_mm_prefetch::<{ std::arch::x86_64::_MM_HINT_T0 }>(line);
    }

    #[cfg(target_arch = "aarch64")]
    unsafe {
      // PRFM PLDL1KEEP - prefetch for load, L1 cache, keep in cache
      std::arch::asm!(
        "prfm pldl1keep, [{ptr}]",
        ptr = in(reg) line,
        options(nostack, preserves_flags)
      );
    }

    #[cfg(not(any(
      all(target_arch = "x86_64", target_feature = "sse"),
      target_arch = "aarch64"
    )))]
    let _ = line;
  }

  /// Linear probe for `key`, four slots at a time.
  ///
  /// Stops at the first EMPTY slot. The first TOMBSTONE on the way is
  /// remembered as the preferred insertion point.
  pub(crate) fn find_slot(&self, hash: u32, key: &[u8]) -> Probe {
    let wanted = pack(hash, key.len() as u32);
    let start = probe_start(hash, self.mask);
    let mut first_tombstone = None;

    let mut probed = 0;
    while probed < self.bucket_count() {
      self.prefetch(start + probed + SLOTS_PER_LINE);
      for offset in 0..SLOTS_PER_LINE {
        let index = (start + probed + offset) & self.mask;
        let slot = self.slot(index);
        if slot.meta == wanted {
          if let Some(entry) = self.entry_at(index) {
            if entry.key() == key {
              return Probe::Found(index);
            }
          }
        } else if slot.is_empty() {
          return Probe::Vacant(first_tombstone.unwrap_or(index));
        } else if slot.is_tombstone() && first_tombstone.is_none() {
          first_tombstone = Some(index);
        }
      }
      probed += SLOTS_PER_LINE;
    }

    Probe::Full(first_tombstone.unwrap_or(start))
  }

  /// Returns the live entry for `key`, whether or not it has expired.
  #[inline]
  pub(crate) fn lookup(&self, hash: u32, key: &[u8]) -> Option<&Entry> {
    match self.find_slot(hash, key) {
      Probe::Found(index) => self.entry_at(index),
      Probe::Vacant(_) | Probe::Full(_) => None,
    }
  }

  /// Looks `key` up and, if it is live, marks it used and takes a borrow.
  ///
  /// Callers must hold at least the read lock for the whole call.
  pub(crate) fn acquire(&self, hash: u32, key: &[u8], now: u32) -> Lookup {
    match self.lookup(hash, key) {
      None => Lookup::Miss,
      Some(entry) if entry.is_expired(now) => Lookup::Expired,
      Some(entry) => {
        entry.touch();
        entry.retain();
        // SAFETY: `retain` took the reference this borrow now owns.
        Lookup::Hit(unsafe { ValueRef::from_retained(NonNull::from(entry)) })
      }
    }
  }

  /// Publishes `entry` under `hash`, taking over the caller's reference.
  ///
  /// At capacity, one CLOCK pass runs first. If it cannot free a slot the
  /// insert still goes ahead and the shard sits briefly above its soft limit.
  pub(crate) fn insert(&mut self, hash: u32, entry: NonNull<Entry>) -> InsertOutcome {
    let mut outcome = InsertOutcome::default();

    if self.size >= self.capacity {
      if self.evict_one() {
        outcome.evicted = true;
      } else {
        outcome.eviction_failed = true;
        trace!(size = self.size, capacity = self.capacity, "clock sweep reclaimed nothing");
      }
    }

    if self.needs_compaction() {
      self.compact();
      outcome.compacted = true;
    }

    // SAFETY: the caller handed us a live, owned reference.
    let key = unsafe { entry.as_ref() }.key();
    match self.find_slot(hash, key) {
      Probe::Found(index) => {
        let slot = self.slot_mut(index);
        let old = slot.entry.replace(entry);
        if let Some(old) = old {
          // SAFETY: the slot's reference to the displaced entry is dropped here.
          unsafe { Entry::release(old) };
        }
        outcome.replaced = true;
      }
      Probe::Vacant(index) | Probe::Full(index) => {
        let wanted = pack(hash, key.len() as u32);
        let slot = *self.slot(index);
        if slot.is_tombstone() {
          self.tombstones -= 1;
        }
        if let Some(old) = slot.entry {
          // Degenerate full-table fallback landed on a live entry.
          unsafe { Entry::release(old) };
        } else {
          self.size += 1;
        }
        *self.slot_mut(index) = Slot {
          meta: wanted,
          entry: Some(entry),
        };
      }
    }

    outcome
  }

  /// Turns the OCCUPIED slot at `index` into a tombstone and drops the
  /// table's reference to its entry.
  pub(crate) fn remove_at(&mut self, index: usize) {
    let slot = self.slot_mut(index);
    debug_assert!(slot.is_occupied());
    let old = slot.entry.take();
    slot.meta = TOMBSTONE_META;
    self.size -= 1;
    self.tombstones += 1;
    if let Some(old) = old {
      // SAFETY: the table owned this reference.
      unsafe { Entry::release(old) };
    }
  }

  /// Removes `key` if present.
  pub(crate) fn remove(&mut self, hash: u32, key: &[u8]) -> bool {
    match self.find_slot(hash, key) {
      Probe::Found(index) => {
        self.remove_at(index);
        true
      }
      Probe::Vacant(_) | Probe::Full(_) => false,
    }
  }

  /// Removes `key` only if it is still expired at `now`.
  ///
  /// Used by lazy expiration: between the reader dropping its lock and this
  /// call, a writer may already have replaced the stale entry.
  pub(crate) fn remove_expired(&mut self, hash: u32, key: &[u8], now: u32) -> bool {
    match self.find_slot(hash, key) {
      Probe::Found(index) if self.entry_at(index).is_some_and(|entry| entry.is_expired(now)) => {
        self.remove_at(index);
        true
      }
      _ => false,
    }
  }

  /// Removes every expired entry, returning how many were dropped.
  pub(crate) fn purge_expired(&mut self, now: u32) -> usize {
    let mut purged = 0;
    for index in 0..self.bucket_count() {
      if self.entry_at(index).is_some_and(|entry| entry.is_expired(now)) {
        self.remove_at(index);
        purged += 1;
      }
    }
    purged
  }

  /// Releases every entry and resets the table to all-EMPTY.
  pub(crate) fn clear(&mut self) {
    self.release_all();
    for line in self.lines.iter_mut() {
      *line = SlotLine([Slot::EMPTY; SLOTS_PER_LINE]);
    }
    self.size = 0;
    self.tombstones = 0;
    self.clock_hand = 0;
  }

  fn release_all(&mut self) {
    for line in self.lines.iter_mut() {
      for slot in line.0.iter_mut() {
        if let Some(entry) = slot.entry.take() {
          // SAFETY: the table owned this reference.
          unsafe { Entry::release(entry) };
        }
      }
    }
  }

  /// Tombstones plus live entries crowd out EMPTY slots, which probes need in
  /// order to terminate early. Rebuild once they reach three quarters.
  #[inline]
  fn needs_compaction(&self) -> bool {
    self.tombstones > 0 && self.size + self.tombstones >= self.bucket_count() * 3 / 4
  }

  /// Rebuilds the table in place without tombstones.
  ///
  /// Starting just after a slot that was EMPTY before the rebuild, every live
  /// entry is lifted out and re-probed from its home index. No probe chain can
  /// cross that EMPTY slot, so every chain is re-laid in order and only ever
  /// moves entries backwards. Needs no allocation, so it is safe under the
  /// write lock.
  pub(crate) fn compact(&mut self) {
    let buckets = self.bucket_count();
    let Some(anchor) = (0..buckets).find(|&index| self.slot(index).is_empty()) else {
      // Unreachable while compaction keeps a quarter of the table EMPTY.
      debug_assert!(false, "compaction needs at least one EMPTY slot");
      return;
    };

    for index in 0..buckets {
      if self.slot(index).is_tombstone() {
        *self.slot_mut(index) = Slot::EMPTY;
      }
    }

    for step in 1..buckets {
      let index = (anchor + step) & self.mask;
      let slot = *self.slot(index);
      if !slot.is_occupied() {
        continue;
      }
      *self.slot_mut(index) = Slot::EMPTY;
      let mut target = probe_start(meta_hash(slot.meta), self.mask);
      while !self.slot(target).is_empty() {
        target = (target + 1) & self.mask;
      }
      *self.slot_mut(target) = slot;
    }

    trace!(
      size = self.size,
      tombstones = self.tombstones,
      buckets,
      "compacted shard"
    );
    self.tombstones = 0;
    self.clock_hand = 0;
  }
}

impl Drop for SlotTable {
  fn drop(&mut self) {
    // Outstanding borrows keep their entries alive through the refcount.
    self.release_all();
  }
}

impl fmt::Debug for SlotTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SlotTable")
      .field("size", &self.size)
      .field("capacity", &self.capacity)
      .field("buckets", &self.bucket_count())
      .field("tombstones", &self.tombstones)
      .field("clock_hand", &self.clock_hand)
      .finish()
  }
}

/// Outcome of a read-locked lookup.
pub(crate) enum Lookup {
  Hit(ValueRef),
  Expired,
  Miss,
}

/// Point-in-time statistics for a single shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardStats {
  /// Number of OCCUPIED slots.
  pub size: usize,
  /// Soft limit that triggers CLOCK eviction.
  pub capacity: usize,
  /// Length of the slot array (a power of two).
  pub bucket_count: usize,
  /// Slots holding a TOMBSTONE.
  pub tombstones: usize,
}

/// A table, its lock, and its counters.
#[derive(Debug)]
pub(crate) struct Shard {
  table: RwSpinLock<SlotTable>,
  pub(crate) metrics: ShardMetrics,
}

impl Shard {
  pub(crate) fn new(capacity: usize) -> Result<Self, CacheError> {
    Ok(Self {
      table: RwSpinLock::new(SlotTable::with_capacity(capacity)?),
      metrics: ShardMetrics::default(),
    })
  }

  /// Read-locked lookup. On a live hit the clock bit is set and a borrow is
  /// taken before the read lock is released, so a concurrent replacement
  /// cannot free the entry under the caller.
  pub(crate) fn get(&self, hash: u32, key: &[u8], now: u32) -> Lookup {
    // The read guard drops at the end of this statement, before any counter work.
    let lookup = self.table.read().acquire(hash, key, now);

    match lookup {
      Lookup::Hit(_) => self.metrics.record_hit(),
      Lookup::Expired | Lookup::Miss => self.metrics.record_miss(),
    }
    lookup
  }

  /// Whether a live, unexpired entry exists. Leaves clock bits and counters alone.
  pub(crate) fn contains(&self, hash: u32, key: &[u8], now: u32) -> bool {
    self
      .table
      .read()
      .lookup(hash, key)
      .is_some_and(|entry| !entry.is_expired(now))
  }

  pub(crate) fn insert(&self, hash: u32, entry: NonNull<Entry>) {
    let outcome = self.table.write().insert(hash, entry);
    self.metrics.record_insert(&outcome);
  }

  pub(crate) fn invalidate(&self, hash: u32, key: &[u8]) -> bool {
    let removed = self.table.write().remove(hash, key);
    if removed {
      self.metrics.record_invalidation();
    }
    removed
  }

  pub(crate) fn remove_expired(&self, hash: u32, key: &[u8], now: u32) -> bool {
    let removed = self.table.write().remove_expired(hash, key, now);
    if removed {
      self.metrics.record_expired(1);
    }
    removed
  }

  pub(crate) fn purge_expired(&self, now: u32) -> usize {
    let purged = self.table.write().purge_expired(now);
    self.metrics.record_expired(purged as u64);
    purged
  }

  pub(crate) fn compact(&self) {
    let mut guard = self.table.write();
    if guard.tombstones() > 0 {
      guard.compact();
      drop(guard);
      self.metrics.record_compaction();
    }
  }

  pub(crate) fn clear(&self) {
    self.table.write().clear();
  }

  pub(crate) fn stats(&self) -> ShardStats {
    let guard = self.table.read();
    ShardStats {
      size: guard.len(),
      capacity: guard.capacity(),
      bucket_count: guard.bucket_count(),
      tombstones: guard.tombstones(),
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.table.read().len()
  }

  /// Runs `f` with the table read-locked.
  #[cfg(feature = "bulk")]
  pub(crate) fn with_read<R>(&self, f: impl FnOnce(&SlotTable) -> R) -> R {
    f(&self.table.read())
  }

  /// Runs `f` with the table write-locked.
  #[cfg(feature = "bulk")]
  pub(crate) fn with_write<R>(&self, f: impl FnOnce(&mut SlotTable) -> R) -> R {
    f(&mut self.table.write())
  }
}
