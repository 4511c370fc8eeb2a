//! Key hashing and the shard/probe split of the hash.

use crate::SHARD_COUNT;

/// Hash values reserved as slot-state sentinels.
pub(crate) const EMPTY_HASH: u32 = 0;
pub(crate) const TOMBSTONE_HASH: u32 = 1;

/// Number of low hash bits consumed by shard selection.
pub(crate) const SHARD_BITS: u32 = SHARD_COUNT.trailing_zeros();

const MIX: u32 = 0x5bd1_e995;

/// Hashes `key` into a 32-bit value that is never `0` or `1`.
///
/// Each byte is folded in with a multiply/xor-shift step, then the state goes
/// through the MurmurHash3 `fmix32` finalizer. The state is seeded with the key
/// length so that keys that differ only by trailing zero bytes still diverge.
#[inline]
pub(crate) fn hash_key(key: &[u8]) -> u32 {
  let mut h = (key.len() as u32) ^ 0x9747_b28c;
  for &byte in key {
    h ^= byte as u32;
    h = h.wrapping_mul(MIX);
    h ^= h >> 15;
  }
  rebias(fmix32(h))
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
  h ^= h >> 16;
  h = h.wrapping_mul(0x85eb_ca6b);
  h ^= h >> 13;
  h = h.wrapping_mul(0xc2b2_ae35);
  h ^= h >> 16;
  h
}

/// Moves the sentinel values `0`/`1` to `2`/`3`.
#[inline]
pub(crate) fn rebias(hash: u32) -> u32 {
  if hash <= TOMBSTONE_HASH {
    hash + 2
  } else {
    hash
  }
}

/// The shard a hash belongs to (low bits).
#[inline]
pub(crate) fn shard_index(hash: u32) -> usize {
  (hash as usize) & (SHARD_COUNT - 1)
}

/// The in-shard probe start, derived from the bits above the shard selector.
#[inline]
pub(crate) fn probe_start(hash: u32, mask: usize) -> usize {
  ((hash >> SHARD_BITS) as usize) & mask
}
