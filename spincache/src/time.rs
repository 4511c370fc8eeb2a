//! The process-wide coarse clock used for TTL bookkeeping.
//!
//! Every `get` and `insert` consults [`now`], which is a single relaxed atomic
//! load instead of a `SystemTime::now()` call. The cell only moves when someone
//! calls [`refresh`]: the cache does so on every insert, and applications with
//! read-mostly workloads should refresh it from a timer (see
//! [`TimeTicker`](crate::TimeTicker)). A stale value delays expiry by at
//! most one refresh interval.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Seconds since the UNIX epoch. Initialized lazily on first use.
static NOW_SECS: Lazy<AtomicU32> = Lazy::new(|| AtomicU32::new(wall_clock_secs()));

#[inline]
fn wall_clock_secs() -> u32 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map_or(0, |elapsed| elapsed.as_secs().min(u32::MAX as u64) as u32)
}

/// Stores the current wall-clock time (in whole seconds) into the shared cell.
#[inline]
pub fn refresh() {
  NOW_SECS.store(wall_clock_secs(), Ordering::Relaxed);
}

/// Returns the last refreshed UNIX time in seconds.
#[inline]
pub fn now() -> u32 {
  NOW_SECS.load(Ordering::Relaxed)
}

/// Absolute expiry for an entry written at `now` that lives for `ttl_secs`.
#[inline]
pub(crate) fn expiry_after(now: u32, ttl_secs: u32) -> u32 {
  now.saturating_add(ttl_secs)
}

/// Whole seconds for a TTL, rounding sub-second remainders up so that a
/// non-zero duration never becomes "expires immediately".
#[inline]
pub(crate) fn duration_to_secs(ttl: Duration) -> u32 {
  let secs = ttl
    .as_secs()
    .saturating_add(u64::from(ttl.subsec_nanos() > 0));
  secs.min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_now_is_initialized_from_wall_clock() {
    let wall = wall_clock_secs();
    let cached = now();
    assert!(cached > 0);
    assert!(wall.abs_diff(cached) <= 2, "cached clock {} too far from {}", cached, wall);
  }

  #[test]
  fn test_refresh_tracks_wall_clock() {
    let before = wall_clock_secs();
    refresh();
    let after = now();
    assert!(after >= before);
    assert!(after <= wall_clock_secs());
  }

  #[test]
  fn test_duration_to_secs_rounds_up() {
    assert_eq!(duration_to_secs(Duration::ZERO), 0);
    assert_eq!(duration_to_secs(Duration::from_millis(1)), 1);
    assert_eq!(duration_to_secs(Duration::from_millis(1_500)), 2);
    assert_eq!(duration_to_secs(Duration::from_secs(60)), 60);
    assert_eq!(duration_to_secs(Duration::MAX), u32::MAX);
    assert_eq!(duration_to_secs(Duration::new(u64::MAX, 1)), u32::MAX);
    assert_eq!(duration_to_secs(Duration::from_secs(u32::MAX as u64 + 7)), u32::MAX);
  }

  #[test]
  fn test_expiry_saturates() {
    assert_eq!(expiry_after(100, 20), 120);
    assert_eq!(expiry_after(u32::MAX - 1, 10), u32::MAX);
  }
}
