use crate::{DEFAULT_CAPACITY, DEFAULT_TTL_SECS};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Plain-data cache configuration, suitable for loading from a config file.
///
/// Zero values mean "use the default": a capacity of `0` becomes
/// [`DEFAULT_CAPACITY`] and a TTL of `0` becomes [`DEFAULT_TTL_SECS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheConfig {
  /// Total number of entries, split evenly across the shards.
  pub capacity: usize,
  /// TTL applied when an insert does not specify one, in seconds.
  pub default_ttl_secs: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      capacity: DEFAULT_CAPACITY,
      default_ttl_secs: DEFAULT_TTL_SECS,
    }
  }
}
