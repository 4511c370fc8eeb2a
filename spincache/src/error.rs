use thiserror::Error;

/// Errors returned by cache construction and writes.
///
/// Misses are not errors (`get` returns `None`), and running out of evictable
/// entries is absorbed by the shard rather than reported.
#[derive(Debug, Error)]
pub enum CacheError {
  /// Memory for an entry block or a shard's slot array could not be obtained.
  /// Existing cache state is left untouched.
  #[error("failed to allocate {bytes} bytes")]
  AllocationFailed { bytes: usize },
  /// The key does not fit the 32-bit length field of an entry.
  #[error("key of {len} bytes exceeds the 4 GiB key limit")]
  KeyTooLarge { len: usize },
  /// The value does not fit the 32-bit length field of an entry.
  #[error("value of {len} bytes exceeds the 4 GiB value limit")]
  ValueTooLarge { len: usize },
  /// The background clock refresher thread could not be started.
  #[error("failed to spawn the time ticker thread")]
  TickerSpawn(#[source] std::io::Error),
}
