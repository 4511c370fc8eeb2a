use crate::entry::Entry;

use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

/// A borrowed, zero-copy view of a cached value.
///
/// Returned by [`Cache::get`](crate::Cache::get). While a `ValueRef` is alive
/// the entry it points at stays allocated, even if the key is overwritten,
/// invalidated, evicted, or the whole cache is dropped. Dropping the
/// `ValueRef` releases the borrow; the last release frees the entry.
///
/// Cloning takes another reference on the same entry without copying bytes.
pub struct ValueRef {
  entry: NonNull<Entry>,
}

// SAFETY: the entry's bytes are immutable after publication and its mutable
// fields are atomics, so it can be shared and released from any thread.
unsafe impl Send for ValueRef {}
unsafe impl Sync for ValueRef {}

impl ValueRef {
  /// Wraps a reference the caller has already taken on `entry`.
  ///
  /// # Safety
  ///
  /// The caller transfers exactly one owned reference to the new `ValueRef`.
  #[inline]
  pub(crate) unsafe fn from_retained(entry: NonNull<Entry>) -> Self {
    Self { entry }
  }

  #[inline]
  fn header(&self) -> &Entry {
    // SAFETY: we own a reference, so the entry is alive.
    unsafe { self.entry.as_ref() }
  }

  /// The value bytes.
  #[inline]
  pub fn value(&self) -> &[u8] {
    self.header().value()
  }

  /// The key this value was stored under.
  #[inline]
  pub fn key(&self) -> &[u8] {
    self.header().key()
  }

  /// Absolute expiry of the entry, in UNIX seconds.
  #[inline]
  pub fn expires_at(&self) -> u32 {
    self.header().expires_at()
  }

  /// Number of live references to the underlying entry: one for the cache
  /// slot (if the cache still holds it) plus one per outstanding borrow.
  pub fn strong_count(this: &Self) -> usize {
    this.header().ref_count()
  }

  /// Whether both borrows point at the very same entry.
  pub fn ptr_eq(this: &Self, other: &Self) -> bool {
    this.entry == other.entry
  }
}

impl Clone for ValueRef {
  fn clone(&self) -> Self {
    self.header().retain();
    Self { entry: self.entry }
  }
}

impl Drop for ValueRef {
  #[inline]
  fn drop(&mut self) {
    // SAFETY: each ValueRef owns exactly one reference.
    unsafe { Entry::release(self.entry) };
  }
}

impl Deref for ValueRef {
  type Target = [u8];

  #[inline]
  fn deref(&self) -> &[u8] {
    self.value()
  }
}

impl AsRef<[u8]> for ValueRef {
  fn as_ref(&self) -> &[u8] {
    self.value()
  }
}

impl PartialEq<[u8]> for ValueRef {
  fn eq(&self, other: &[u8]) -> bool {
    self.value() == other
  }
}

impl<const N: usize> PartialEq<[u8; N]> for ValueRef {
  fn eq(&self, other: &[u8; N]) -> bool {
    self.value() == other
  }
}

impl fmt::Debug for ValueRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ValueRef")
      .field("key_len", &self.key().len())
      .field("value_len", &self.value().len())
      .field("expires_at", &self.expires_at())
      .finish()
  }
}
