//! Heap-allocated, reference-counted cache entry with inline key and value.
//!
//! # Memory Layout
//!
//! ```text
//! +----------------+
//! |   ref_count    |  usize  - live references (cache slot + borrows)
//! +----------------+
//! |   expires_at   |  4 bytes - absolute UNIX seconds
//! +----------------+
//! |    key_len     |  4 bytes
//! +----------------+
//! |   value_len    |  4 bytes
//! +----------------+
//! |   clock_bit    |  1 byte  - CLOCK reference flag
//! +----------------+
//! |      key       |  key_len bytes
//! +----------------+
//! |      NUL       |  1 byte
//! +----------------+
//! |     value      |  value_len bytes
//! +----------------+
//! ```
//!
//! Everything except `ref_count` and `clock_bit` is written once before the
//! entry is published to a shard and never changes afterwards.

use crate::error::CacheError;

use std::alloc::{alloc, dealloc, Layout};
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Refcounts beyond this are treated as a leak and abort, as `Arc` does.
const MAX_REF_COUNT: usize = isize::MAX as usize;

#[repr(C)]
pub(crate) struct Entry {
  ref_count: AtomicUsize,
  expires_at: u32,
  key_len: u32,
  value_len: u32,
  clock_bit: AtomicU8,
  // Key, NUL and value follow the header.
  _data: [u8; 0],
}

#[inline]
const fn header_size() -> usize {
  size_of::<Entry>()
}

#[inline]
fn layout_for(key_len: usize, value_len: usize) -> Option<Layout> {
  let total = header_size()
    .checked_add(key_len)?
    .checked_add(1)?
    .checked_add(value_len)?;
  Layout::from_size_align(total, align_of::<Entry>()).ok()
}

#[cfg(test)]
thread_local! {
  static FREED: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Number of entries freed on the current thread (test builds only).
#[cfg(test)]
pub(crate) fn freed_on_this_thread() -> usize {
  FREED.with(|freed| freed.get())
}

impl Entry {
  /// Allocates an entry with `ref_count = 1` and the clock bit set.
  ///
  /// The returned pointer owns one reference; hand it to a shard or drop it
  /// with [`Entry::release`].
  pub(crate) fn allocate(
    key: &[u8],
    value: &[u8],
    expires_at: u32,
  ) -> Result<NonNull<Self>, CacheError> {
    let key_len =
      u32::try_from(key.len()).map_err(|_| CacheError::KeyTooLarge { len: key.len() })?;
    let value_len =
      u32::try_from(value.len()).map_err(|_| CacheError::ValueTooLarge { len: value.len() })?;
    let layout = layout_for(key.len(), value.len()).ok_or(CacheError::AllocationFailed {
      bytes: usize::MAX,
    })?;

    // SAFETY: the layout is never zero-sized (the header alone is non-empty).
    let raw = unsafe { alloc(layout) };
    let Some(block) = NonNull::new(raw) else {
      return Err(CacheError::AllocationFailed {
        bytes: layout.size(),
      });
    };
    let entry = block.cast::<Entry>();

    // SAFETY: `block` is a fresh allocation sized for header + key + NUL + value.
    unsafe {
      let header = entry.as_ptr();
      ptr::addr_of_mut!((*header).ref_count).write(AtomicUsize::new(1));
      ptr::addr_of_mut!((*header).expires_at).write(expires_at);
      ptr::addr_of_mut!((*header).key_len).write(key_len);
      ptr::addr_of_mut!((*header).value_len).write(value_len);
      ptr::addr_of_mut!((*header).clock_bit).write(AtomicU8::new(1));

      let key_ptr = raw.add(header_size());
      ptr::copy_nonoverlapping(key.as_ptr(), key_ptr, key.len());
      key_ptr.add(key.len()).write(0);
      ptr::copy_nonoverlapping(value.as_ptr(), key_ptr.add(key.len() + 1), value.len());
    }

    Ok(entry)
  }

  /// Takes one more reference.
  ///
  /// Relaxed is enough: the caller already holds a reference or a shard lock
  /// that orders against the publishing write.
  #[inline]
  pub(crate) fn retain(&self) {
    let previous = self.ref_count.fetch_add(1, Ordering::Relaxed);
    if previous > MAX_REF_COUNT {
      std::process::abort();
    }
  }

  /// Drops one reference and frees the block if it was the last one.
  ///
  /// # Safety
  ///
  /// The caller must own one reference to `entry` and must not touch the entry
  /// through that reference afterwards.
  #[inline]
  pub(crate) unsafe fn release(entry: NonNull<Self>) {
    // AcqRel: the last decrementer must observe every other holder's reads
    // before the block is freed.
    if entry.as_ref().ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
      Self::free(entry);
    }
  }

  unsafe fn free(entry: NonNull<Self>) {
    let header = entry.as_ref();
    let layout = Layout::from_size_align_unchecked(
      header_size() + header.key_len as usize + 1 + header.value_len as usize,
      align_of::<Entry>(),
    );
    dealloc(entry.as_ptr().cast(), layout);

    #[cfg(test)]
    FREED.with(|freed| freed.set(freed.get() + 1));
  }

  #[inline]
  pub(crate) fn ref_count(&self) -> usize {
    self.ref_count.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn expires_at(&self) -> u32 {
    self.expires_at
  }

  /// Expired iff `now >= expires_at`.
  #[inline]
  pub(crate) fn is_expired(&self, now: u32) -> bool {
    now >= self.expires_at
  }

  #[cfg(test)]
  pub(crate) fn key_len(&self) -> usize {
    self.key_len as usize
  }

  #[inline]
  pub(crate) fn key(&self) -> &[u8] {
    // SAFETY: the key bytes were initialized by `allocate` and never change.
    unsafe {
      let key_ptr = (self as *const Self).cast::<u8>().add(header_size());
      std::slice::from_raw_parts(key_ptr, self.key_len as usize)
    }
  }

  #[inline]
  pub(crate) fn value(&self) -> &[u8] {
    // SAFETY: the value bytes were initialized by `allocate` and never change.
    unsafe {
      let value_ptr = (self as *const Self)
        .cast::<u8>()
        .add(header_size() + self.key_len as usize + 1);
      std::slice::from_raw_parts(value_ptr, self.value_len as usize)
    }
  }

  /// Marks the entry as recently used. Skips the store when the bit is
  /// already set so hot keys do not bounce their cache line between cores.
  #[inline]
  pub(crate) fn touch(&self) {
    if self.clock_bit.load(Ordering::Relaxed) == 0 {
      self.clock_bit.store(1, Ordering::Relaxed);
    }
  }

  #[inline]
  pub(crate) fn is_referenced(&self) -> bool {
    self.clock_bit.load(Ordering::Relaxed) != 0
  }

  /// Second chance: clears the clock bit.
  #[inline]
  pub(crate) fn clear_referenced(&self) {
    self.clock_bit.store(0, Ordering::Relaxed);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_allocate_lays_out_key_nul_and_value() {
    let entry = Entry::allocate(b"hello", b"world!", 42).unwrap();
    let header = unsafe { entry.as_ref() };

    assert_eq!(header.key(), b"hello");
    assert_eq!(header.value(), b"world!");
    assert_eq!(header.key_len(), 5);
    assert_eq!(header.expires_at(), 42);
    assert_eq!(header.ref_count(), 1);
    assert!(header.is_referenced(), "new entries start with the clock bit set");

    let nul = unsafe { *(entry.as_ptr().cast::<u8>()).add(header_size() + 5) };
    assert_eq!(nul, 0);

    unsafe { Entry::release(entry) };
  }

  #[test]
  fn test_empty_key_and_value() {
    let entry = Entry::allocate(b"", b"", 0).unwrap();
    let header = unsafe { entry.as_ref() };
    assert!(header.key().is_empty());
    assert!(header.value().is_empty());
    unsafe { Entry::release(entry) };
  }

  #[test]
  fn test_expiry_boundary_is_inclusive() {
    let entry = Entry::allocate(b"k", b"v", 100).unwrap();
    let header = unsafe { entry.as_ref() };
    assert!(!header.is_expired(99));
    assert!(header.is_expired(100));
    assert!(header.is_expired(101));
    unsafe { Entry::release(entry) };
  }

  #[test]
  fn test_last_release_frees_exactly_once() {
    let before = freed_on_this_thread();
    let entry = Entry::allocate(b"k", b"v", 10).unwrap();
    unsafe { entry.as_ref() }.retain();
    unsafe { entry.as_ref() }.retain();
    assert_eq!(unsafe { entry.as_ref() }.ref_count(), 3);

    unsafe { Entry::release(entry) };
    unsafe { Entry::release(entry) };
    assert_eq!(freed_on_this_thread(), before, "still one reference alive");

    unsafe { Entry::release(entry) };
    assert_eq!(freed_on_this_thread(), before + 1);
  }

  #[test]
  fn test_clock_bit_transitions() {
    let entry = Entry::allocate(b"k", b"v", 10).unwrap();
    let header = unsafe { entry.as_ref() };
    header.clear_referenced();
    assert!(!header.is_referenced());
    header.touch();
    assert!(header.is_referenced());
    header.touch();
    assert!(header.is_referenced());
    unsafe { Entry::release(entry) };
  }
}
