use std::cell::UnsafeCell;
use std::fmt;
use std::hint::spin_loop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI32, Ordering};

const UNLOCKED: i32 = 0;
const WRITER: i32 = -1;

/// A reader/writer spinlock tuned for sub-microsecond critical sections.
///
/// The whole lock is one signed word: a positive value counts the active
/// readers, `0` means unlocked and `-1` means a writer holds it. Every wait
/// path busy-spins with a CPU pause hint; nothing ever parks the thread.
///
/// The lock is not reentrant and not fair. A steady stream of readers can
/// starve a writer, which is acceptable when every read section is only a
/// handful of cache-line accesses.
pub struct RwSpinLock<T> {
  state: AtomicI32,
  data: UnsafeCell<T>,
}

// Same bounds as `std::sync::RwLock`: readers on several threads share `&T`.
unsafe impl<T: Send> Send for RwSpinLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwSpinLock<T> {}

impl<T> RwSpinLock<T> {
  pub fn new(data: T) -> Self {
    Self {
      state: AtomicI32::new(UNLOCKED),
      data: UnsafeCell::new(data),
    }
  }

  /// Acquires shared access, spinning while a writer holds the lock.
  #[inline]
  pub fn read(&self) -> RwSpinReadGuard<'_, T> {
    loop {
      let current = self.state.load(Ordering::Relaxed);
      if current < 0 {
        spin_loop();
        continue;
      }
      if self
        .state
        .compare_exchange_weak(current, current + 1, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
      {
        return RwSpinReadGuard { lock: self };
      }
      spin_loop();
    }
  }

  /// Acquires exclusive access, spinning until there are no readers or writer.
  #[inline]
  pub fn write(&self) -> RwSpinWriteGuard<'_, T> {
    while self
      .state
      .compare_exchange_weak(UNLOCKED, WRITER, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      spin_loop();
    }
    RwSpinWriteGuard { lock: self }
  }

  /// Attempts a single shared acquisition.
  pub fn try_read(&self) -> Option<RwSpinReadGuard<'_, T>> {
    let current = self.state.load(Ordering::Relaxed);
    if current < 0 {
      return None;
    }
    self
      .state
      .compare_exchange(current, current + 1, Ordering::Acquire, Ordering::Relaxed)
      .ok()
      .map(|_| RwSpinReadGuard { lock: self })
  }

  /// Attempts a single exclusive acquisition.
  pub fn try_write(&self) -> Option<RwSpinWriteGuard<'_, T>> {
    self
      .state
      .compare_exchange(UNLOCKED, WRITER, Ordering::Acquire, Ordering::Relaxed)
      .ok()
      .map(|_| RwSpinWriteGuard { lock: self })
  }

  /// Exclusive access through `&mut self`; no atomics involved.
  pub fn get_mut(&mut self) -> &mut T {
    self.data.get_mut()
  }

  #[cfg(test)]
  fn raw_state(&self) -> i32 {
    self.state.load(Ordering::Relaxed)
  }
}

impl<T> fmt::Debug for RwSpinLock<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RwSpinLock")
      .field("state", &self.state.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

/// Shared guard; dropping it decrements the reader count with release ordering.
pub struct RwSpinReadGuard<'a, T> {
  lock: &'a RwSpinLock<T>,
}

impl<'a, T> Deref for RwSpinReadGuard<'a, T> {
  type Target = T;
  fn deref(&self) -> &Self::Target {
    // SAFETY: a positive reader count excludes writers.
    unsafe { &*self.lock.data.get() }
  }
}

impl<'a, T> Drop for RwSpinReadGuard<'a, T> {
  #[inline]
  fn drop(&mut self) {
    self.lock.state.fetch_sub(1, Ordering::Release);
  }
}

/// Exclusive guard; dropping it stores `0` with release ordering, which pairs
/// with the acquire of the next reader or writer.
pub struct RwSpinWriteGuard<'a, T> {
  lock: &'a RwSpinLock<T>,
}

impl<'a, T> Deref for RwSpinWriteGuard<'a, T> {
  type Target = T;
  fn deref(&self) -> &Self::Target {
    // SAFETY: state == -1 means this guard is the only accessor.
    unsafe { &*self.lock.data.get() }
  }
}

impl<'a, T> DerefMut for RwSpinWriteGuard<'a, T> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    // SAFETY: state == -1 means this guard is the only accessor.
    unsafe { &mut *self.lock.data.get() }
  }
}

impl<'a, T> Drop for RwSpinWriteGuard<'a, T> {
  #[inline]
  fn drop(&mut self) {
    self.lock.state.store(UNLOCKED, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn test_readers_share_the_lock() {
    let lock = RwSpinLock::new(5);
    let first = lock.read();
    let second = lock.read();
    assert_eq!(lock.raw_state(), 2);
    assert_eq!(*first + *second, 10);
    assert!(lock.try_write().is_none(), "writer must wait for readers");
    drop(first);
    drop(second);
    assert_eq!(lock.raw_state(), UNLOCKED);
  }

  #[test]
  fn test_writer_excludes_everyone() {
    let lock = RwSpinLock::new(Vec::<u32>::new());
    {
      let mut guard = lock.write();
      assert_eq!(lock.raw_state(), WRITER);
      assert!(lock.try_read().is_none());
      assert!(lock.try_write().is_none());
      guard.push(1);
    }
    assert_eq!(lock.raw_state(), UNLOCKED);
    assert_eq!(*lock.read(), vec![1]);
  }

  #[test]
  fn test_concurrent_writers_do_not_lose_updates() {
    let lock = Arc::new(RwSpinLock::new(0u64));
    let threads = 4;
    let per_thread = 10_000;

    let handles: Vec<_> = (0..threads)
      .map(|_| {
        let lock = lock.clone();
        thread::spawn(move || {
          for _ in 0..per_thread {
            *lock.write() += 1;
            // Interleave reads to exercise the reader/writer hand-off.
            let _ = *lock.read();
          }
        })
      })
      .collect();

    for handle in handles {
      handle.join().unwrap();
    }
    assert_eq!(*lock.read(), threads * per_thread);
    assert_eq!(lock.raw_state(), UNLOCKED);
  }

  #[test]
  fn test_get_mut_bypasses_the_lock() {
    let mut lock = RwSpinLock::new(1);
    *lock.get_mut() = 7;
    assert_eq!(*lock.read(), 7);
  }
}
