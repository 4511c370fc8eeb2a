use crate::error::CacheError;
use crate::time;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

#[derive(Default)]
struct StopSignal {
  stopped: Mutex<bool>,
  wake: Condvar,
}

/// A background thread that refreshes the process-wide clock on a fixed
/// interval.
///
/// Inserts already refresh the clock, so the ticker only matters for
/// read-heavy workloads where expiry should be noticed without any writes.
/// Dropping the ticker stops the thread and waits for it to exit.
pub struct TimeTicker {
  handle: Option<JoinHandle<()>>,
  signal: Arc<StopSignal>,
  interval: Duration,
}

impl TimeTicker {
  /// One refresh per second, matching the clock's resolution.
  pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

  /// Spawns the ticker thread. The clock is refreshed once before this returns.
  pub fn spawn(interval: Duration) -> Result<Self, CacheError> {
    let interval = interval.max(Duration::from_millis(1));
    let signal = Arc::new(StopSignal::default());
    let thread_signal = signal.clone();

    time::refresh();
    let handle = thread::Builder::new()
      .name("spincache-ticker".into())
      .spawn(move || {
        let mut stopped = thread_signal.stopped.lock();
        while !*stopped {
          thread_signal.wake.wait_for(&mut stopped, interval);
          time::refresh();
        }
      })
      .map_err(CacheError::TickerSpawn)?;

    debug!(?interval, "time ticker started");
    Ok(Self {
      handle: Some(handle),
      signal,
      interval,
    })
  }

  /// The refresh interval.
  pub fn interval(&self) -> Duration {
    self.interval
  }

  /// Stops the thread and waits for it to exit.
  pub fn stop(mut self) {
    self.shutdown();
  }

  fn shutdown(&mut self) {
    let Some(handle) = self.handle.take() else {
      return;
    };
    *self.signal.stopped.lock() = true;
    self.signal.wake.notify_one();
    if joined_cleanly(handle.join()) {
      debug!("time ticker stopped");
    }
  }
}

/// Reports a ticker thread that died instead of returning.
fn joined_cleanly(result: thread::Result<()>) -> bool {
  match result {
    Ok(()) => true,
    Err(panic) => {
      let message = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
      warn!(message, "time ticker thread panicked");
      false
    }
  }
}

impl Drop for TimeTicker {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl std::fmt::Debug for TimeTicker {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TimeTicker")
      .field("interval", &self.interval)
      .field("running", &self.handle.is_some())
      .finish()
  }
}
