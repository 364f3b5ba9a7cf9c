//! Write coalescer for keystroke-level edits.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(150);

/// Runs only the most recently scheduled job, `delay` after it was scheduled.
/// Scheduling again inside the window aborts the pending job.
pub struct Debouncer {
  delay: Duration,
  pending: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Debouncer {
  fn default() -> Self {
    Self::new(DEFAULT_DELAY)
  }
}

impl Debouncer {
  pub fn new(delay: Duration) -> Self {
    Self {
      delay,
      pending: Mutex::new(None),
    }
  }

  pub fn delay(&self) -> Duration {
    self.delay
  }

  /// Must be called from within a tokio runtime.
  pub fn schedule<F>(&self, job: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let delay = self.delay;
    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      job.await;
    });
    let previous = match self.pending.lock() {
      Ok(mut pending) => pending.replace(handle),
      Err(poisoned) => poisoned.into_inner().replace(handle),
    };
    if let Some(previous) = previous {
      previous.abort();
    }
  }

  /// Abort the pending job, if any. Returns whether one was still waiting.
  pub fn cancel(&self) -> bool {
    let previous = match self.pending.lock() {
      Ok(mut pending) => pending.take(),
      Err(poisoned) => poisoned.into_inner().take(),
    };
    match previous {
      Some(handle) if !handle.is_finished() => {
        handle.abort();
        true
      }
      _ => false,
    }
  }

  pub fn is_pending(&self) -> bool {
    match self.pending.lock() {
      Ok(pending) => pending.as_ref().is_some_and(|h| !h.is_finished()),
      Err(_) => false,
    }
  }
}

impl Drop for Debouncer {
  fn drop(&mut self) {
    self.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[tokio::test]
  async fn test_burst_collapses_to_last_job() {
    let debouncer = Debouncer::new(Duration::from_millis(40));
    let runs = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(AtomicUsize::new(0));

    for n in 1..=5 {
      let runs = Arc::clone(&runs);
      let last = Arc::clone(&last);
      debouncer.schedule(async move {
        runs.fetch_add(1, Ordering::SeqCst);
        last.store(n, Ordering::SeqCst);
      });
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(debouncer.is_pending());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), 5);
    assert!(!debouncer.is_pending());
  }

  #[tokio::test]
  async fn test_cancel_prevents_run() {
    let debouncer = Debouncer::new(Duration::from_millis(30));
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    debouncer.schedule(async move {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(debouncer.cancel());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(!debouncer.cancel());
  }
}
