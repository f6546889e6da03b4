//! Bounded worker pool driving actor processing.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// Runs actor work on a tokio runtime, at most `pool_size` tasks at a time.
pub(crate) struct Dispatcher {
  handle: Handle,
  permits: Arc<Semaphore>,
  pool_size: usize,
}

impl Dispatcher {
  pub(crate) fn new(handle: Handle, pool_size: usize) -> Self {
    let pool_size = pool_size.max(1);
    Self {
      handle,
      permits: Arc::new(Semaphore::new(pool_size)),
      pool_size,
    }
  }

  pub(crate) fn pool_size(&self) -> usize {
    self.pool_size
  }

  /// Runs `task` once a worker slot is free.
  pub(crate) fn submit<F>(&self, task: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.submit_after(Duration::ZERO, task);
  }

  /// Runs `task` on a worker slot after `delay`.
  pub(crate) fn submit_after<F>(&self, delay: Duration, task: F)
  where
    F: FnOnce() + Send + 'static,
  {
    let permits = self.permits.clone();
    self.handle.spawn(async move {
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      let Ok(_permit) = permits.acquire_owned().await else {
        return;
      };
      task();
    });
  }

  /// Runs a cheap `task` (an enqueue) after `delay` without taking a slot.
  pub(crate) fn schedule<F>(&self, delay: Duration, task: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.handle.spawn(async move {
      tokio::time::sleep(delay).await;
      task();
    });
  }
}
