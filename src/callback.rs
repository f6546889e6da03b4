//! Exactly-once completion callbacks.
//!
//! Every inbound message carries a [`Callback`]. Completing it consumes it, so
//! a second completion does not compile. A callback that is dropped without
//! being completed reports [`RoutingError::CallbackDropped`], which means a
//! producer always hears exactly one outcome, even when a handler panics.

use crate::error::RoutingError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Receiver of a message outcome.
pub trait CallbackHandler: Send + Sync {
  /// The message was processed (or deliberately skipped).
  fn on_success(&self);

  /// The message failed.
  fn on_failure(&self, error: RoutingError);
}

/// Move-only completion handle.
pub struct Callback {
  inner: Option<Arc<dyn CallbackHandler>>,
}

impl Callback {
  /// Wraps a handler.
  pub fn new(handler: Arc<dyn CallbackHandler>) -> Self {
    Self {
      inner: Some(handler),
    }
  }

  /// Creates a callback from two closures.
  pub fn from_fns<S, F>(on_success: S, on_failure: F) -> Self
  where
    S: Fn() + Send + Sync + 'static,
    F: Fn(RoutingError) + Send + Sync + 'static,
  {
    Self::new(Arc::new(FnCallback {
      on_success,
      on_failure,
    }))
  }

  /// A callback that ignores its outcome.
  pub fn empty() -> Self {
    Self::new(Arc::new(EmptyCallback))
  }

  /// Completes with success.
  pub fn on_success(mut self) {
    if let Some(inner) = self.inner.take() {
      inner.on_success();
    }
  }

  /// Completes with failure.
  pub fn on_failure(mut self, error: RoutingError) {
    if let Some(inner) = self.inner.take() {
      inner.on_failure(error);
    }
  }

  /// Splits this callback into `parts` children.
  ///
  /// The parent succeeds once every child succeeded and fails on the first
  /// child failure; later outcomes are ignored. With `parts == 0` the parent
  /// succeeds immediately and an empty vec is returned.
  pub fn split(self, parts: usize) -> Vec<Callback> {
    if parts == 0 {
      self.on_success();
      return Vec::new();
    }
    let shared = Arc::new(MultipleCallback {
      remaining: AtomicUsize::new(parts),
      parent: Mutex::new(Some(self)),
    });
    (0..parts)
      .map(|_| Callback::new(shared.clone() as Arc<dyn CallbackHandler>))
      .collect()
  }
}

impl Drop for Callback {
  fn drop(&mut self) {
    if let Some(inner) = self.inner.take() {
      inner.on_failure(RoutingError::CallbackDropped);
    }
  }
}

impl fmt::Debug for Callback {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Callback")
      .field("completed", &self.inner.is_none())
      .finish()
  }
}

struct FnCallback<S, F> {
  on_success: S,
  on_failure: F,
}

impl<S, F> CallbackHandler for FnCallback<S, F>
where
  S: Fn() + Send + Sync,
  F: Fn(RoutingError) + Send + Sync,
{
  fn on_success(&self) {
    (self.on_success)()
  }

  fn on_failure(&self, error: RoutingError) {
    (self.on_failure)(error)
  }
}

struct EmptyCallback;

impl CallbackHandler for EmptyCallback {
  fn on_success(&self) {}

  fn on_failure(&self, _error: RoutingError) {}
}

struct MultipleCallback {
  remaining: AtomicUsize,
  parent: Mutex<Option<Callback>>,
}

impl CallbackHandler for MultipleCallback {
  fn on_success(&self) {
    if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
      if let Some(parent) = self.parent.lock().take() {
        parent.on_success();
      }
    }
  }

  fn on_failure(&self, error: RoutingError) {
    if let Some(parent) = self.parent.lock().take() {
      parent.on_failure(error);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicU32;

  fn counting() -> (Callback, Arc<AtomicU32>, Arc<AtomicU32>) {
    let ok = Arc::new(AtomicU32::new(0));
    let failed = Arc::new(AtomicU32::new(0));
    let (ok2, failed2) = (ok.clone(), failed.clone());
    let cb = Callback::from_fns(
      move || {
        ok2.fetch_add(1, Ordering::SeqCst);
      },
      move |_| {
        failed2.fetch_add(1, Ordering::SeqCst);
      },
    );
    (cb, ok, failed)
  }

  #[test]
  fn test_drop_reports_failure() {
    let (cb, ok, failed) = counting();
    drop(cb);
    assert_eq!(ok.load(Ordering::SeqCst), 0);
    assert_eq!(failed.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_success_is_reported_once() {
    let (cb, ok, failed) = counting();
    cb.on_success();
    assert_eq!(ok.load(Ordering::SeqCst), 1);
    assert_eq!(failed.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_split_succeeds_after_all_parts() {
    let (cb, ok, failed) = counting();
    let mut parts = cb.split(3);
    parts.pop().unwrap().on_success();
    parts.pop().unwrap().on_success();
    assert_eq!(ok.load(Ordering::SeqCst), 0);
    parts.pop().unwrap().on_success();
    assert_eq!(ok.load(Ordering::SeqCst), 1);
    assert_eq!(failed.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_split_fails_on_first_failure_only() {
    let (cb, ok, failed) = counting();
    let mut parts = cb.split(2);
    parts
      .pop()
      .unwrap()
      .on_failure(RoutingError::Handler("boom".to_string()));
    parts.pop().unwrap().on_success();
    assert_eq!(ok.load(Ordering::SeqCst), 0);
    assert_eq!(failed.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_split_zero_succeeds_immediately() {
    let (cb, ok, _) = counting();
    assert!(cb.split(0).is_empty());
    assert_eq!(ok.load(Ordering::SeqCst), 1);
  }
}
