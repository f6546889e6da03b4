//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the embedding binary. [`init_tracing`] is the convenient default.

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::{LevelFilter, ParseError};

/// Failure to install the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
  /// `RUST_LOG` or the given directive could not be parsed.
  #[error("invalid log filter: {0}")]
  Filter(#[from] ParseError),
  /// A global subscriber is already installed.
  #[error("tracing subscriber already installed: {0}")]
  AlreadyInstalled(String),
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by `default_filter`
/// (e.g. `"info"` or `"tenantweave=debug"`) when `RUST_LOG` is unset.
///
/// # Errors
///
/// Returns [`LoggingError::AlreadyInstalled`] instead of panicking when a
/// global subscriber exists.
pub fn init_tracing(default_filter: &str) -> Result<(), LoggingError> {
  let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
    Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)?,
    _ => EnvFilter::default()
      .add_directive(LevelFilter::INFO.into())
      .add_directive(default_filter.parse()?),
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(true)
    .try_init()
    .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))
}

/// Test helper: installs a test-writer subscriber once, ignoring later calls.
pub fn try_init_test_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_second_init_is_an_error_not_a_panic() {
    try_init_test_tracing();
    assert!(matches!(
      init_tracing("info"),
      Err(LoggingError::AlreadyInstalled(_)) | Err(LoggingError::Filter(_))
    ));
  }
}
