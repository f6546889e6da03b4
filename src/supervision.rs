//! Actor-style supervision for message processing failures.
//!
//! Defines what happens when an actor's `process` returns an error or panics:
//! keep going, restart the actor in place, stop it, or escalate to the parent.
//! The [`SupervisionPolicy`] bounds how often an actor may be restarted and how
//! long to wait between init attempts.

use crate::actor::ActorId;
use crate::actor::ActorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Report of a failure escalated from a child to its parent.
///
/// The runtime delivers this to the parent's mailbox with high priority when a
/// child's failure strategy answers [`FailureAction::Escalate`].
#[derive(Clone, Debug)]
pub struct FailureReport {
  /// Actor that failed.
  pub actor_id: ActorId,
  /// Kind of the message that was being processed.
  pub msg_kind: &'static str,
  /// The error raised while processing.
  pub error: ActorError,
}

/// Action to take when a supervised actor fails to process a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
  /// Drop the failed message and continue with the next one.
  Resume,
  /// Destroy and re-initialise the actor, keeping its mailbox.
  Restart,
  /// Stop this actor and its children.
  Stop,
  /// Let the parent decide.
  Escalate,
}

/// Policy for supervising an actor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisionPolicy {
  /// Maximum restarts (and init retries) before the actor is stopped.
  /// None = unbounded (use with care).
  pub max_restarts: Option<u32>,
  /// Delay between init attempts.
  #[serde(with = "duration_ms", rename = "restart_backoff_ms")]
  pub restart_backoff: Duration,
}

impl SupervisionPolicy {
  /// Creates a policy with the given restart bound.
  pub fn new(max_restarts: Option<u32>) -> Self {
    Self {
      max_restarts,
      ..Default::default()
    }
  }

  /// Sets max restarts (None = unbounded).
  pub fn with_max_restarts(mut self, n: Option<u32>) -> Self {
    self.max_restarts = n;
    self
  }

  /// Sets restart backoff.
  pub fn with_restart_backoff(mut self, d: Duration) -> Self {
    self.restart_backoff = d;
    self
  }

  /// Returns true while `attempts` restarts are still within the bound.
  pub fn allows_restart(&self, attempts: u32) -> bool {
    self.max_restarts.is_none_or(|max| attempts <= max)
  }
}

impl Default for SupervisionPolicy {
  fn default() -> Self {
    Self {
      max_restarts: Some(3),
      restart_backoff: Duration::from_secs(1),
    }
  }
}

mod duration_ms {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(d)?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_restart_bound() {
    let policy = SupervisionPolicy::new(Some(2));
    assert!(policy.allows_restart(1));
    assert!(policy.allows_restart(2));
    assert!(!policy.allows_restart(3));
    assert!(SupervisionPolicy::new(None).allows_restart(u32::MAX));
  }

  #[test]
  fn test_policy_from_json() {
    let policy: SupervisionPolicy =
      serde_json::from_str(r#"{"max_restarts": 5, "restart_backoff_ms": 250}"#).unwrap();
    assert_eq!(policy.max_restarts, Some(5));
    assert_eq!(policy.restart_backoff, Duration::from_millis(250));
  }
}
